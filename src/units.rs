//! Human-readable sizes, bandwidths and durations.
//!
//! Sizes are a decimal integer followed by an optional unit: `K`/`KiB`,
//! `M`/`MiB`, `G`/`GiB` are powers of 1024; `KB`, `MB`, `GB` are powers of
//! 1000; `B` or no unit means bytes. Bandwidths are sizes followed by `/s`
//! (`"200MB/s"`). Durations take `ns`, `us`, `ms` or `s`.

use std::time::Duration;

/// Errors produced while parsing sizes, bandwidths or durations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseSizeError {
    #[error("empty value")]
    Empty,
    #[error("missing number in {0:?}")]
    MissingNumber(String),
    #[error("unknown unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },
    #[error("{0:?} does not fit in 64 bits")]
    Overflow(String),
    #[error("bandwidth {0:?} must end with \"B/s\"")]
    NotARate(String),
}

fn split_number(input: &str) -> Result<(u64, &str), ParseSizeError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseSizeError::Empty);
    }
    let digits = input.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(ParseSizeError::MissingNumber(input.to_string()));
    }
    let value = input[..digits]
        .parse::<u64>()
        .map_err(|_| ParseSizeError::Overflow(input.to_string()))?;
    Ok((value, &input[digits..]))
}

/// Parse a byte size such as `4K`, `512`, `1GiB` or `10MB`.
pub fn parse_size(input: &str) -> Result<u64, ParseSizeError> {
    let (value, unit) = split_number(input)?;
    let multiplier: u64 = match unit {
        "" | "B" => 1,
        "K" | "KiB" => 1 << 10,
        "KB" => 1_000,
        "M" | "MiB" => 1 << 20,
        "MB" => 1_000_000,
        "G" | "GiB" => 1 << 30,
        "GB" => 1_000_000_000,
        other => {
            return Err(ParseSizeError::UnknownUnit {
                input: input.trim().to_string(),
                unit: other.to_string(),
            })
        }
    };
    value.checked_mul(multiplier).ok_or_else(|| ParseSizeError::Overflow(input.trim().to_string()))
}

/// Parse a bandwidth such as `100MB/s` into bytes per second.
pub fn parse_bandwidth(input: &str) -> Result<u64, ParseSizeError> {
    let trimmed = input.trim();
    match trimmed.strip_suffix("/s") {
        Some(size) if size.ends_with('B') => parse_size(size),
        _ => Err(ParseSizeError::NotARate(trimmed.to_string())),
    }
}

/// Parse a duration such as `250ms`, `2s` or `1500us`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ParseSizeError> {
    let (value, unit) = split_number(input)?;
    match unit {
        "ns" => Ok(Duration::from_nanos(value)),
        "us" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        other => Err(ParseSizeError::UnknownUnit {
            input: input.trim().to_string(),
            unit: other.to_string(),
        }),
    }
}
