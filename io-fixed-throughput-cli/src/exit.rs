//! Process exit codes.

use io_fixed_throughput::{GovernorError, ParseSizeError};

use crate::args::UsageError;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MISCONFIGURED: u8 = 2;
/// `EX_TEMPFAIL`: a block waited longer than `--max-wait`.
pub const EXIT_WOULD_BLOCK: u8 = 75;

pub fn code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(governor) = cause.downcast_ref::<GovernorError>() {
            if governor.is_timeout() {
                return EXIT_WOULD_BLOCK;
            }
            if governor.is_misconfiguration() || governor.is_exceeds_capacity() {
                return EXIT_MISCONFIGURED;
            }
        }
        if cause.is::<UsageError>() || cause.is::<ParseSizeError>() {
            return EXIT_MISCONFIGURED;
        }
    }
    EXIT_FAILURE
}
