//! Blocking `Read`/`Write` adapters that pace a byte stream through a [`Governor`].
//!
//! Each call is admitted before it reaches the inner stream, capped at the
//! governor's burst capacity, so a single large buffer never needs more
//! tokens than the bucket can hold. Bytes admitted but not transferred (a
//! short read or write) are not refunded.

use crate::{Governor, GovernorError};
use std::io::{self, Read, Write};

fn to_io(err: GovernorError) -> io::Error {
    let kind = if err.is_timeout() { io::ErrorKind::WouldBlock } else { io::ErrorKind::Other };
    io::Error::new(kind, err)
}

/// Admit up to `len` bytes and return how many the caller may move.
fn admit_bytes(governor: &Governor, len: usize) -> io::Result<usize> {
    admit_within(governor, len, governor.config().burst_capacity())
}

/// `capacity` is read outside the governor's lock, so a concurrent
/// `reconfigure` may have shrunk it by the time we admit; re-clamp once.
fn admit_within(governor: &Governor, len: usize, capacity: u64) -> io::Result<usize> {
    let len64 = u64::try_from(len).unwrap_or(u64::MAX);
    let grant = match governor.admit_blocking(len64.min(capacity)) {
        Err(err) if err.is_exceeds_capacity() => {
            let want = len64.min(governor.config().burst_capacity());
            governor.admit_blocking(want).map_err(to_io)?
        }
        res => res.map_err(to_io)?,
    };
    // granted <= want <= len, so this always fits.
    Ok(usize::try_from(grant.granted()).unwrap_or(len))
}

/// Reader whose throughput is capped by a [`Governor`].
#[derive(Debug)]
pub struct ThrottledReader<R> {
    inner: R,
    governor: Governor,
}

impl<R> ThrottledReader<R> {
    pub fn new(inner: R, governor: Governor) -> Self {
        Self { inner, governor }
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ThrottledReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return self.inner.read(buf);
        }
        let n = admit_bytes(&self.governor, buf.len())?;
        self.inner.read(&mut buf[..n])
    }
}

/// Writer whose throughput is capped by a [`Governor`].
#[derive(Debug)]
pub struct ThrottledWriter<W> {
    inner: W,
    governor: Governor,
}

impl<W> ThrottledWriter<W> {
    pub fn new(inner: W, governor: Governor) -> Self {
        Self { inner, governor }
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ThrottledWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return self.inner.write(buf);
        }
        let n = admit_bytes(&self.governor, buf.len())?;
        self.inner.write(&buf[..n])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GovernorConfig;
    use std::io::Cursor;

    fn fast(capacity: u64) -> Governor {
        // High enough that refills never stall a unit test.
        Governor::new(GovernorConfig::new(1e9, capacity).unwrap())
    }

    #[test]
    fn writes_are_split_at_capacity() {
        let governor = fast(4);
        let mut writer = ThrottledWriter::new(Vec::new(), governor.clone());

        assert_eq!(writer.write(b"abcdefgh").unwrap(), 4);
        writer.write_all(b"ijklmnop").unwrap();
        assert_eq!(writer.get_ref().as_slice(), b"abcdijklmnop");
        assert_eq!(governor.stats().admitted_units, 12);
    }

    #[test]
    fn reads_are_split_at_capacity() {
        let governor = fast(3);
        let mut reader = ThrottledReader::new(Cursor::new(b"hello world".to_vec()), governor);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"hel");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"lo world");
    }

    #[test]
    fn empty_buffers_bypass_the_governor() {
        let governor = fast(1);
        let mut writer = ThrottledWriter::new(Vec::new(), governor.clone());
        assert_eq!(writer.write(&[]).unwrap(), 0);
        assert_eq!(governor.stats().admitted_requests, 0);
    }

    #[test]
    fn paced_writer_respects_rate() {
        // 1000 B/s with a 100 B bucket: 300 bytes need at least 200ms.
        let governor = Governor::with_rate(1000.0, 100).unwrap();
        let mut writer = ThrottledWriter::new(io::sink(), governor);
        let start = std::time::Instant::now();
        writer.write_all(&[0u8; 300]).unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(190));
    }

    #[test]
    fn stale_capacity_is_reclamped() {
        let governor = fast(4);
        // Capacity read as 8 just before a shrink to 4.
        assert_eq!(admit_within(&governor, 10, 8).unwrap(), 4);
        assert_eq!(governor.stats().rejections, 1);
        assert_eq!(governor.stats().admitted_units, 4);
    }

    #[test]
    fn shrinking_capacity_between_writes_keeps_writing() {
        let governor = fast(8);
        let mut writer = ThrottledWriter::new(Vec::new(), governor.clone());
        assert_eq!(writer.write(b"0123456789").unwrap(), 8);

        governor.reconfigure(GovernorConfig::new(1e9, 3).unwrap()).unwrap();
        assert_eq!(writer.write(b"abcdef").unwrap(), 3);
        assert_eq!(writer.get_ref().as_slice(), b"01234567abc");
        assert_eq!(governor.stats().rejections, 0);
    }
}
