//! One I/O job: a file handle, a block buffer and an optional governor.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use io_fixed_throughput::{Governor, GovernorConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::args::IoPattern;

/// Parameters shared by every job of a run.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub pattern: IoPattern,
    pub bs: u64,
    pub num_blocks: u64,
    /// Buffer alignment, normally the file's preferred block size.
    pub align: usize,
    pub pacing: Option<GovernorConfig>,
    pub max_wait: Option<Duration>,
}

/// What a finished job measured.
#[derive(Debug)]
pub struct JobReport {
    pub blocks: u64,
    pub bytes: u64,
    /// Time spent inside read/write calls.
    pub io_time: Duration,
    /// Wall time of the whole job, admission waits included.
    pub run_time: Duration,
    /// Time spent waiting for the governor.
    pub throttled: Duration,
    /// Per-block I/O latency in nanoseconds.
    pub latencies: Histogram<u64>,
}

/// Block buffer aligned for direct I/O.
struct AlignedBuf {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBuf {
    fn new(len: usize, align: usize) -> io::Result<Self> {
        let align = align.max(1).next_power_of_two();
        let storage = vec![0u8; len + align - 1];
        let offset = storage.as_ptr().align_offset(align);
        if offset >= align {
            return Err(io::Error::other(format!("cannot align buffer to {align} bytes")));
        }
        Ok(Self { storage, offset, len })
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }
}

pub struct Worker<'a> {
    options: &'a JobOptions,
    file: &'a File,
    rng: StdRng,
    governor: Option<Governor>,
    buf: AlignedBuf,
}

impl<'a> Worker<'a> {
    pub fn new(options: &'a JobOptions, file: &'a File, seed: u64) -> Result<Self> {
        let len = usize::try_from(options.bs).context("block size does not fit in memory")?;
        let mut buf = AlignedBuf::new(len, options.align)?;
        let mut rng = StdRng::seed_from_u64(seed);
        if options.pattern == IoPattern::Write {
            rng.fill(buf.bytes_mut());
        }
        Ok(Self {
            options,
            file,
            rng,
            governor: options.pacing.clone().map(Governor::new),
            buf,
        })
    }

    pub fn run(mut self) -> Result<JobReport> {
        let start = Instant::now();
        let mut latencies = Histogram::<u64>::new(3).context("latency histogram")?;
        let mut io_time = Duration::ZERO;
        let mut throttled = Duration::ZERO;

        for block in 0..self.options.num_blocks {
            if let Some(governor) = &self.governor {
                let grant = match self.options.max_wait {
                    Some(limit) => governor.admit_blocking_timeout(self.options.bs, limit),
                    None => governor.admit_blocking(self.options.bs),
                }
                .with_context(|| format!("admitting block {block}"))?;
                throttled += grant.waited();
            }

            let begin = Instant::now();
            self.rw_one_block()?;
            let took = begin.elapsed();
            io_time += took;
            latencies.saturating_record(u64::try_from(took.as_nanos()).unwrap_or(u64::MAX));
        }

        let run_time = start.elapsed();
        tracing::debug!(
            blocks = self.options.num_blocks,
            ?run_time,
            ?throttled,
            "job finished"
        );
        Ok(JobReport {
            blocks: self.options.num_blocks,
            bytes: self.options.num_blocks * self.options.bs,
            io_time,
            run_time,
            throttled,
            latencies,
        })
    }

    fn rw_one_block(&mut self) -> Result<()> {
        let mut file = self.file;
        match self.options.pattern {
            IoPattern::RandRead => {
                let offset = self.rng.random_range(0..self.options.num_blocks) * self.options.bs;
                file.read_exact_at(self.buf.bytes_mut(), offset)
                    .with_context(|| format!("pread at offset {offset}"))
            }
            IoPattern::Read => file.read_exact(self.buf.bytes_mut()).context("read"),
            IoPattern::Write => file.write_all(self.buf.bytes_mut()).context("write"),
        }
    }
}

/// Open options with `O_DIRECT` applied when `direct` is set.
pub fn open_options(direct: bool) -> OpenOptions {
    let mut options = OpenOptions::new();
    if direct {
        set_direct(&mut options);
    }
    options
}

#[cfg(target_os = "linux")]
fn set_direct(options: &mut OpenOptions) {
    options.custom_flags(libc::O_DIRECT);
}

#[cfg(not(target_os = "linux"))]
fn set_direct(_options: &mut OpenOptions) {
    tracing::warn!("O_DIRECT is only available on Linux, using buffered I/O");
}

/// Preferred I/O alignment for `file`.
pub fn alignment_of(file: &File) -> Result<usize> {
    let blksize = file.metadata().context("fstat")?.blksize();
    Ok(usize::try_from(blksize).unwrap_or(4096).max(1))
}

/// Open `path` for the write job, truncating it.
pub fn open_for_write(path: &Path, direct: bool) -> Result<File> {
    open_options(direct)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

/// Open `path` for reading, first writing it out unthrottled when it is
/// missing or shorter than `size`.
pub fn prepare_for_read(
    path: &Path,
    bs: u64,
    size: u64,
    direct: bool,
    seed: u64,
    out: &mut impl Write,
) -> Result<File> {
    loop {
        match open_options(direct).read(true).open(path) {
            Ok(file) => {
                let len = file.metadata().context("fstat")?.len();
                if len >= size {
                    return Ok(file);
                }
                write!(out, "Target file too small, rewriting...")?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                write!(out, "Target file does not exists, writing...")?;
            }
            Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
        }
        out.flush()?;

        let file = open_for_write(path, direct)?;
        let options = JobOptions {
            pattern: IoPattern::Write,
            bs,
            num_blocks: size / bs,
            align: alignment_of(&file)?,
            pacing: None,
            max_wait: None,
        };
        Worker::new(&options, &file, seed)?.run()?;
        writeln!(out, " done")?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use io_fixed_throughput::GovernorError;

    fn options(pattern: IoPattern, bs: u64, num_blocks: u64) -> JobOptions {
        JobOptions { pattern, bs, num_blocks, align: 512, pacing: None, max_wait: None }
    }

    #[test]
    fn aligned_buffer_honours_alignment() {
        for align in [1, 512, 4096, 3000] {
            let mut buf = AlignedBuf::new(8192, align).unwrap();
            let slice = buf.bytes_mut();
            assert_eq!(slice.len(), 8192);
            assert_eq!(slice.as_ptr() as usize % align.next_power_of_two(), 0);
        }
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");

        let file = open_for_write(&path, false).unwrap();
        let report = Worker::new(&options(IoPattern::Write, 4096, 8), &file, 1).unwrap().run().unwrap();
        assert_eq!(report.bytes, 32 * 1024);
        assert_eq!(report.latencies.len(), 8);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32 * 1024);

        let file = open_options(false).read(true).open(&path).unwrap();
        let seq = Worker::new(&options(IoPattern::Read, 4096, 8), &file, 2).unwrap().run().unwrap();
        assert_eq!(seq.blocks, 8);

        let rand = Worker::new(&options(IoPattern::RandRead, 4096, 8), &file, 3).unwrap().run().unwrap();
        assert_eq!(rand.bytes, 32 * 1024);
    }

    #[test]
    fn reading_past_the_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let file = File::open(&path).unwrap();
        let err = Worker::new(&options(IoPattern::Read, 4096, 2), &file, 0).unwrap().run().unwrap_err();
        assert!(err.to_string().contains("read"));
    }

    #[test]
    fn prepare_creates_and_extends_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        let mut out = Vec::new();

        let file = prepare_for_read(&path, 1024, 8192, false, 7, &mut out).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 8192);
        assert_eq!(
            String::from_utf8(out.clone()).unwrap(),
            "Target file does not exists, writing... done\n"
        );

        out.clear();
        prepare_for_read(&path, 1024, 16384, false, 7, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Target file too small, rewriting... done\n");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16384);

        let mut out = Vec::new();
        prepare_for_read(&path, 1024, 4096, false, 7, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn paced_job_is_held_to_the_bandwidth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paced");
        let file = open_for_write(&path, false).unwrap();

        // 64 KiB/s with a one-block bucket: 5 blocks of 4 KiB need 4 refills.
        let mut job = options(IoPattern::Write, 4096, 5);
        job.pacing = Some(GovernorConfig::new(65_536.0, 4096).unwrap());
        let report = Worker::new(&job, &file, 0).unwrap().run().unwrap();

        assert!(report.run_time >= Duration::from_millis(240), "{:?}", report.run_time);
        assert!(report.throttled >= Duration::from_millis(200));
    }

    #[test]
    fn max_wait_surfaces_a_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeout");
        let file = open_for_write(&path, false).unwrap();

        // The second block needs a full second of refill.
        let mut job = options(IoPattern::Write, 1024, 2);
        job.pacing = Some(GovernorConfig::new(1024.0, 1024).unwrap());
        job.max_wait = Some(Duration::from_millis(20));
        let err = Worker::new(&job, &file, 0).unwrap().run().unwrap_err();

        let governor = err.downcast_ref::<GovernorError>().unwrap();
        assert!(governor.is_timeout());
    }
}
