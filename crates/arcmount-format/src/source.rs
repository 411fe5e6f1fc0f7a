//! Byte sources for the decoders.
//!
//! During the indexing pass the archive is read through a [`CountingReader`]
//! that tracks the file position and its high-water mark. Compared against
//! the total file size, the high-water mark proxies how much of the archive
//! has been processed, which matters for raw archives that need a complete
//! decompression pass to discover their decompressed size.

use std::io::{self, IsTerminal, Read, Seek, SeekFrom};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

/// Anything the entry streams can decode from: readable, seekable, owned.
pub trait ArchiveSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveSource for T {}

const REPORT_PERIOD: Duration = Duration::from_secs(1);

/// 1 Hz indexing-progress reporter.
///
/// On a terminal this drives an overwriting progress line; otherwise it
/// emits throttled log records so progress still lands in the journal when
/// the mount was started from a service.
pub struct Progress {
    quiet: bool,
    total: u64,
    bar: Option<ProgressBar>,
    next_report: Instant,
    reported: bool,
}

impl Progress {
    /// A reporter for an archive of `total` bytes. Quiet mode suppresses
    /// all output.
    pub fn new(total: u64, quiet: bool) -> Self {
        let bar = if !quiet && io::stderr().is_terminal() {
            let bar = ProgressBar::hidden();
            bar.set_style(
                ProgressStyle::with_template("Loading {pos}%")
                    .expect("static template"),
            );
            bar.set_length(100);
            Some(bar)
        } else {
            None
        };
        Self {
            quiet,
            total,
            bar,
            next_report: Instant::now() + REPORT_PERIOD,
            reported: false,
        }
    }

    /// A reporter that never prints. Used by the serving-phase readers.
    pub fn disabled() -> Self {
        Self::new(0, true)
    }

    fn percent(&self, hwm: u64) -> u64 {
        if self.total == 0 || hwm == 0 {
            return 0;
        }
        (100 * hwm / self.total).min(100)
    }

    fn tick(&mut self, hwm: u64) {
        if self.quiet {
            return;
        }
        let now = Instant::now();
        if now < self.next_report {
            return;
        }
        self.next_report = now + REPORT_PERIOD;
        let percent = self.percent(hwm);
        match &self.bar {
            Some(bar) => {
                if !self.reported {
                    bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                }
                bar.set_position(percent);
            }
            None => info!("Loading {}%", percent),
        }
        self.reported = true;
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if !self.reported {
            return;
        }
        match self.bar.take() {
            Some(bar) => bar.finish_and_clear(),
            None => info!("Loaded 100%"),
        }
    }
}

/// A readable, seekable source that maintains position counters and feeds
/// the progress reporter.
pub struct CountingReader<R> {
    inner: R,
    position: u64,
    hwm: u64,
    progress: Progress,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, progress: Progress) -> Self {
        Self {
            inner,
            position: 0,
            hwm: 0,
            progress,
        }
    }

    /// Largest file position seen so far.
    pub fn high_water_mark(&self) -> u64 {
        self.hwm
    }

    fn update(&mut self) {
        if self.hwm < self.position {
            self.hwm = self.position;
        }
        let hwm = self.hwm;
        self.progress.tick(hwm);
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        self.update();
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let offset = self.inner.seek(pos)?;
        self.position = offset;
        self.update();
        Ok(offset)
    }
}
