//! Streaming decoder for gzip NDJSON snapshot files
//!
//! Produces a lazy, finite, non-restartable sequence of typed records.
//! A malformed line is skipped and counted, never fatal; a truncated or
//! corrupt gzip stream aborts the sequence with an error the caller must
//! surface. Progress (lines/sec and, when estimable, a completion
//! percentage) is logged every `progress_interval` lines.

use adp_common::error::{AdpError, Result};
use flate2::read::MultiGzDecoder;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Counters accumulated while decoding one file
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeStats {
    /// Physical lines consumed (including malformed and blank ones)
    pub lines: u64,
    /// Lines that failed JSON decoding and were skipped
    pub malformed: u64,
}

/// Lazy reader over one gzip NDJSON part-file
pub struct SnapshotReader<T> {
    lines: std::io::Lines<BufReader<MultiGzDecoder<File>>>,
    path: PathBuf,
    line_cap: Option<u64>,
    progress_interval: u64,
    /// Uncompressed size from the gzip ISIZE trailer, when trustworthy
    estimated_bytes: Option<u64>,
    bytes_read: u64,
    stats: DecodeStats,
    started: Instant,
    fatal: bool,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> SnapshotReader<T> {
    /// Open a snapshot file for streaming
    ///
    /// `line_cap` bounds the number of physical lines consumed (smoke runs).
    pub fn open(
        path: impl AsRef<Path>,
        progress_interval: u64,
        line_cap: Option<u64>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let estimated_bytes = read_isize_estimate(&mut file)?;
        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            lines: BufReader::new(MultiGzDecoder::new(file)).lines(),
            path,
            line_cap,
            progress_interval: progress_interval.max(1),
            estimated_bytes,
            bytes_read: 0,
            stats: DecodeStats::default(),
            started: Instant::now(),
            fatal: false,
            _marker: PhantomData,
        })
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn log_progress(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.stats.lines as f64 / elapsed
        } else {
            0.0
        };

        match self.estimated_bytes {
            Some(total) if total > 0 => {
                let pct = (self.bytes_read as f64 / total as f64 * 100.0).min(100.0);
                info!(
                    path = %self.path.display(),
                    lines = self.stats.lines,
                    lines_per_sec = rate as u64,
                    percent = format!("{:.1}", pct),
                    "Decoding progress"
                );
            },
            _ => {
                info!(
                    path = %self.path.display(),
                    lines = self.stats.lines,
                    lines_per_sec = rate as u64,
                    "Decoding progress"
                );
            },
        }
    }
}

impl<T: DeserializeOwned> Iterator for SnapshotReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fatal {
            return None;
        }

        loop {
            if let Some(cap) = self.line_cap {
                if self.stats.lines >= cap {
                    return None;
                }
            }

            let line = match self.lines.next() {
                None => return None,
                Some(Err(e)) => {
                    self.fatal = true;
                    return Some(Err(AdpError::CorruptStream {
                        path: self.path.display().to_string(),
                        source: e,
                    }));
                },
                Some(Ok(line)) => line,
            };

            self.stats.lines += 1;
            self.bytes_read += line.len() as u64 + 1;

            if self.stats.lines % self.progress_interval == 0 {
                self.log_progress();
            }

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<T>(&line) {
                Ok(record) => return Some(Ok(record)),
                Err(e) => {
                    self.stats.malformed += 1;
                    debug!(
                        path = %self.path.display(),
                        line = self.stats.lines,
                        error = %e,
                        "Skipping malformed line"
                    );
                },
            }
        }
    }
}

/// Read the gzip ISIZE trailer (uncompressed length mod 2^32)
///
/// Only meaningful for single-member files; an estimate smaller than the
/// compressed size is discarded as untrustworthy (multi-member archive or
/// 4 GiB wraparound).
fn read_isize_estimate(file: &mut File) -> Result<Option<u64>> {
    let len = file.metadata()?.len();
    if len < 20 {
        return Ok(None);
    }

    file.seek(SeekFrom::End(-4))?;
    let mut trailer = [0u8; 4];
    file.read_exact(&mut trailer)?;
    let isize = u32::from_le_bytes(trailer) as u64;

    if isize <= len {
        return Ok(None);
    }
    Ok(Some(isize))
}
