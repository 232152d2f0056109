//! Size-bounded gzip part-file writer
//!
//! A [`PartWriter`] owns the output directory of one partition and streams
//! JSON lines into `part_000.gz`, `part_001.gz`, ... The size bound applies
//! to the uncompressed bytes of a file and is checked before each line, so a
//! line never spans two files.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use snapex_common::{Result, SnapexError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default upper bound on the uncompressed size of one part file (5 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Extension of every part file
pub const PART_EXTENSION: &str = "gz";

/// File name of the part with the given sequence number
pub fn part_file_name(sequence: u32) -> String {
    format!("part_{:03}.{}", sequence, PART_EXTENSION)
}

fn is_part_file_name(name: &str) -> bool {
    name.strip_prefix("part_")
        .and_then(|rest| rest.strip_suffix(".gz"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Delete every part file directly under `dir`. A missing `dir` holds none.
pub fn remove_part_files(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(is_part_file_name) && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// A finished part file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartFile {
    pub sequence: u32,
    pub path: PathBuf,
    pub uncompressed_bytes: u64,
    pub records: u64,
}

struct OpenPart {
    encoder: GzEncoder<BufWriter<File>>,
    file: PartFile,
}

impl OpenPart {
    fn finish(self) -> Result<PartFile> {
        let mut inner = self.encoder.finish()?;
        inner.flush()?;
        Ok(self.file)
    }
}

pub struct PartWriter {
    dir: PathBuf,
    max_file_size: u64,
    current: Option<OpenPart>,
    finished: Vec<PartFile>,
    next_sequence: u32,
    dir_prepared: bool,
    closed: bool,
}

impl PartWriter {
    /// Nothing touches the filesystem until the first write.
    pub fn new(dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_size,
            current: None,
            finished: Vec::new(),
            next_sequence: 0,
            dir_prepared: false,
            closed: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records written so far across all parts
    pub fn records(&self) -> u64 {
        self.finished.iter().map(|p| p.records).sum::<u64>()
            + self.current.as_ref().map_or(0, |open| open.file.records)
    }

    /// Serialize `value` as one line and append it
    pub fn write(&mut self, value: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.write_line(&line)
    }

    /// Append one already newline-terminated line
    pub fn write_line(&mut self, line: &[u8]) -> Result<()> {
        if self.closed {
            return Err(SnapexError::Io(std::io::Error::other(format!(
                "part writer for {} is closed",
                self.dir.display()
            ))));
        }

        let line_size = line.len() as u64;
        let must_rotate = self.current.as_ref().is_some_and(|open| {
            open.file.uncompressed_bytes > 0
                && open.file.uncompressed_bytes + line_size > self.max_file_size
        });
        if must_rotate {
            self.finish_current()?;
        }

        if line_size > self.max_file_size {
            warn!(
                dir = %self.dir.display(),
                line_size,
                max_file_size = self.max_file_size,
                "Line exceeds max part size, writing it to its own part"
            );
        }

        if self.current.is_none() {
            self.current = Some(self.open_part()?);
        }
        if let Some(open) = self.current.as_mut() {
            open.encoder.write_all(line)?;
            open.file.uncompressed_bytes += line_size;
            open.file.records += 1;
        }
        Ok(())
    }

    /// Finish the open part and return every part written. Calling it again
    /// returns the same list.
    pub fn close(&mut self) -> Result<Vec<PartFile>> {
        if !self.closed {
            self.closed = true;
            self.finish_current()?;
        }
        Ok(self.finished.clone())
    }

    fn finish_current(&mut self) -> Result<()> {
        if let Some(open) = self.current.take() {
            let part = open.finish()?;
            debug!(
                path = %part.path.display(),
                bytes = part.uncompressed_bytes,
                records = part.records,
                "Part file finished"
            );
            self.finished.push(part);
        }
        Ok(())
    }

    fn open_part(&mut self) -> Result<OpenPart> {
        if !self.dir_prepared {
            fs::create_dir_all(&self.dir)?;
            // A previous run may have produced more parts than this one will
            remove_part_files(&self.dir)?;
            self.dir_prepared = true;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let path = self.dir.join(part_file_name(sequence));
        let file = File::create(&path)?;
        debug!(path = %path.display(), "Part file opened");

        Ok(OpenPart {
            encoder: GzEncoder::new(BufWriter::new(file), Compression::default()),
            file: PartFile {
                sequence,
                path,
                uncompressed_bytes: 0,
                records: 0,
            },
        })
    }
}

impl Drop for PartWriter {
    fn drop(&mut self) {
        if let Some(open) = self.current.take() {
            let path = open.file.path.clone();
            if let Err(e) = open.finish() {
                warn!(path = %path.display(), error = %e, "Failed to finish part file on drop");
            }
        }
    }
}
