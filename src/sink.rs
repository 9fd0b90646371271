//! Result sinks
//!
//! The collector calls [`ResultSink::write`] once per chunk, in index order,
//! from a single thread.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::archive::{OpenMode, PartitionedArchive};
use crate::error::{SplitgzError, SplitgzResult};

/// Output buffer size for plain files (256KB)
const STREAM_BUFFER_SIZE: usize = 256 * 1024;

pub trait ResultSink: Send {
    fn write(&mut self, block: Vec<u8>) -> SplitgzResult<()>;

    /// Flush buffered output once the last block has been written
    fn finish(&mut self) -> SplitgzResult<()> {
        Ok(())
    }
}

/// Stores each block as the next archive chunk
pub struct ArchiveChunkWriter {
    archive: PartitionedArchive,
}

impl ArchiveChunkWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> SplitgzResult<Self> {
        Self::new(PartitionedArchive::open(path, OpenMode::Write)?)
    }

    pub fn new(archive: PartitionedArchive) -> SplitgzResult<Self> {
        if archive.mode() != OpenMode::Write {
            return Err(SplitgzError::invalid_operation(format!(
                "instance is initialized for mode {}",
                archive.mode()
            )));
        }
        Ok(ArchiveChunkWriter { archive })
    }
}

impl ResultSink for ArchiveChunkWriter {
    fn write(&mut self, block: Vec<u8>) -> SplitgzResult<()> {
        self.archive.write_chunk(&block)
    }

    fn finish(&mut self) -> SplitgzResult<()> {
        self.archive.close()
    }
}

/// Appends blocks as-is, rebuilding the original unsplit stream
pub struct PlainFileWriter<W: Write + Send> {
    writer: BufWriter<W>,
}

impl PlainFileWriter<File> {
    /// Create `path`; an existing file is never overwritten
    pub fn create<P: AsRef<Path>>(path: P) -> SplitgzResult<Self> {
        let path = path.as_ref();
        let display = path.to_string_lossy();
        if display.trim().is_empty() {
            return Err(SplitgzError::invalid_argument("output path is empty"));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| SplitgzError::from_open(e, &display))?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> PlainFileWriter<W> {
    pub fn new(inner: W) -> Self {
        PlainFileWriter {
            writer: BufWriter::with_capacity(STREAM_BUFFER_SIZE, inner),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> SplitgzResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| SplitgzError::Io(e.into_error()))
    }
}

impl<W: Write + Send> ResultSink for PlainFileWriter<W> {
    fn write(&mut self, block: Vec<u8>) -> SplitgzResult<()> {
        self.writer.write_all(&block)?;
        Ok(())
    }

    fn finish(&mut self) -> SplitgzResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
