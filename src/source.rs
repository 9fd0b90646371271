//! Chunk sources feeding the pipeline
//!
//! A source yields a finite, ordered run of byte blocks and then `None`
//! forever after.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::archive::{OpenMode, PartitionedArchive};
use crate::error::{SplitgzError, SplitgzResult};

/// Initial capacity for a block; larger portions grow as bytes arrive
const BLOCK_RESERVE: usize = 64 * 1024;

pub trait ChunkSource {
    /// Next block, or `None` once the source is exhausted
    fn read_next(&mut self) -> SplitgzResult<Option<Vec<u8>>>;

    /// Blocks served out of their recorded order
    fn index_mismatches(&self) -> u64 {
        0
    }
}

/// Slices a plain file into fixed-size portions.
///
/// Every block is exactly `portion_size` bytes except the last, which carries
/// the remainder. An empty file yields no blocks.
pub struct FileChunker {
    reader: BufReader<File>,
    portion_size: usize,
    exhausted: bool,
}

impl FileChunker {
    pub fn open<P: AsRef<Path>>(path: P, portion_size: usize) -> SplitgzResult<Self> {
        let path = path.as_ref();
        let display = path.to_string_lossy();

        if display.trim().is_empty() {
            return Err(SplitgzError::invalid_argument("source path is empty"));
        }

        if portion_size == 0 {
            return Err(SplitgzError::out_of_range("portion size must be positive"));
        }

        let file = File::open(path).map_err(|e| SplitgzError::from_open(e, &display))?;

        Ok(FileChunker {
            reader: BufReader::with_capacity(portion_size.min(4 * 1024 * 1024), file),
            portion_size,
            exhausted: false,
        })
    }

}

impl ChunkSource for FileChunker {
    fn read_next(&mut self) -> SplitgzResult<Option<Vec<u8>>> {
        if self.exhausted {
            return Ok(None);
        }

        // Fill the block; short reads are not end of file
        let mut buffer = Vec::with_capacity(self.portion_size.min(BLOCK_RESERVE));
        let filled = (&mut self.reader)
            .take(self.portion_size as u64)
            .read_to_end(&mut buffer)?;

        if filled < self.portion_size {
            self.exhausted = true;
        }

        if filled == 0 {
            return Ok(None);
        }

        Ok(Some(buffer))
    }
}

/// Reads chunks back out of a partitioned archive, one per manifest line.
pub struct ArchiveChunkReader {
    archive: PartitionedArchive,
}

impl ArchiveChunkReader {
    /// Open the manifest at `path`; `strict` rejects out-of-order indices
    pub fn open<P: AsRef<Path>>(path: P, strict: bool) -> SplitgzResult<Self> {
        let mut archive = PartitionedArchive::open(path, OpenMode::Read)?;
        archive.set_strict(strict);
        Self::new(archive)
    }

    pub fn new(archive: PartitionedArchive) -> SplitgzResult<Self> {
        if archive.mode() != OpenMode::Read {
            return Err(SplitgzError::invalid_operation(format!(
                "instance is initialized for mode {}",
                archive.mode()
            )));
        }
        Ok(ArchiveChunkReader { archive })
    }
}

impl ChunkSource for ArchiveChunkReader {
    fn read_next(&mut self) -> SplitgzResult<Option<Vec<u8>>> {
        self.archive.read_next_chunk()
    }

    fn index_mismatches(&self) -> u64 {
        self.archive.index_mismatches()
    }
}
