//! Partitioned archive store
//!
//! An archive is a UTF-8 manifest at the base path plus one sibling file per
//! chunk:
//!
//! ```text
//! data.sgz        0,data.sgz_0
//!                 1,data.sgz_1
//! data.sgz_0      <gzip member>
//! data.sgz_1      <gzip member>
//! ```
//!
//! A store is bound to one [`OpenMode`] for its whole life. Chunks are
//! appended by a single writer in sequence order, so manifest order equals
//! chunk order and readers take physical line order as authoritative.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{SplitgzError, SplitgzResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => write!(f, "Read"),
            OpenMode::Write => write!(f, "Write"),
        }
    }
}

/// One manifest line: `{index},{path}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub index: u64,
    pub path: PathBuf,
}

impl ManifestEntry {
    /// Parse a manifest line with its terminator already stripped.
    ///
    /// The path is everything after the first comma, so chunk paths may
    /// themselves contain commas.
    pub fn parse(line: &str) -> SplitgzResult<Self> {
        let (index, path) = line
            .split_once(',')
            .ok_or_else(|| SplitgzError::corrupt_archive(format!("malformed line '{}'", line)))?;

        let index = index.trim().parse::<u64>().map_err(|_| {
            SplitgzError::corrupt_archive(format!("non-numeric index in line '{}'", line))
        })?;

        if path.is_empty() {
            return Err(SplitgzError::corrupt_archive(format!(
                "missing chunk path in line '{}'",
                line
            )));
        }

        Ok(ManifestEntry {
            index,
            path: PathBuf::from(path),
        })
    }
}

enum Handle {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
    Closed,
}

pub struct PartitionedArchive {
    base_path: String,
    mode: OpenMode,
    handle: Handle,
    /// Next chunk sequence number (write) or expected manifest index (read)
    cursor: u64,
    strict: bool,
    index_mismatches: u64,
}

impl PartitionedArchive {
    /// Open the manifest at `path`.
    ///
    /// Read mode requires an existing manifest; write mode creates a new one
    /// and refuses to replace an existing file. In write mode the base path
    /// is made absolute, so the manifest can be read from any directory.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> SplitgzResult<Self> {
        let path = path.as_ref();
        let base_path = path
            .to_str()
            .ok_or_else(|| SplitgzError::invalid_argument("archive path is not valid UTF-8"))?;

        if base_path.trim().is_empty() {
            return Err(SplitgzError::invalid_argument("archive path is empty"));
        }

        let absolute;
        let base_path = match mode {
            OpenMode::Read => base_path,
            OpenMode::Write => {
                absolute = std::path::absolute(path)?;
                absolute.to_str().ok_or_else(|| {
                    SplitgzError::invalid_argument("archive path is not valid UTF-8")
                })?
            }
        };

        let handle = match mode {
            OpenMode::Read => {
                let file =
                    File::open(base_path).map_err(|e| SplitgzError::from_open(e, base_path))?;
                Handle::Reader(BufReader::new(file))
            }
            OpenMode::Write => {
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(base_path)
                    .map_err(|e| SplitgzError::from_open(e, base_path))?;
                Handle::Writer(BufWriter::new(file))
            }
        };

        Ok(PartitionedArchive {
            base_path: base_path.to_string(),
            mode,
            handle,
            cursor: 0,
            strict: false,
            index_mismatches: 0,
        })
    }

    /// Fail reads whose stored index disagrees with the line position
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Manifest lines whose stored index disagreed with their position
    pub fn index_mismatches(&self) -> u64 {
        self.index_mismatches
    }

    /// Path of the chunk file with sequence number `sequence`
    pub fn chunk_path(&self, sequence: u64) -> String {
        format!("{}_{}", self.base_path, sequence)
    }

    fn wrong_mode(&self) -> SplitgzError {
        SplitgzError::invalid_operation(format!("instance is initialized for mode {}", self.mode))
    }

    /// Store `bytes` as the next chunk and append its manifest line
    pub fn write_chunk(&mut self, bytes: &[u8]) -> SplitgzResult<()> {
        if self.mode != OpenMode::Write {
            return Err(self.wrong_mode());
        }

        let sequence = self.cursor;
        let chunk_path = self.chunk_path(sequence);

        let mut chunk = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&chunk_path)
            .map_err(|e| SplitgzError::from_open(e, &chunk_path))?;
        chunk.write_all(bytes)?;

        match &mut self.handle {
            Handle::Writer(writer) => writeln!(writer, "{},{}", sequence, chunk_path)?,
            _ => return Err(SplitgzError::invalid_operation("archive is closed")),
        }

        self.cursor += 1;
        debug!(sequence, path = %chunk_path, size = bytes.len(), "wrote chunk");
        Ok(())
    }

    /// Advance one manifest line without loading the chunk.
    ///
    /// Returns `None` at end of manifest, and keeps returning `None` on
    /// every later call.
    pub fn read_next_entry(&mut self) -> SplitgzResult<Option<ManifestEntry>> {
        if self.mode != OpenMode::Read {
            return Err(self.wrong_mode());
        }

        let reader = match &mut self.handle {
            Handle::Reader(reader) => reader,
            Handle::Closed => return Ok(None),
            Handle::Writer(_) => {
                return Err(SplitgzError::invalid_operation("manifest is open for writing"))
            }
        };

        let mut raw = Vec::new();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8(raw).map_err(|_| {
            SplitgzError::corrupt_archive(format!(
                "manifest line {} is not valid UTF-8",
                self.cursor
            ))
        })?;
        let line = line.trim_end_matches('\n').trim_end_matches('\r');

        let entry = ManifestEntry::parse(line)?;
        let expected = self.cursor;
        self.cursor += 1;

        if entry.index != expected {
            if self.strict {
                return Err(SplitgzError::corrupt_archive(format!(
                    "manifest line {} declares index {}",
                    expected, entry.index
                )));
            }
            self.index_mismatches += 1;
            warn!(
                expected,
                declared = entry.index,
                path = %entry.path.display(),
                "manifest index does not match line position, using line order"
            );
        }

        Ok(Some(entry))
    }

    /// Load the next chunk in manifest order
    pub fn read_next_chunk(&mut self) -> SplitgzResult<Option<Vec<u8>>> {
        let entry = match self.read_next_entry()? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        match fs::read(&entry.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SplitgzError::corrupt_archive(format!(
                    "chunk file {} listed in manifest is missing",
                    entry.path.display()
                )))
            }
            Err(e) => Err(SplitgzError::Io(e)),
        }
    }

    /// Flush and release the manifest handle. Partial output stays on disk.
    pub fn close(&mut self) -> SplitgzResult<()> {
        if let Handle::Writer(writer) = &mut self.handle {
            writer.flush()?;
        }
        self.handle = Handle::Closed;
        Ok(())
    }
}

impl Drop for PartitionedArchive {
    fn drop(&mut self) {
        if let Handle::Writer(writer) = &mut self.handle {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::random_bytes;
    use tempfile::TempDir;

    fn archive_path(dir: &TempDir) -> PathBuf {
        dir.path().join("output.sgz")
    }

    fn write_three(path: &Path) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let a = b"some text #0".to_vec();
        let b = random_bytes(6000);
        let c = b"some text #2".to_vec();

        let mut archive = PartitionedArchive::open(path, OpenMode::Write).unwrap();
        archive.write_chunk(&a).unwrap();
        archive.write_chunk(&b).unwrap();
        archive.write_chunk(&c).unwrap();
        archive.close().unwrap();

        (a, b, c)
    }

    #[test]
    fn test_blank_path_rejected() {
        let err = PartitionedArchive::open("  ", OpenMode::Read).err().unwrap();
        assert!(matches!(err, SplitgzError::InvalidArgument(_)));

        let err = PartitionedArchive::open("", OpenMode::Write).err().unwrap();
        assert!(matches!(err, SplitgzError::InvalidArgument(_)));
    }

    #[test]
    fn test_read_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let err = PartitionedArchive::open(archive_path(&dir), OpenMode::Read)
            .err()
            .unwrap();
        assert!(matches!(err, SplitgzError::NotFound(_)));
    }

    #[test]
    fn test_write_refuses_existing_manifest() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        fs::write(&path, b"").unwrap();

        let err = PartitionedArchive::open(&path, OpenMode::Write).err().unwrap();
        assert!(matches!(err, SplitgzError::AlreadyExists(_)));
    }

    #[test]
    fn test_write_in_read_mode_fails() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        fs::write(&path, b"").unwrap();

        let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
        let err = archive.write_chunk(b"data").unwrap_err();
        assert!(matches!(err, SplitgzError::InvalidOperation(_)));
        assert!(err.to_string().contains("mode Read"));
    }

    #[test]
    fn test_read_in_write_mode_fails() {
        let dir = TempDir::new().unwrap();
        let mut archive = PartitionedArchive::open(archive_path(&dir), OpenMode::Write).unwrap();

        let err = archive.read_next_chunk().unwrap_err();
        assert!(matches!(err, SplitgzError::InvalidOperation(_)));
        assert!(err.to_string().contains("mode Write"));
    }

    #[test]
    fn test_write_three_chunks_layout() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        let (a, b, c) = write_three(&path);

        let base = path.to_str().unwrap();
        assert_eq!(fs::read(format!("{}_0", base)).unwrap(), a);
        assert_eq!(fs::metadata(format!("{}_1", base)).unwrap().len(), b.len() as u64);
        assert_eq!(fs::read(format!("{}_2", base)).unwrap(), c);
        assert!(!Path::new(&format!("{}_3", base)).exists());

        let manifest = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("0,{}_0", base),
                format!("1,{}_1", base),
                format!("2,{}_2", base),
            ]
        );
        assert!(manifest.ends_with('\n'));
    }

    #[test]
    fn test_read_back_in_write_order() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        let (a, b, c) = write_three(&path);

        let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
        assert_eq!(archive.read_next_chunk().unwrap(), Some(a));
        assert_eq!(archive.read_next_chunk().unwrap(), Some(b));
        assert_eq!(archive.read_next_chunk().unwrap(), Some(c));
        assert_eq!(archive.read_next_chunk().unwrap(), None);
        assert_eq!(archive.read_next_chunk().unwrap(), None);
        assert_eq!(archive.index_mismatches(), 0);
    }

    #[test]
    fn test_chunk_file_collision() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        fs::write(format!("{}_0", path.to_str().unwrap()), b"stale").unwrap();

        let mut archive = PartitionedArchive::open(&path, OpenMode::Write).unwrap();
        let err = archive.write_chunk(b"fresh").unwrap_err();
        assert!(matches!(err, SplitgzError::AlreadyExists(_)));
    }

    #[test]
    fn test_malformed_lines_are_corrupt() {
        let manifests: [&[u8]; 5] = [
            b"no-comma-here\n",
            b"x,/tmp/chunk\n",
            b"0,\n",
            b"\n",
            b"0,\xff\xfe\n",
        ];
        for manifest in manifests {
            let dir = TempDir::new().unwrap();
            let path = archive_path(&dir);
            fs::write(&path, manifest).unwrap();

            let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
            let err = archive.read_next_chunk().unwrap_err();
            assert!(
                matches!(err, SplitgzError::CorruptArchive(_)),
                "manifest {:?} gave {:?}",
                manifest,
                err
            );
        }
    }

    #[test]
    fn test_missing_chunk_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        let missing = dir.path().join("gone");
        fs::write(&path, format!("0,{}\n", missing.display())).unwrap();

        let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
        let err = archive.read_next_chunk().unwrap_err();
        assert!(matches!(err, SplitgzError::CorruptArchive(_)));
    }

    #[test]
    fn test_reordered_manifest_uses_line_order() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        let (a, b, _) = write_three(&path);

        let manifest = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        fs::write(&path, format!("{}\r\n{}\r\n", lines[1], lines[0])).unwrap();

        let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
        let first = archive.read_next_entry().unwrap().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(fs::read(&first.path).unwrap(), b);
        assert_eq!(archive.read_next_chunk().unwrap(), Some(a));
        assert_eq!(archive.read_next_chunk().unwrap(), None);
        assert_eq!(archive.index_mismatches(), 2);
    }

    #[test]
    fn test_strict_mode_rejects_reordered_manifest() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        write_three(&path);

        let manifest = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        fs::write(&path, format!("{}\n{}\n", lines[2], lines[0])).unwrap();

        let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
        archive.set_strict(true);
        let err = archive.read_next_chunk().unwrap_err();
        assert!(matches!(err, SplitgzError::CorruptArchive(_)));
    }

    #[test]
    fn test_manifest_records_absolute_chunk_paths() {
        let dir = TempDir::new().unwrap();

        // Same file, spelled relative to the working directory
        let cwd = std::env::current_dir().unwrap();
        let mut path = PathBuf::new();
        for _ in cwd.components().skip(1) {
            path.push("..");
        }
        path.push(archive_path(&dir).strip_prefix("/").unwrap());
        assert!(path.is_relative());
        write_three(&path);

        let manifest = fs::read_to_string(&path).unwrap();
        for line in manifest.lines() {
            let entry = ManifestEntry::parse(line).unwrap();
            assert!(entry.path.is_absolute(), "{} is relative", entry.path.display());
            assert!(entry.path.exists());
        }
    }

    #[test]
    fn test_manifest_entry_path_with_comma() {
        let entry = ManifestEntry::parse("3,/data/a,b_3").unwrap();
        assert_eq!(entry.index, 3);
        assert_eq!(entry.path, PathBuf::from("/data/a,b_3"));
    }

    #[test]
    fn test_closed_archive_reads_none() {
        let dir = TempDir::new().unwrap();
        let path = archive_path(&dir);
        write_three(&path);

        let mut archive = PartitionedArchive::open(&path, OpenMode::Read).unwrap();
        archive.close().unwrap();
        assert_eq!(archive.read_next_chunk().unwrap(), None);
    }
}
