//! Compress a file into a partitioned archive, or restore one
//!
//! Both directions are the same pipeline with the adapters swapped:
//!
//! | operation  | source               | transform        | sink                 |
//! |------------|----------------------|------------------|----------------------|
//! | compress   | `FileChunker`        | `GzipCompress`   | `ArchiveChunkWriter` |
//! | decompress | `ArchiveChunkReader` | `GzipDecompress` | `PlainFileWriter`    |

use std::path::Path;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::{SplitgzError, SplitgzResult};
use crate::logger::Logger;
use crate::pipeline::{Pipeline, RunReport};
use crate::sink::{ArchiveChunkWriter, PlainFileWriter, ResultSink};
use crate::source::{ArchiveChunkReader, ChunkSource, FileChunker};
use crate::transform::{GzipCompress, GzipDecompress, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Compress,
    Decompress,
}

impl Action {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compress" => Some(Action::Compress),
            "decompress" => Some(Action::Decompress),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Compress => write!(f, "Compress"),
            Action::Decompress => write!(f, "Decompress"),
        }
    }
}

pub fn run_action(
    action: Action,
    source: &Path,
    destination: &Path,
    config: &PipelineConfig,
    logger: Arc<dyn Logger>,
) -> SplitgzResult<RunReport> {
    match action {
        Action::Compress => compress_file(source, destination, config, logger),
        Action::Decompress => decompress_archive(source, destination, config, logger),
    }
}

/// Split `source` into portions and store them as an archive at `destination`
pub fn compress_file(
    source: &Path,
    destination: &Path,
    config: &PipelineConfig,
    logger: Arc<dyn Logger>,
) -> SplitgzResult<RunReport> {
    check_paths(source, destination)?;
    config.validate()?;

    let reader = FileChunker::open(source, config.portion_size)?;
    let writer = ArchiveChunkWriter::create(destination)?;
    execute(
        reader,
        GzipCompress::new(config.compression_level),
        writer,
        config,
        logger,
    )
}

/// Restore the original bytes of the archive at `source` into `destination`
pub fn decompress_archive(
    source: &Path,
    destination: &Path,
    config: &PipelineConfig,
    logger: Arc<dyn Logger>,
) -> SplitgzResult<RunReport> {
    check_paths(source, destination)?;
    config.validate()?;

    let reader = ArchiveChunkReader::open(source, config.strict_manifest)?;
    let writer = PlainFileWriter::create(destination)?;
    execute(reader, GzipDecompress, writer, config, logger)
}

fn check_paths(source: &Path, destination: &Path) -> SplitgzResult<()> {
    if !source.exists() {
        return Err(SplitgzError::NotFound(source.display().to_string()));
    }
    if destination.exists() {
        return Err(SplitgzError::AlreadyExists(destination.display().to_string()));
    }
    Ok(())
}

fn execute<S, T, K>(
    source: S,
    transform: T,
    sink: K,
    config: &PipelineConfig,
    logger: Arc<dyn Logger>,
) -> SplitgzResult<RunReport>
where
    S: ChunkSource,
    T: Transform + 'static,
    K: ResultSink + 'static,
{
    let mut pipeline = Pipeline::new(source, transform, sink, config.clone())?.with_logger(logger);
    let report = pipeline.run()?;

    // Any input error means the output is incomplete
    if report.source_errors > 0 {
        if let Some(error) = pipeline.take_errors().into_iter().next() {
            return Err(error);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullLogger;
    use std::fs;
    use tempfile::TempDir;

    fn logger() -> Arc<dyn Logger> {
        Arc::new(NullLogger)
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("compress"), Some(Action::Compress));
        assert_eq!(Action::parse("DeCompress"), Some(Action::Decompress));
        assert_eq!(Action::parse("zip"), None);
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = compress_file(
            &dir.path().join("nope"),
            &dir.path().join("out"),
            &PipelineConfig::default(),
            logger(),
        )
        .unwrap_err();
        assert!(matches!(err, SplitgzError::NotFound(_)));
    }

    #[test]
    fn test_existing_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in");
        let destination = dir.path().join("out");
        fs::write(&source, b"data").unwrap();
        fs::write(&destination, b"precious").unwrap();

        let err = compress_file(&source, &destination, &PipelineConfig::default(), logger())
            .unwrap_err();
        assert!(matches!(err, SplitgzError::AlreadyExists(_)));
        assert_eq!(fs::read(&destination).unwrap(), b"precious");
    }

    #[test]
    fn test_corrupt_chunk_fails_decompress() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in");
        let archive = dir.path().join("archive");
        let restored = dir.path().join("restored");
        fs::write(&source, crate::test_utils::text_bytes(10_000)).unwrap();

        let config = PipelineConfig::default()
            .with_portion_size(1000)
            .with_workers(3);
        compress_file(&source, &archive, &config, logger()).unwrap();

        // Clobber chunk 4 with garbage
        fs::write(format!("{}_4", archive.display()), b"garbage").unwrap();

        let err = decompress_archive(&archive, &restored, &config, logger()).unwrap_err();
        assert!(matches!(err, SplitgzError::Transform { index: 4, .. }));

        // Chunks before the bad one were restored; the partial file stays
        let partial = fs::read(&restored).unwrap();
        assert_eq!(partial, crate::test_utils::text_bytes(4000));
    }

    #[test]
    fn test_reordered_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in");
        let archive = dir.path().join("archive");
        fs::write(&source, crate::test_utils::text_bytes(3000)).unwrap();

        let config = PipelineConfig::default().with_portion_size(1000);
        let report = compress_file(&source, &archive, &config, logger()).unwrap();
        assert_eq!(report.index_mismatches, 0);

        let manifest = fs::read_to_string(&archive).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        fs::write(&archive, format!("{}\n{}\n{}\n", lines[1], lines[0], lines[2])).unwrap();

        let report =
            decompress_archive(&archive, &dir.path().join("restored"), &config, logger())
                .unwrap();
        assert_eq!(report.chunks_written, 3);
        assert_eq!(report.index_mismatches, 2);
    }

    #[test]
    fn test_corrupt_manifest_fails_decompress() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in");
        let archive = dir.path().join("archive");
        fs::write(&source, crate::test_utils::text_bytes(5000)).unwrap();

        let config = PipelineConfig::default().with_portion_size(1000);
        compress_file(&source, &archive, &config, logger()).unwrap();

        let mut manifest = fs::read_to_string(&archive).unwrap();
        manifest.push_str("not a line\n");
        fs::write(&archive, manifest).unwrap();

        let err =
            decompress_archive(&archive, &dir.path().join("restored"), &config, logger())
                .unwrap_err();
        assert!(matches!(err, SplitgzError::CorruptArchive(_)));
    }
}
