//! Session directory → in-memory zip archive.
//!
//! Only the regular files directly inside the directory are packed, each
//! under its bare file name.  Subdirectories are skipped, not descended
//! into.  A directory that does not exist yields a valid, empty archive.
//!
//! Entries are sorted by name and carry a fixed timestamp, so the same
//! directory contents always produce the same bytes.

use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Ways building an archive can fail.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to list {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip encoding failed: {0}")]
    Zip(#[from] ZipError),
}

/// Packs the regular files of `dir` into a zip archive held in memory.
pub async fn build_archive(dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    let files = collect_files(dir).await?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for (name, contents) in &files {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(contents).map_err(ZipError::Io)?;
    }

    let bytes = writer.finish()?.into_inner();
    debug!(
        "archived {} files from {} ({} bytes)",
        files.len(),
        dir.display(),
        bytes.len()
    );
    Ok(bytes)
}

/// Reads every regular file of `dir`, sorted by name.
async fn collect_files(dir: &Path) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let read_dir_err = |source: std::io::Error| ArchiveError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_dir_err(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|source| ArchiveError::ReadFile {
            path: path.clone(),
            source,
        })?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            // Removed since it was listed (a deleted key file).
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(source) => return Err(ArchiveError::ReadFile { path, source }),
        };
        files.push((name, contents));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut contents = Vec::new();
                file.read_to_end(&mut contents).unwrap();
                (file.name().to_string(), contents)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_regular_files_only() {
        // Arrange: three files and two subdirectories (one non-empty).
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("creds.json"), br#"{"a":1}"#).unwrap();
        std::fs::write(tmp.path().join("pre-key-1.json"), b"{}").unwrap();
        std::fs::write(tmp.path().join("session-628.json"), b"[]").unwrap();
        std::fs::create_dir(tmp.path().join("empty")).unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("inner.json"), b"x").unwrap();

        // Act
        let bytes = build_archive(tmp.path()).await.unwrap();

        // Assert
        let names: Vec<String> = entries(bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["creds.json", "pre-key-1.json", "session-628.json"]);
    }

    #[tokio::test]
    async fn test_contents_are_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        let creds = br#"{"registrationId":1234,"me":{"id":"628123456789:1@s.whatsapp.net"}}"#;
        std::fs::write(tmp.path().join("creds.json"), creds).unwrap();

        let bytes = build_archive(tmp.path()).await.unwrap();

        let files = entries(bytes);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, creds.to_vec());
    }

    #[tokio::test]
    async fn test_empty_dir_gives_empty_archive() {
        let tmp = tempfile::tempdir().unwrap();

        let bytes = build_archive(tmp.path()).await.unwrap();

        assert!(entries(bytes).is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_gives_empty_archive() {
        let tmp = tempfile::tempdir().unwrap();

        let bytes = build_archive(&tmp.path().join("does-not-exist")).await.unwrap();

        assert!(entries(bytes).is_empty());
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.json"), b"2").unwrap();
        std::fs::write(tmp.path().join("a.json"), b"1").unwrap();

        let first = build_archive(tmp.path()).await.unwrap();
        let second = build_archive(tmp.path()).await.unwrap();

        assert_eq!(first, second);
    }
}
