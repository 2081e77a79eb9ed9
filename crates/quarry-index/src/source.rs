//! Read-only access to current file content.
//!
//! The pipeline never walks directories; the surrounding system decides
//! what exists. This trait is the one seam where the retriever can ask
//! for a file's current text, used to re-slice merged chunks whose line
//! ranges do not quite touch.

use std::path::PathBuf;

use quarry_store::BoxFuture;

pub trait SourceReader: Send + Sync {
    /// Current content of `file_path`, or `None` if it no longer exists.
    fn read(&self, file_path: &str) -> BoxFuture<'_, std::io::Result<Option<String>>>;
}

/// Reads files relative to a fixed root directory.
#[derive(Debug, Clone)]
pub struct FsSourceReader {
    root: PathBuf,
}

impl FsSourceReader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceReader for FsSourceReader {
    fn read(&self, file_path: &str) -> BoxFuture<'_, std::io::Result<Option<String>>> {
        let path = self.root.join(file_path);
        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
    }
}

/// Fixed in-memory file set, for tests and embedded callers.
#[derive(Debug, Clone, Default)]
pub struct StaticSourceReader {
    files: std::collections::HashMap<String, String>,
}

impl StaticSourceReader {
    #[must_use]
    pub fn new(files: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

impl SourceReader for StaticSourceReader {
    fn read(&self, file_path: &str) -> BoxFuture<'_, std::io::Result<Option<String>>> {
        let content = self.files.get(file_path).cloned();
        Box::pin(async move { Ok(content) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_reader_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.rs"), "fn hello() {}\n").unwrap();

        let reader = FsSourceReader::new(dir.path());
        let content = reader.read("hello.rs").await.unwrap().unwrap();
        assert_eq!(content, "fn hello() {}\n");
    }

    #[tokio::test]
    async fn fs_reader_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FsSourceReader::new(dir.path());
        assert!(reader.read("gone.rs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn static_reader_serves_fixed_map() {
        let reader = StaticSourceReader::new([("a.rs".to_string(), "fn a() {}".to_string())]);
        assert_eq!(reader.read("a.rs").await.unwrap().unwrap(), "fn a() {}");
        assert!(reader.read("b.rs").await.unwrap().is_none());
    }
}
