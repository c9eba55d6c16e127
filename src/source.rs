//! Document sources.
//!
//! A [`DocumentSource`] lists the documents of a folder and fetches their
//! raw bytes. Transport failures surface as
//! [`IndexError::SourceUnavailable`]; the pipeline does not retry them.
//!
//! [`LocalFolderSource`] serves files below a configured root directory,
//! filtered by include/exclude globs. Cloud-drive sources implement the
//! same trait outside this crate.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::LocalSourceConfig;
use crate::error::{IndexError, Result};
use crate::models::DocumentRef;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List the documents of `folder`, sorted by path.
    async fn list(&self, folder: &str) -> Result<Vec<DocumentRef>>;

    /// Fetch the raw bytes of one listed document.
    async fn fetch(&self, doc: &DocumentRef) -> Result<Vec<u8>>;
}

/// Files under a local directory.
pub struct LocalFolderSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl LocalFolderSource {
    pub fn new(config: &LocalSourceConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    fn folder_path(&self, folder: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(folder)?))
    }
}

#[async_trait]
impl DocumentSource for LocalFolderSource {
    async fn list(&self, folder: &str) -> Result<Vec<DocumentRef>> {
        let base = self.folder_path(folder)?;
        if !base.is_dir() {
            return Err(IndexError::SourceUnavailable(format!(
                "folder does not exist: {}",
                base.display()
            )));
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(&base).follow_links(self.follow_symlinks) {
            let entry = entry.map_err(|e| IndexError::SourceUnavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&base).unwrap_or(entry.path());
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let revision = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

            docs.push(DocumentRef {
                folder: folder.to_string(),
                path: rel_str,
                revision,
            });
        }

        docs.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(folder, count = docs.len(), "listed local folder");
        Ok(docs)
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<Vec<u8>> {
        let path = self.folder_path(&doc.folder)?.join(checked_relative(&doc.path)?);
        tokio::fs::read(&path).await.map_err(|e| {
            IndexError::SourceUnavailable(format!("failed to read {}: {}", path.display(), e))
        })
    }
}

/// Reject absolute paths and `..` so a document can never escape the root.
fn checked_relative(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    for component in p.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(IndexError::invalid(format!(
                    "path must be relative and stay inside the source root: {}",
                    path
                )))
            }
        }
    }
    Ok(p)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::invalid(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::invalid(format!("bad glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> LocalSourceConfig {
        LocalSourceConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.txt".to_string(), "**/*.md".to_string()],
            exclude_globs: vec!["**/skip/**".to_string()],
            follow_symlinks: false,
        }
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let task = tmp.path().join("task-1");
        std::fs::create_dir_all(task.join("nested")).unwrap();
        std::fs::create_dir_all(task.join("skip")).unwrap();
        std::fs::write(task.join("b.txt"), "b").unwrap();
        std::fs::write(task.join("nested/a.md"), "a").unwrap();
        std::fs::write(task.join("skip/c.txt"), "c").unwrap();
        std::fs::write(task.join("image.png"), [0u8; 4]).unwrap();

        let source = LocalFolderSource::new(&config(tmp.path())).unwrap();
        let docs = source.list("task-1").await.unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "nested/a.md"]);
        assert!(docs.iter().all(|d| d.revision.is_some()));

        let bytes = source.fetch(&docs[1]).await.unwrap();
        assert_eq!(bytes, b"a");
    }

    #[tokio::test]
    async fn test_missing_folder_is_source_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let source = LocalFolderSource::new(&config(tmp.path())).unwrap();
        let err = source.list("nope").await.unwrap_err();
        assert!(matches!(err, IndexError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let source = LocalFolderSource::new(&config(tmp.path())).unwrap();
        assert!(matches!(
            source.list("../etc").await.unwrap_err(),
            IndexError::InvalidArgument(_)
        ));

        let doc = DocumentRef {
            folder: String::new(),
            path: "/etc/passwd".to_string(),
            revision: None,
        };
        assert!(matches!(
            source.fetch(&doc).await.unwrap_err(),
            IndexError::InvalidArgument(_)
        ));
    }
}
