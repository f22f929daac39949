//! Document collaborator seam
//!
//! The pipeline never parses binary formats. A [`DocumentSource`] turns a
//! path into raw text; [`PlainTextSource`] handles UTF-8 text files and
//! rejects everything else.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Parsed document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    /// File name used in constraint sources
    pub name: String,
    pub text: String,
}

impl Document {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            path,
            name,
            text: text.into(),
        }
    }
}

/// Turns a path into raw text
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<Document, PipelineError>;
}

/// Reads UTF-8 text files (`.txt`, `.md`, `.csv`, `.json`, `.toml`)
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSource;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "toml", "log"];

#[async_trait]
impl DocumentSource for PlainTextSource {
    async fn extract_text(&self, path: &Path) -> Result<Document, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(PipelineError::document(
                path,
                format!("unsupported document format '.{ext}'"),
            ));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::document(path, e.to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| PipelineError::document(path, "file is not valid UTF-8"))?;
        Ok(Document::new(path, text))
    }
}

/// Read every path, skipping failures with a warning
pub async fn load_documents(source: &dyn DocumentSource, paths: &[PathBuf]) -> Vec<Document> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        match source.extract_text(path).await {
            Ok(doc) => documents.push(doc),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping document"),
        }
    }
    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.txt");
        std::fs::write(&path, "响应时间应<=100ms").unwrap();

        let doc = PlainTextSource.extract_text(&path).await.unwrap();
        assert_eq!(doc.name, "spec.txt");
        assert!(doc.text.contains("100ms"));
    }

    #[tokio::test]
    async fn rejects_binary_formats() {
        let err = PlainTextSource
            .extract_text(Path::new("/tmp/spec.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Document { .. }));
    }

    #[tokio::test]
    async fn load_documents_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.md");
        std::fs::write(&good, "# 规范").unwrap();
        let paths = vec![good, dir.path().join("missing.txt"), dir.path().join("b.docx")];

        let docs = load_documents(&PlainTextSource, &paths).await;
        assert_eq!(docs.len(), 1);
    }
}
