//! Loading source documents from disk.
//!
//! Two layouts are understood: a directory tree of `.txt` files (one document
//! per file, the path relative to the root is the source id) and a JSON lines
//! file of `{id?, title?, text, metadata?}` records.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunking::SourceDocument;
use crate::types::Meta;

#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    text: String,
    #[serde(default)]
    metadata: Meta,
}

#[derive(Debug, Default)]
pub struct DataProcessor {
    limit: Option<usize>,
}

impl DataProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops after `limit` documents.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }

    /// Directory of `.txt` files or a `.jsonl` file.
    pub fn load(&self, path: &Path) -> Result<Vec<SourceDocument>> {
        if path.is_dir() {
            self.load_directory(path)
        } else {
            self.load_jsonl(path)
        }
    }

    pub fn load_directory(&self, data_dir: &Path) -> Result<Vec<SourceDocument>> {
        let mut files = self.list_txt_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        if let Some(limit) = self.limit {
            if files.len() > limit {
                files.truncate(limit);
                info!(limit, "limited to first files");
            }
        }
        let mut documents = Vec::with_capacity(files.len());
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(n = file_index + 1, total = files.len(), file = %file_path.display(), "reading");
            let text = self.read_file_content(file_path)?;
            let relative = file_path.strip_prefix(data_dir).unwrap_or(file_path);
            let title = file_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            documents.push(SourceDocument::new(
                relative.to_string_lossy().to_string(),
                title,
                text,
            ));
        }
        info!(files = documents.len(), "loaded documents");
        Ok(documents)
    }

    pub fn load_jsonl(&self, path: &Path) -> Result<Vec<SourceDocument>> {
        let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut documents = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            if self.limit.is_some_and(|l| documents.len() >= l) {
                break;
            }
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JsonRecord = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
            let source_id = record.id.unwrap_or_else(|| line_no.to_string());
            documents.push(SourceDocument {
                title: record.title.unwrap_or_else(|| source_id.clone()),
                source_id,
                text: record.text,
                metadata: record.metadata,
                included_metadata: Vec::new(),
            });
        }
        info!(records = documents.len(), file = %path.display(), "loaded documents");
        Ok(documents)
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
            .collect();
        txt_files.sort();
        txt_files
    }
}
