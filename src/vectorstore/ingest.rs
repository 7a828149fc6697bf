use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use glob::Pattern;
use text_splitter::TextSplitter;

use crate::embedding::Embedder;

use super::{EmbeddingRecord, IndexError, RecordKind, VectorIndex};

const DEFAULT_CHUNK_SIZE: usize = 2000;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Glob patterns a file must match to be indexed.
    pub include: Vec<String>,
    /// Glob patterns that exclude a file even when included.
    pub exclude: Vec<String>,
    /// Files longer than this are split into chunks of roughly this many
    /// characters, on whitespace boundaries.
    pub chunk_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            include: vec!["**/*".to_string()],
            exclude: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Files whose records were written or re-written.
    pub indexed: usize,
    /// Files skipped because their mtime is not newer than the stored
    /// records.
    pub skipped: usize,
    /// Records written in total.
    pub records: usize,
}

/// Walks `sources`, embeds every matching file, and upserts the resulting
/// records. Ids are `file:<path>` for whole files and
/// `file:<path>:chunk:<i>` for chunked ones.
pub async fn ingest(
    index: &mut VectorIndex,
    embedder: &dyn Embedder,
    sources: &[PathBuf],
    options: &IngestOptions,
) -> Result<IngestReport, IndexError> {
    let include = compile_patterns(&options.include)?;
    let exclude = compile_patterns(&options.exclude)?;
    let bpe = tiktoken_rs::cl100k_base().ok();

    let mut report = IngestReport::default();

    for source in sources {
        let mut files = Vec::new();
        collect_files(source, &mut files)?;

        for file in files {
            if !matches(&file, &include) || matches(&file, &exclude) {
                continue;
            }

            let mtime = file_mtime(&file)?;
            let file_key = file.display().to_string();
            let whole_id = format!("file:{file_key}");
            let chunk0_id = format!("file:{file_key}:chunk:0");

            let stored_mtime = index
                .get(&whole_id)
                .or_else(|| index.get(&chunk0_id))
                .map(|record| record.last_updated);
            if stored_mtime.is_some_and(|stored| mtime <= stored) {
                report.skipped += 1;
                continue;
            }

            let content = match std::fs::read_to_string(&file) {
                Ok(content) => content,
                Err(e) => {
                    log::warn!("skipping unreadable file {}: {e}", file.display());
                    continue;
                }
            };

            // Drop stale records for this file before re-writing; the chunk
            // count may have changed.
            for id in index.ids() {
                if id == whole_id || id.starts_with(&format!("{whole_id}:chunk:")) {
                    index.remove(&id)?;
                }
            }

            let chunks: Vec<String> = if content.chars().count() > options.chunk_size {
                TextSplitter::new(options.chunk_size)
                    .chunks(&content)
                    .map(str::to_string)
                    .collect()
            } else {
                vec![content]
            };

            let vectors = embedder.embed_documents(&chunks).await?;
            let chunked = chunks.len() > 1;

            for (i, (chunk, vector)) in chunks.into_iter().zip(vectors).enumerate() {
                let token_count = match &bpe {
                    Some(bpe) => bpe.encode_with_special_tokens(&chunk).len(),
                    None => chunk.len() / 4,
                };

                let record = EmbeddingRecord {
                    id: if chunked {
                        format!("{whole_id}:chunk:{i}")
                    } else {
                        whole_id.clone()
                    },
                    kind: if chunked {
                        RecordKind::Chunk
                    } else {
                        RecordKind::File
                    },
                    source: file_key.clone(),
                    content: chunk,
                    vector,
                    metadata: serde_json::json!({ "chunk": i }),
                    token_count,
                    last_updated: mtime,
                };

                index.add(record)?;
                report.records += 1;
            }

            report.indexed += 1;
        }
    }

    Ok(report)
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, IndexError> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(IndexError::from))
        .collect()
}

fn matches(path: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|pattern| {
        pattern.matches_path(path)
            || path
                .file_name()
                .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
    })
}

fn collect_files(source: &Path, out: &mut Vec<PathBuf>) -> Result<(), IndexError> {
    if source.is_file() {
        out.push(source.to_path_buf());
        return Ok(());
    }
    if !source.is_dir() {
        return Ok(());
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(source)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            collect_files(&entry, out)?;
        } else {
            out.push(entry);
        }
    }

    Ok(())
}

fn file_mtime(path: &Path) -> Result<u64, IndexError> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0))
}
