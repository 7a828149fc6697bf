use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::IndexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    File,
    Chunk,
    Text,
}

/// One embedded piece of content, persisted as its own JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub kind: RecordKind,
    pub source: String,
    pub content: String,
    pub vector: Vec<f64>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub token_count: usize,
    /// Unix seconds of the source's mtime at ingest time.
    #[serde(default)]
    pub last_updated: u64,
}

/// Cosine similarity, clamped to `[-1, 1]`. Rejects mismatched dimensions
/// and zero-magnitude inputs.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, IndexError> {
    if a.len() != b.len() {
        return Err(IndexError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(IndexError::ZeroMagnitude);
    }

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Keyed store of embedding records with cosine search. Records live in
/// memory and as one JSON file each under `dir`; filenames derive from the
/// record id with reserved characters escaped.
#[derive(Debug)]
pub struct VectorIndex {
    dir: PathBuf,
    records: HashMap<String, EmbeddingRecord>,
    dimension: Option<usize>,
}

impl VectorIndex {
    /// Opens (or creates) the index directory and loads every record.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut index = Self {
            dir,
            records: HashMap::new(),
            dimension: None,
        };
        index.load_all()?;
        Ok(index)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Adds (or re-writes) a record, persisting it before the in-memory
    /// map is updated. The first record fixes the index dimension.
    pub fn add(&mut self, record: EmbeddingRecord) -> Result<(), IndexError> {
        if record.vector.iter().all(|x| *x == 0.0) {
            return Err(IndexError::ZeroMagnitude);
        }
        match self.dimension {
            Some(expected) if expected != record.vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: record.vector.len(),
                })
            }
            None => self.dimension = Some(record.vector.len()),
            _ => {}
        }

        let path = self.record_path(&record.id);
        let file = File::create(&path)?;
        serde_json::to_writer(&file, &record)?;
        file.sync_all()?;

        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&EmbeddingRecord> {
        self.records.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Removes a record and its document. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> Result<bool, IndexError> {
        let existed = self.records.remove(id).is_some();
        if existed {
            std::fs::remove_file(self.record_path(id))?;
        }
        Ok(existed)
    }

    /// Re-reads every document in the directory. Malformed documents are
    /// skipped with a warning, never fatal.
    pub fn load_all(&mut self) -> Result<usize, IndexError> {
        self.records.clear();
        self.dimension = None;

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let record: EmbeddingRecord = match File::open(&path)
                .map_err(IndexError::from)
                .and_then(|f| serde_json::from_reader(BufReader::new(f)).map_err(IndexError::from))
            {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("skipping malformed index document {}: {e}", path.display());
                    continue;
                }
            };

            match self.dimension {
                Some(expected) if expected != record.vector.len() => {
                    log::warn!(
                        "skipping record '{}': dimension {} does not match index dimension {expected}",
                        record.id,
                        record.vector.len()
                    );
                    continue;
                }
                None => self.dimension = Some(record.vector.len()),
                _ => {}
            }

            self.records.insert(record.id.clone(), record);
        }

        Ok(self.records.len())
    }

    /// Top-k cosine search. Results are sorted by score descending and
    /// filtered to `score >= min_sim`.
    pub fn search(
        &self,
        vector: &[f64],
        k: usize,
        min_sim: f64,
    ) -> Result<Vec<(EmbeddingRecord, f64)>, IndexError> {
        if let Some(expected) = self.dimension {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }
        if vector.iter().all(|x| *x == 0.0) {
            return Err(IndexError::ZeroMagnitude);
        }

        let mut scored: Vec<(EmbeddingRecord, f64)> = self
            .records
            .values()
            .filter_map(|record| {
                cosine_similarity(vector, &record.vector)
                    .ok()
                    .filter(|score| *score >= min_sim)
                    .map(|score| (record.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Drops every record and its document.
    pub fn clear(&mut self) -> Result<(), IndexError> {
        let ids: Vec<String> = self.records.keys().cloned().collect();
        for id in ids {
            self.remove(&id)?;
        }
        self.dimension = None;
        Ok(())
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(id)))
    }
}
