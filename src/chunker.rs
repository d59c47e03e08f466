//! Semantic chunking.
//!
//! Documents are split into sentence-like units, each unit is embedded
//! together with its neighbours, and a boundary is cut wherever the cosine
//! distance between adjacent windows rises above a percentile of all
//! distances in the document. Groups are then packed into chunks no longer
//! than the configured maximum.

use crate::config::ChunkingConfig;
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::Result;
use crate::ingest::Document;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::ops::Range;
use std::sync::{Arc, LazyLock};

static UNIT_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+|\n\s*\n").expect("unit boundary pattern"));

/// A contiguous passage of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier derived from the source and ordinal.
    pub id: String,
    pub source: String,
    /// Position of this chunk within its document.
    pub index: usize,
    pub text: String,
}

pub struct SemanticChunker {
    embedder: Arc<dyn Embedder>,
    config: ChunkingConfig,
    batch_size: usize,
}

impl SemanticChunker {
    pub fn new(embedder: Arc<dyn Embedder>, config: ChunkingConfig, batch_size: usize) -> Self {
        Self {
            embedder,
            config,
            batch_size: batch_size.max(1),
        }
    }

    /// Chunk every document, in order. Chunks never span documents.
    pub async fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(self.chunk_document(document).await?);
        }
        tracing::info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "documents chunked"
        );
        Ok(chunks)
    }

    pub async fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>> {
        let text = document.text.as_str();
        let max_chars = self.config.max_chunk_size;

        let units: Vec<Range<usize>> = split_units(text)
            .into_iter()
            .flat_map(|unit| hard_split(text, unit, max_chars))
            .collect();

        if units.is_empty() {
            return Ok(Vec::new());
        }

        let groups = if units.len() == 1 {
            vec![units]
        } else {
            let distances = self.window_distances(text, &units).await?;
            let threshold = percentile(&distances, self.config.breakpoint_percentile);
            group_at_breakpoints(units, &distances, threshold)
        };

        let chunks = groups
            .iter()
            .flat_map(|group| pack(text, group, max_chars))
            .enumerate()
            .map(|(index, range)| Chunk {
                id: chunk_id(&document.source, index),
                source: document.source.clone(),
                index,
                text: text[range].to_string(),
            })
            .collect();

        Ok(chunks)
    }

    /// Cosine distance between each pair of adjacent unit windows.
    async fn window_distances(&self, text: &str, units: &[Range<usize>]) -> Result<Vec<f32>> {
        let buffer = self.config.buffer_size;
        let windows: Vec<String> = (0..units.len())
            .map(|i| {
                let lo = i.saturating_sub(buffer);
                let hi = (i + buffer).min(units.len() - 1);
                units[lo..=hi]
                    .iter()
                    .map(|unit| &text[unit.clone()])
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        let mut embeddings = Vec::with_capacity(windows.len());
        for batch in windows.chunks(self.batch_size) {
            embeddings.extend(self.embedder.embed(batch.to_vec()).await?);
        }

        Ok(embeddings
            .windows(2)
            .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
            .collect())
    }
}

/// Byte ranges of trimmed, non-empty sentence units. Terminal punctuation
/// stays with its sentence.
fn split_units(text: &str) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut start = 0;

    for boundary in UNIT_BOUNDARY.find_iter(text) {
        let end = boundary.start() + boundary.as_str().trim_end().len();
        push_trimmed(text, start..end, &mut units);
        start = boundary.end();
    }
    push_trimmed(text, start..text.len(), &mut units);

    units
}

fn push_trimmed(text: &str, range: Range<usize>, units: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading + trailing < slice.len() {
        units.push(range.start + leading..range.end - trailing);
    }
}

/// Split a unit longer than `max_chars` at whitespace, or at a char boundary
/// when there is none.
fn hard_split(text: &str, unit: Range<usize>, max_chars: usize) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut remaining = unit;

    while text[remaining.clone()].chars().count() > max_chars {
        let slice = &text[remaining.clone()];
        let end = slice
            .char_indices()
            .nth(max_chars)
            .map(|(offset, _)| offset)
            .unwrap_or(slice.len());
        let split_at = slice[..end]
            .rfind(char::is_whitespace)
            .filter(|&offset| offset > 0)
            .unwrap_or(end);

        push_trimmed(text, remaining.start..remaining.start + split_at, &mut pieces);
        let rest = &text[remaining.start + split_at..remaining.end];
        remaining = remaining.end - rest.trim_start().len()..remaining.end;
    }
    push_trimmed(text, remaining, &mut pieces);

    pieces
}

/// Linear-interpolation percentile (`p` in 0..=100). Empty input yields
/// infinity so no boundary is cut.
fn percentile(values: &[f32], p: f32) -> f32 {
    if values.is_empty() {
        return f32::INFINITY;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Cut after unit `i` whenever `distances[i]` exceeds the threshold.
fn group_at_breakpoints(
    units: Vec<Range<usize>>,
    distances: &[f32],
    threshold: f32,
) -> Vec<Vec<Range<usize>>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();

    for (i, unit) in units.into_iter().enumerate() {
        current.push(unit);
        if distances.get(i).is_some_and(|&distance| distance > threshold) {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
}

/// Greedily merge consecutive units into spans of at most `max_chars`.
fn pack(text: &str, group: &[Range<usize>], max_chars: usize) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for unit in group {
        current = match current {
            None => Some(unit.clone()),
            Some(span) if text[span.start..unit.end].chars().count() <= max_chars => {
                Some(span.start..unit.end)
            }
            Some(span) => {
                spans.push(span);
                Some(unit.clone())
            }
        };
    }
    spans.extend(current);

    spans
}

fn chunk_id(source: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(index.to_le_bytes());
    hex::encode(&hasher.finalize()[..16])
}
