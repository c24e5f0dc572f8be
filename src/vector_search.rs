//! Cosine similarity and top-k ranking shared by every unit store

use crate::types::{EpisodicUnit, ScoredEpisode};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Cosine similarity over the overlapping prefix of two vectors.
///
/// Empty or all-zero inputs score 0.0 (a zero norm is replaced by 1.0).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let size = a.len().min(b.len());
    let (a, b) = (&a[..size], &b[..size]);

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = nonzero_norm(a);
    let norm_b = nonzero_norm(b);

    let score = dot / (norm_a * norm_b);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

fn nonzero_norm(v: &[f32]) -> f32 {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        norm
    } else {
        1.0
    }
}

/// Score the unexpired units against a query and keep the best `top_k`.
///
/// Ties keep the iteration (insertion) order.
pub fn rank_units<'a, I>(
    units: I,
    query_embedding: &[f32],
    top_k: usize,
    now: DateTime<Utc>,
) -> Vec<ScoredEpisode>
where
    I: IntoIterator<Item = &'a EpisodicUnit>,
{
    let mut scored: Vec<(f32, &EpisodicUnit)> = units
        .into_iter()
        .filter(|unit| !unit.is_expired(now))
        .map(|unit| (cosine_similarity(&unit.embedding, query_embedding), unit))
        .collect();

    // sort_by is stable, which preserves insertion order on equal scores
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.truncate(top_k);

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, unit))| ScoredEpisode {
            unit: unit.clone(),
            score,
            rank: i + 1,
        })
        .collect()
}
