//! Vector similarity for long-term memory retrieval.

use switchboard_core::memory::{LongTermEntry, MemorySnippet};

/// Cosine similarity in `[-1, 1]`.
///
/// Mismatched lengths, empty vectors and zero vectors all score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) =
        a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, na, nb), (x, y)| {
            let (x, y) = (*x as f64, *y as f64);
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank entries against a query embedding.
///
/// Keeps entries scoring at least `threshold`, sorted by descending
/// similarity (ties keep insertion order), at most `limit`. Entries
/// without an embedding never match.
pub fn rank_by_similarity(
    entries: &[LongTermEntry],
    query: &[f32],
    limit: usize,
    threshold: f32,
) -> Vec<MemorySnippet> {
    let mut scored: Vec<MemorySnippet> = entries
        .iter()
        .filter(|e| !e.embedding.is_empty())
        .filter_map(|e| {
            let similarity = cosine_similarity(&e.embedding, query);
            (similarity >= threshold).then(|| MemorySnippet {
                id: e.id.clone(),
                content: e.content.clone(),
                similarity,
                importance: e.importance,
                metadata: e.metadata.clone(),
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal)
    });

    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, embedding: Vec<f32>) -> LongTermEntry {
        LongTermEntry {
            id: id.into(),
            content: format!("Content for {id}"),
            importance: 0.5,
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
            embedding,
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // 1 / sqrt(2)
        assert!((cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]) - 0.7071).abs() < 0.001);
    }

    #[test]
    fn ranks_descending_above_threshold() {
        let entries = vec![
            entry("orthogonal", vec![0.0, 1.0, 0.0]),
            entry("identical", vec![1.0, 0.0, 0.0]),
            entry("partial", vec![0.5, 0.5, 0.0]),
            entry("unembedded", vec![]),
        ];
        let results = rank_by_similarity(&entries, &[1.0, 0.0, 0.0], 10, 0.5);
        let ids: Vec<_> = results.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["identical", "partial"]);
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[test]
    fn respects_limit() {
        let entries: Vec<_> = (0..10)
            .map(|i| entry(&format!("e{i}"), vec![1.0, i as f32 * 0.1]))
            .collect();
        assert_eq!(rank_by_similarity(&entries, &[1.0, 0.0], 3, 0.0).len(), 3);
    }
}
