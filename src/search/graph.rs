//! Nearest-neighbour similarity graph over all stored embeddings.
//!
//! Every node is compared with every other node: O(n²) cosine evaluations of
//! O(dim) each. This is meant for visualization of up to a few thousand notes;
//! there is no approximate index. Past [`LARGE_GRAPH_NODES`] a warning is
//! logged, and callers should pass a deadline or cancel flag.
//!
//! Rows are scored in parallel. Each row only reads the shared vectors and
//! writes its own neighbour list.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use super::rank::{compare_scored, cosine_with_norm, l2_norm};
use crate::core::error::{Error, Result};
use crate::core::note::Note;

/// Node count above which a build is logged as expensive.
pub const LARGE_GRAPH_NODES: usize = 2000;

#[derive(Debug, Clone, Default)]
pub struct GraphOptions {
    pub neighbors_per_node: usize,
    pub deadline: Option<Instant>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl GraphOptions {
    pub fn new(neighbors_per_node: usize) -> Self {
        Self {
            neighbors_per_node,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn should_stop(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub key: String,
    pub title: String,
    pub tags: Vec<String>,
    pub snippet: String,
    pub body_length: usize,
    pub has_embedding: bool,
}

/// Undirected edge; `source < target` lexicographically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Build the graph for `notes` from their stored `vectors`.
///
/// All notes become nodes. Only notes with a vector of length `dim` get edges;
/// other vectors, and vectors whose key has no note, are logged and skipped.
pub fn build_graph(
    notes: &[Note],
    vectors: Vec<(String, Vec<f32>)>,
    dim: usize,
    options: &GraphOptions,
) -> Result<NoteGraph> {
    let known: HashSet<&str> = notes.iter().map(|n| n.key.as_str()).collect();
    let vectors: Vec<(String, Vec<f32>)> = vectors
        .into_iter()
        .filter(|(key, _)| {
            let keep = known.contains(key.as_str());
            if !keep {
                warn!(key = %key, "embedding has no note; left out of graph");
            }
            keep
        })
        .collect();

    let edges = build_edges(vectors.as_slice(), dim, options)?;
    let embedded: HashSet<&str> = vectors
        .iter()
        .filter(|(_, v)| v.len() == dim)
        .map(|(k, _)| k.as_str())
        .collect();

    let nodes = notes
        .iter()
        .map(|note| GraphNode {
            key: note.key.clone(),
            title: note.title(),
            tags: note.tags.clone(),
            snippet: note.snippet(),
            body_length: note.body_length(),
            has_embedding: embedded.contains(note.key.as_str()),
        })
        .collect();

    Ok(NoteGraph { nodes, edges })
}

/// Top-k neighbour edges, deduplicated and sorted by `(source, target)`.
///
/// When two nodes select each other the edge appears once, keeping the larger
/// of the two directional scores (they are equal for cosine similarity).
pub fn build_edges(
    vectors: &[(String, Vec<f32>)],
    dim: usize,
    options: &GraphOptions,
) -> Result<Vec<GraphEdge>> {
    let started = Instant::now();

    let mut entries: Vec<(&str, &[f32])> = Vec::with_capacity(vectors.len());
    for (key, vector) in vectors {
        if vector.len() != dim {
            warn!(key = %key, expected = dim, got = vector.len(), "skipping vector with wrong dimension");
            continue;
        }
        entries.push((key.as_str(), vector.as_slice()));
    }
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let n = entries.len();
    let k = options.neighbors_per_node;
    if n < 2 || k == 0 {
        return Ok(Vec::new());
    }
    if n > LARGE_GRAPH_NODES {
        warn!(nodes = n, "building a quadratic similarity graph over many notes");
    }

    let norms: Vec<f64> = entries.iter().map(|(_, v)| l2_norm(v)).collect();
    let rows_done = AtomicUsize::new(0);

    let rows: Vec<Option<Vec<(usize, f32)>>> = (0..n)
        .into_par_iter()
        .map(|i| {
            if options.should_stop() {
                return None;
            }
            let vec_i = entries[i].1;
            let mut scored: Vec<(usize, f32)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, cosine_with_norm(vec_i, norms[i], entries[j].1)))
                .collect();
            scored.sort_by(|a, b| compare_scored(a.1, entries[a.0].0, b.1, entries[b.0].0));
            scored.truncate(k);
            rows_done.fetch_add(1, Ordering::Relaxed);
            Some(scored)
        })
        .collect();

    if rows.iter().any(Option::is_none) {
        let done = rows_done.load(Ordering::Relaxed);
        warn!(rows_done = done, rows_total = n, "graph build cancelled");
        return Err(Error::GraphCancelled {
            rows_done: done,
            rows_total: n,
        });
    }

    let mut unique: BTreeMap<(&str, &str), f32> = BTreeMap::new();
    for (i, row) in rows.into_iter().flatten().enumerate() {
        for (j, similarity) in row {
            let (a, b) = (entries[i].0, entries[j].0);
            let pair = if a < b { (a, b) } else { (b, a) };
            unique
                .entry(pair)
                .and_modify(|s| *s = s.max(similarity))
                .or_insert(similarity);
        }
    }

    let edges: Vec<GraphEdge> = unique
        .into_iter()
        .map(|((source, target), similarity)| GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            similarity,
        })
        .collect();

    info!(
        nodes = n,
        edges = edges.len(),
        neighbors_per_node = k,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "built similarity graph"
    );
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn vectors(items: &[(&str, &[f32])]) -> Vec<(String, Vec<f32>)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    fn note(key: &str, body: &str) -> Note {
        let now = Utc::now();
        Note {
            key: key.to_string(),
            body: body.to_string(),
            tags: vec!["t".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_three_note_scenario() {
        let vecs = vectors(&[
            ("note1", &[1.0, 0.0]),
            ("note2", &[0.0, 1.0]),
            ("note3", &[0.9, 0.1]),
        ]);
        let edges = build_edges(&vecs, 2, &GraphOptions::new(1)).unwrap();

        assert_eq!(edges.len(), 2);
        assert_eq!((edges[0].source.as_str(), edges[0].target.as_str()), ("note1", "note3"));
        let expected = 0.9 / (0.82f64).sqrt();
        assert!((edges[0].similarity as f64 - expected).abs() < 1e-5);

        assert_eq!((edges[1].source.as_str(), edges[1].target.as_str()), ("note2", "note3"));
        assert!(edges[1].similarity < edges[0].similarity);
    }

    #[test]
    fn test_mutual_neighbors_produce_one_edge() {
        let vecs = vectors(&[("a", &[1.0, 0.0]), ("b", &[1.0, 0.01])]);
        let edges = build_edges(&vecs, 2, &GraphOptions::new(1)).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source, "a");
        assert_eq!(edges[0].target, "b");
    }

    #[test]
    fn test_tie_breaks_by_key() {
        // "x" is orthogonal to both others; both score 0.0, so "a" wins.
        let vecs = vectors(&[("x", &[0.0, 1.0]), ("b", &[1.0, 0.0]), ("a", &[1.0, 0.0])]);
        let edges = build_edges(&vecs, 2, &GraphOptions::new(1)).unwrap();
        let pairs: Vec<_> = edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "x")]);
    }

    #[test]
    fn test_edges_sorted_and_bounded() {
        let vecs: Vec<(String, Vec<f32>)> = (0..20)
            .map(|i| {
                let angle = i as f32 * 0.3;
                (format!("n{:02}", 19 - i), vec![angle.cos(), angle.sin(), 0.5])
            })
            .collect();
        let k = 3;
        let edges = build_edges(&vecs, 3, &GraphOptions::new(k)).unwrap();

        assert!(edges.len() <= 20 * k);
        assert!(edges.len() >= 20 * k / 2);
        assert!(edges.iter().all(|e| e.source < e.target));
        assert!(edges
            .windows(2)
            .all(|w| (&w[0].source, &w[0].target) < (&w[1].source, &w[1].target)));
        assert!(edges.iter().all(|e| (-1.0..=1.0).contains(&e.similarity)));
    }

    #[test]
    fn test_k_larger_than_graph_yields_complete_graph() {
        let vecs = vectors(&[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0]), ("c", &[1.0, 1.0])]);
        let edges = build_edges(&vecs, 2, &GraphOptions::new(10)).unwrap();
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(build_edges(&[], 2, &GraphOptions::new(3)).unwrap().is_empty());
        let one = vectors(&[("a", &[1.0, 0.0])]);
        assert!(build_edges(&one, 2, &GraphOptions::new(3)).unwrap().is_empty());
        let two = vectors(&[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0])]);
        assert!(build_edges(&two, 2, &GraphOptions::new(0)).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_dimension_vector_is_skipped() {
        let vecs = vectors(&[("a", &[1.0, 0.0]), ("b", &[1.0, 0.0, 0.0]), ("c", &[0.5, 0.5])]);
        let edges = build_edges(&vecs, 2, &GraphOptions::new(2)).unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges.iter().all(|e| e.source != "b" && e.target != "b"));
    }

    #[test]
    fn test_cancel_flag_stops_build() {
        let vecs = vectors(&[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0])]);
        let flag = Arc::new(AtomicBool::new(true));
        let err = build_edges(&vecs, 2, &GraphOptions::new(1).with_cancel_flag(flag)).unwrap_err();
        assert!(matches!(err, Error::GraphCancelled { rows_total: 2, .. }));
    }

    #[test]
    fn test_expired_deadline_stops_build() {
        let vecs = vectors(&[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0])]);
        let options = GraphOptions {
            neighbors_per_node: 1,
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            cancel: None,
        };
        assert!(matches!(
            build_edges(&vecs, 2, &options),
            Err(Error::GraphCancelled { .. })
        ));
    }

    #[test]
    fn test_graph_includes_unembedded_notes_as_isolated_nodes() {
        let notes = vec![
            note("a", "# Alpha\nfirst"),
            note("b", "Beta"),
            note("c", "Gamma, never embedded"),
        ];
        let vecs = vectors(&[("a", &[1.0, 0.0]), ("b", &[0.8, 0.2]), ("orphan", &[1.0, 0.0])]);
        let graph = build_graph(&notes, vecs, 2, &GraphOptions::new(3)).unwrap();

        assert_eq!(graph.nodes.len(), 3);
        let c = graph.nodes.iter().find(|n| n.key == "c").unwrap();
        assert!(!c.has_embedding);
        assert_eq!(graph.nodes.iter().find(|n| n.key == "a").unwrap().title, "Alpha");

        assert_eq!(graph.edges.len(), 1);
        assert!(graph
            .edges
            .iter()
            .all(|e| e.source != "c" && e.target != "c" && e.target != "orphan"));
    }
}
