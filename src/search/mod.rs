//! Semantic retrieval: encoder, vector store, ranker, keyword fallback and
//! the similarity graph.

pub mod embedding;
pub mod engine;
pub mod graph;
pub mod keyword;
pub mod rank;
pub mod vectordb;

pub use embedding::{Encoder, HarmonicEncoder, LazyEncoder};
pub use engine::{BackfillReport, KnowledgeBase, SearchHit, SearchMode, StoredNote, TagSuggestion};
pub use graph::{GraphEdge, GraphNode, GraphOptions, NoteGraph};
pub use rank::{cosine_similarity, rank, ScoredKey};
pub use vectordb::{IndexStats, VectorDB};
