//! Knowledge base engine - note store, encoder and ranking wired together
//!
//! Every note write re-encodes the body. When the model cannot be loaded the
//! note is still written without an embedding, and `backfill` fills it in
//! later.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::embedding::Encoder;
use super::graph::{build_graph, GraphOptions, NoteGraph};
use super::keyword;
use super::rank::{self, compare_scored, cosine_with_norm, l2_norm};
use super::vectordb::{IndexStats, VectorDB};
use crate::core::config::{DataPaths, Settings};
use crate::core::error::{Error, Result};
use crate::core::note::{normalize_tags, Note, NoteSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
}

/// One search result. `score` is only set in semantic mode.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub key: String,
    pub title: String,
    pub snippet: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl SearchHit {
    fn from_note(note: &Note, score: Option<f32>) -> Self {
        Self {
            key: note.key.clone(),
            title: note.title(),
            snippet: note.snippet(),
            tags: note.tags.clone(),
            score,
        }
    }
}

/// Outcome of a note write.
#[derive(Debug, Clone, Serialize)]
pub struct StoredNote {
    pub note: Note,
    pub embedded: bool,
    /// Tags added by auto-tagging.
    pub added_tags: Vec<String>,
    /// Why the note has no embedding, when it has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSuggestion {
    pub tag: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub embedded: usize,
    pub failed: usize,
}

pub struct KnowledgeBase {
    db: VectorDB,
    encoder: Arc<dyn Encoder>,
    settings: Settings,
}

impl KnowledgeBase {
    /// Open the on-disk database under `paths`, sized for `encoder`.
    pub fn open(paths: &DataPaths, settings: Settings, encoder: Arc<dyn Encoder>) -> Result<Self> {
        paths.ensure_dirs()?;
        let db = VectorDB::open(&paths.db, encoder.dimensions())?;
        Self::with_db(db, settings, encoder)
    }

    pub fn open_in_memory(settings: Settings, encoder: Arc<dyn Encoder>) -> Result<Self> {
        let db = VectorDB::open_in_memory(encoder.dimensions())?;
        Self::with_db(db, settings, encoder)
    }

    pub fn with_db(db: VectorDB, settings: Settings, encoder: Arc<dyn Encoder>) -> Result<Self> {
        if db.dim() != encoder.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: db.dim(),
                got: encoder.dimensions(),
            });
        }
        Ok(Self {
            db,
            encoder,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn db(&self) -> &VectorDB {
        &self.db
    }

    /// Upsert a note and its embedding.
    ///
    /// With `auto_tag`, tags whose centroid is close to the new embedding are
    /// appended before the write.
    pub fn store_note(
        &self,
        key: &str,
        body: &str,
        tags: &[String],
        auto_tag: bool,
    ) -> Result<StoredNote> {
        let key = validate_key(key)?;
        let mut tags = normalize_tags(tags);

        let (embedding, embedding_error) = match self.encoder.encode(body) {
            Ok(vector) => (Some(vector), None),
            Err(Error::ModelUnavailable(reason)) => {
                warn!(key, reason = %reason, "storing note without embedding");
                (None, Some(reason))
            }
            Err(e) => return Err(e),
        };

        let mut added_tags = Vec::new();
        if auto_tag {
            if let Some(vector) = &embedding {
                for suggestion in self.suggest_for_vector(vector, key, &tags)? {
                    added_tags.push(suggestion.tag.clone());
                    tags.push(suggestion.tag);
                }
            }
        }

        let note = self.db.write_note(key, body, &tags, embedding.as_deref())?;
        info!(key, embedded = embedding.is_some(), added_tags = added_tags.len(), "stored note");

        Ok(StoredNote {
            note,
            embedded: embedding.is_some(),
            added_tags,
            embedding_error,
        })
    }

    /// Delete a note and its embedding. Returns whether the note existed.
    pub fn delete_note(&self, key: &str) -> Result<bool> {
        let existed = self.db.delete_note(key)?;
        debug!(key, existed, "deleted note");
        Ok(existed)
    }

    pub fn get_note(&self, key: &str) -> Result<Note> {
        self.db
            .get_note(key)?
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    pub fn list_notes(&self, tag: Option<&str>) -> Result<Vec<NoteSummary>> {
        self.db.list_summaries(tag)
    }

    /// Search notes. `top_k` is clamped by the search settings.
    ///
    /// In semantic mode a missing model is an error, never an empty result.
    pub fn search_notes(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let limit = self.settings.search.clamp_limit(top_k);
        let started = Instant::now();

        let hits = match mode {
            SearchMode::Keyword => {
                let notes = self.db.list_notes()?;
                keyword::matching(query, &notes)
                    .into_iter()
                    .take(limit)
                    .map(|note| SearchHit::from_note(note, None))
                    .collect::<Vec<_>>()
            }
            SearchMode::Semantic => {
                let query_vector = self.encoder.encode(query)?;
                let candidates = self.db.all()?;
                let ranked = rank::rank(&query_vector, &candidates, limit)?;

                let notes: HashMap<String, Note> = self
                    .db
                    .list_notes()?
                    .into_iter()
                    .map(|n| (n.key.clone(), n))
                    .collect();
                ranked
                    .into_iter()
                    .filter_map(|scored| {
                        notes
                            .get(&scored.key)
                            .map(|note| SearchHit::from_note(note, Some(scored.score)))
                    })
                    .collect()
            }
        };

        debug!(
            ?mode,
            limit,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "searched notes"
        );
        Ok(hits)
    }

    pub fn get_graph(&self, options: &GraphOptions) -> Result<NoteGraph> {
        let notes = self.db.list_notes()?;
        let vectors = self.db.all()?;
        build_graph(&notes, vectors, self.db.dim(), options)
    }

    /// Embed every note that has no valid embedding.
    ///
    /// A failed note is counted and logged; the rest of the batch continues.
    /// A model that cannot load fails the whole call, since no note could
    /// succeed. Running it again after success finds nothing to do.
    pub fn backfill(&self) -> Result<BackfillReport> {
        let pending = self.db.notes_needing_embedding()?;
        let mut report = BackfillReport {
            candidates: pending.len(),
            ..BackfillReport::default()
        };
        if pending.is_empty() {
            info!("backfill: every note already has an embedding");
            return Ok(report);
        }

        for note in &pending {
            let result = self
                .encoder
                .encode(&note.body)
                .and_then(|vector| self.db.put(&note.key, &vector));
            match result {
                Ok(()) => report.embedded += 1,
                Err(e @ Error::ModelUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(key = %note.key, error = %e, "backfill failed for note");
                    report.failed += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            embedded = report.embedded,
            failed = report.failed,
            "backfill finished"
        );
        Ok(report)
    }

    /// Tags from other notes whose centroid is close to this note.
    ///
    /// Uses the stored embedding when there is one, else encodes the body.
    pub fn suggest_tags(&self, key: &str) -> Result<Vec<TagSuggestion>> {
        let note = self.get_note(key)?;
        let vector = match self.db.get(key) {
            Ok(Some(vector)) => vector,
            Ok(None) => self.encoder.encode(&note.body)?,
            Err(Error::CorruptEmbedding { .. }) => self.encoder.encode(&note.body)?,
            Err(e) => return Err(e),
        };
        self.suggest_for_vector(&vector, key, &note.tags)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.db.get_stats()
    }

    fn suggest_for_vector(
        &self,
        vector: &[f32],
        self_key: &str,
        existing: &[String],
    ) -> Result<Vec<TagSuggestion>> {
        let auto = &self.settings.auto_tag;
        if auto.max_tags == 0 {
            return Ok(Vec::new());
        }

        let centroids = self.tag_centroids(self_key)?;
        let norm = l2_norm(vector);
        let mut suggestions: Vec<TagSuggestion> = centroids
            .into_iter()
            .filter(|(tag, _)| !existing.iter().any(|t| t == tag))
            .map(|(tag, centroid)| TagSuggestion {
                score: cosine_with_norm(vector, norm, &centroid),
                tag,
            })
            .filter(|s| s.score >= auto.threshold)
            .collect();

        suggestions.sort_by(|a, b| compare_scored(a.score, &a.tag, b.score, &b.tag));
        suggestions.truncate(auto.max_tags);
        Ok(suggestions)
    }

    /// Normalized mean embedding per tag, over every embedded note but one.
    fn tag_centroids(&self, exclude_key: &str) -> Result<BTreeMap<String, Vec<f32>>> {
        let dim = self.db.dim();
        let vectors: HashMap<String, Vec<f32>> = self.db.all()?.into_iter().collect();

        let mut sums: BTreeMap<String, (Vec<f64>, usize)> = BTreeMap::new();
        for note in self.db.list_notes()? {
            if note.key == exclude_key {
                continue;
            }
            let Some(vector) = vectors.get(&note.key) else {
                continue;
            };
            for tag in &note.tags {
                if self.settings.auto_tag.skip.contains(tag) {
                    continue;
                }
                let (sum, count) = sums
                    .entry(tag.clone())
                    .or_insert_with(|| (vec![0.0; dim], 0));
                for (acc, x) in sum.iter_mut().zip(vector) {
                    *acc += *x as f64;
                }
                *count += 1;
            }
        }

        Ok(sums
            .into_iter()
            .map(|(tag, (sum, count))| {
                let mean: Vec<f64> = sum.iter().map(|x| x / count as f64).collect();
                let norm = mean.iter().map(|x| x * x).sum::<f64>().sqrt();
                let centroid = if norm > 0.0 {
                    mean.iter().map(|x| (x / norm) as f32).collect()
                } else {
                    vec![0.0; dim]
                };
                (tag, centroid)
            })
            .collect())
    }
}

/// Keys are opaque: a blank key is rejected, anything else is kept as given.
fn validate_key(key: &str) -> Result<&str> {
    if key.trim().is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Settings;

    /// Maps each known text to a fixed vector; anything else encodes to zero.
    struct TableEncoder {
        dim: usize,
        table: HashMap<String, Vec<f32>>,
    }

    impl TableEncoder {
        fn new(dim: usize, entries: &[(&str, &[f32])]) -> Arc<Self> {
            Arc::new(Self {
                dim,
                table: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.to_vec()))
                    .collect(),
            })
        }
    }

    impl Encoder for TableEncoder {
        fn dimensions(&self) -> usize {
            self.dim
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0; self.dim]))
        }
    }

    struct UnavailableEncoder;

    impl Encoder for UnavailableEncoder {
        fn dimensions(&self) -> usize {
            2
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::ModelUnavailable("no weights".to_string()))
        }
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn kb(encoder: Arc<dyn Encoder>) -> KnowledgeBase {
        KnowledgeBase::open_in_memory(Settings::default(), encoder).unwrap()
    }

    #[test]
    fn test_store_and_get() -> Result<()> {
        let kb = kb(TableEncoder::new(2, &[("alpha", &[1.0, 0.0])]));
        let stored = kb.store_note("a", "alpha", &tags(&["x", " x ", ""]), false)?;

        assert!(stored.embedded);
        assert_eq!(stored.note.tags, tags(&["x"]));
        assert_eq!(kb.get_note("a")?.body, "alpha");
        assert_eq!(kb.db().get("a")?, Some(vec![1.0, 0.0]));
        Ok(())
    }

    #[test]
    fn test_empty_key_rejected() {
        let kb = kb(TableEncoder::new(2, &[]));
        assert!(matches!(
            kb.store_note("  ", "body", &[], false),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_keys_are_stored_verbatim() -> Result<()> {
        let kb = kb(TableEncoder::new(2, &[]));
        let stored = kb.store_note(" notes/a ", "padded", &[], false)?;
        assert_eq!(stored.note.key, " notes/a ");
        assert_eq!(kb.get_note(" notes/a ")?.body, "padded");
        assert!(matches!(kb.get_note("notes/a"), Err(Error::KeyNotFound(_))));

        kb.store_note("x", "first", &[], false)?;
        kb.store_note("x ", "second", &[], false)?;
        assert_eq!(kb.get_note("x")?.body, "first");
        assert_eq!(kb.get_note("x ")?.body, "second");

        assert!(kb.delete_note(" notes/a ")?);
        assert!(matches!(kb.get_note(" notes/a "), Err(Error::KeyNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_get_missing_is_key_not_found() {
        let kb = kb(TableEncoder::new(2, &[]));
        assert!(matches!(kb.get_note("nope"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_semantic_search_ranks_by_similarity() -> Result<()> {
        let kb = kb(TableEncoder::new(
            2,
            &[
                ("rust ownership", &[1.0, 0.0]),
                ("python typing", &[0.0, 1.0]),
                ("rust lifetimes", &[0.9, 0.1]),
                ("borrow checker", &[1.0, 0.05]),
            ],
        ));
        kb.store_note("own", "rust ownership", &[], false)?;
        kb.store_note("py", "python typing", &[], false)?;
        kb.store_note("life", "rust lifetimes", &[], false)?;

        let hits = kb.search_notes("borrow checker", SearchMode::Semantic, Some(2))?;
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["own", "life"]);
        assert!(hits.iter().all(|h| h.score.is_some()));
        Ok(())
    }

    #[test]
    fn test_keyword_search_has_no_scores() -> Result<()> {
        let kb = kb(TableEncoder::new(2, &[]));
        kb.store_note("a", "Tokio runtime notes", &[], false)?;
        kb.store_note("b", "unrelated", &[], false)?;

        let hits = kb.search_notes("tokio", SearchMode::Keyword, None)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
        assert!(hits[0].score.is_none());
        Ok(())
    }

    #[test]
    fn test_model_unavailable_surfaces_and_note_is_kept() -> Result<()> {
        let kb = kb(Arc::new(UnavailableEncoder));
        let stored = kb.store_note("a", "some body", &[], true)?;
        assert!(!stored.embedded);
        assert_eq!(stored.embedding_error.as_deref(), Some("no weights"));

        let err = kb
            .search_notes("some", SearchMode::Semantic, None)
            .unwrap_err();
        assert!(err.is_model_unavailable());

        assert_eq!(kb.search_notes("some", SearchMode::Keyword, None)?.len(), 1);
        assert!(kb.backfill().unwrap_err().is_model_unavailable());
        Ok(())
    }

    #[test]
    fn test_backfill_is_idempotent() -> Result<()> {
        let encoder = TableEncoder::new(2, &[("one", &[1.0, 0.0]), ("two", &[0.0, 1.0])]);
        let db = VectorDB::open_in_memory(2)?;
        db.write_note("n1", "one", &[], None)?;
        db.write_note("n2", "two", &[], None)?;
        db.write_note("n3", "one", &[], Some(&[1.0, 0.0]))?;
        let kb = KnowledgeBase::with_db(db, Settings::default(), encoder)?;

        let first = kb.backfill()?;
        assert_eq!(
            first,
            BackfillReport {
                candidates: 2,
                embedded: 2,
                failed: 0
            }
        );
        assert_eq!(kb.db().get("n2")?, Some(vec![0.0, 1.0]));

        let second = kb.backfill()?;
        assert_eq!(second, BackfillReport::default());
        Ok(())
    }

    #[test]
    fn test_backfill_isolates_failed_note() -> Result<()> {
        // "bad" encodes to the wrong width, so its put fails
        let encoder = TableEncoder::new(
            2,
            &[("one", &[1.0, 0.0]), ("bad", &[1.0, 0.0, 0.0]), ("two", &[0.0, 1.0])],
        );
        let db = VectorDB::open_in_memory(2)?;
        db.write_note("n1", "one", &[], None)?;
        db.write_note("n2", "bad", &[], None)?;
        db.write_note("n3", "two", &[], None)?;
        let kb = KnowledgeBase::with_db(db, Settings::default(), encoder)?;

        let first = kb.backfill()?;
        assert_eq!(
            first,
            BackfillReport {
                candidates: 3,
                embedded: 2,
                failed: 1
            }
        );
        assert_eq!(kb.db().get("n1")?, Some(vec![1.0, 0.0]));
        assert_eq!(kb.db().get("n2")?, None);
        assert_eq!(kb.db().get("n3")?, Some(vec![0.0, 1.0]));

        let second = kb.backfill()?;
        assert_eq!(
            second,
            BackfillReport {
                candidates: 1,
                embedded: 0,
                failed: 1
            }
        );
        Ok(())
    }

    #[test]
    fn test_keyword_search_long_query() -> Result<()> {
        let kb = kb(TableEncoder::new(2, &[]));
        kb.store_note("long", &"é".repeat(200_000), &[], false)?;
        kb.store_note("short", "é", &[], false)?;

        let hits = kb.search_notes(&"É".repeat(100_000), SearchMode::Keyword, None)?;
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["long"]);
        Ok(())
    }

    #[test]
    fn test_backfill_repairs_corrupt_embedding() -> Result<()> {
        let encoder = TableEncoder::new(2, &[("body", &[0.6, 0.8])]);
        let db = VectorDB::open_in_memory(2)?;
        db.write_note("k", "body", &[], None)?;
        db.put_raw_blob("k", &[1, 2, 3])?;
        let kb = KnowledgeBase::with_db(db, Settings::default(), encoder)?;

        assert_eq!(kb.backfill()?.embedded, 1);
        assert_eq!(kb.db().get("k")?, Some(vec![0.6, 0.8]));
        Ok(())
    }

    #[test]
    fn test_encoder_dimension_must_match_store() -> Result<()> {
        let db = VectorDB::open_in_memory(4)?;
        let err = KnowledgeBase::with_db(db, Settings::default(), TableEncoder::new(2, &[]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, got: 2 }));
        Ok(())
    }

    #[test]
    fn test_suggest_tags_uses_centroids() -> Result<()> {
        let kb = kb(TableEncoder::new(
            2,
            &[
                ("rust a", &[1.0, 0.0]),
                ("rust b", &[0.95, 0.05]),
                ("cooking", &[0.0, 1.0]),
                ("chat log", &[0.99, 0.01]),
                ("new rust", &[1.0, 0.02]),
            ],
        ));
        kb.store_note("r1", "rust a", &tags(&["rust"]), false)?;
        kb.store_note("r2", "rust b", &tags(&["rust", "lang"]), false)?;
        kb.store_note("c", "cooking", &tags(&["food"]), false)?;
        kb.store_note("chat", "chat log", &tags(&["conversation"]), false)?;
        kb.store_note("target", "new rust", &tags(&["lang"]), false)?;

        let suggested: Vec<_> = kb
            .suggest_tags("target")?
            .into_iter()
            .map(|s| s.tag)
            .collect();
        assert_eq!(suggested, vec!["rust"]);
        Ok(())
    }

    #[test]
    fn test_auto_tag_on_store() -> Result<()> {
        let kb = kb(TableEncoder::new(
            2,
            &[("seed", &[1.0, 0.0]), ("similar", &[0.9, 0.1])],
        ));
        kb.store_note("seed", "seed", &tags(&["topic"]), false)?;

        let stored = kb.store_note("new", "similar", &[], true)?;
        assert_eq!(stored.added_tags, tags(&["topic"]));
        assert_eq!(kb.get_note("new")?.tags, tags(&["topic"]));
        Ok(())
    }

    #[test]
    fn test_graph_and_delete() -> Result<()> {
        let kb = kb(TableEncoder::new(
            2,
            &[
                ("one", &[1.0, 0.0]),
                ("two", &[0.0, 1.0]),
                ("three", &[0.9, 0.1]),
            ],
        ));
        kb.store_note("note1", "one", &[], false)?;
        kb.store_note("note2", "two", &[], false)?;
        kb.store_note("note3", "three", &[], false)?;

        let graph = kb.get_graph(&GraphOptions::new(1))?;
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);

        assert!(kb.delete_note("note3")?);
        assert!(!kb.delete_note("note3")?);
        let graph = kb.get_graph(&GraphOptions::new(1))?;
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        Ok(())
    }
}
