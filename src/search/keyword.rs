//! Keyword fallback: case-insensitive substring match, no scoring.

use crate::core::note::Note;

/// Keys of notes whose body, key or tags contain `query`, ignoring case.
///
/// Order is recency: `updated_at` descending, then key ascending.
pub fn search(query: &str, notes: &[Note]) -> Vec<String> {
    matching(query, notes)
        .into_iter()
        .map(|note| note.key.clone())
        .collect()
}

/// Same match as [`search`], returning the notes themselves.
pub fn matching<'a>(query: &str, notes: &'a [Note]) -> Vec<&'a Note> {
    let query_lower = query.to_lowercase();
    let contains = |field: &str| field.to_lowercase().contains(&query_lower);

    let mut hits: Vec<&Note> = notes
        .iter()
        .filter(|note| {
            contains(&note.body) || contains(&note.key) || note.tags.iter().any(|tag| contains(tag))
        })
        .collect();

    hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.key.cmp(&b.key)));
    hits
}
