use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref SESSION_PREFIX_RE: Regex = Regex::new(r"^(?i:session)\s*[:\-]\s*").unwrap();
}

const SNIPPET_CHARS: usize = 140;

/// A stored note. `key` is an opaque, path-like identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub key: String,
    pub body: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Note listing row (no body).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteSummary {
    pub key: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn summary(&self) -> NoteSummary {
        NoteSummary {
            key: self.key.clone(),
            tags: self.tags.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Display title taken from the first line of the body.
    ///
    /// Markdown heading markers and a leading `Session:` label are dropped;
    /// `Session on <date> in project: X` lines reduce to `X`.
    pub fn title(&self) -> String {
        let first_line = self.body.lines().next().unwrap_or("").trim();

        if first_line.starts_with('#') {
            let heading = first_line.trim_start_matches('#').trim();
            return SESSION_PREFIX_RE.replace(heading, "").to_string();
        }
        if let Some((_, project)) = first_line.rsplit_once("in project:") {
            return project.trim().to_string();
        }
        if SESSION_PREFIX_RE.is_match(first_line) {
            return SESSION_PREFIX_RE.replace(first_line, "").trim().to_string();
        }

        first_line.to_string()
    }

    /// First 140 characters of the body on a single line.
    pub fn snippet(&self) -> String {
        self.body
            .chars()
            .take(SNIPPET_CHARS)
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect()
    }

    /// Body length in characters.
    pub fn body_length(&self) -> usize {
        self.body.chars().count()
    }
}

/// Parse a comma-separated tag string. Blank entries are dropped.
pub fn parse_tags(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(','))
}

pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
