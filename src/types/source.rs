//! Source material types produced by source acquisition.

use serde::{Deserialize, Serialize};

/// Outcome of fetching one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
}

/// Where a source came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    UserSupplied,
    Discovered,
}

/// One search result as returned by the search service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// One retrieved unit of reference material. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub url: String,
    pub text: String,
    pub length: usize,
    pub status: FetchStatus,
    pub provenance: Provenance,
    /// Why the fetch failed or was discarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SourceCandidate {
    pub fn fetched(url: impl Into<String>, text: String, provenance: Provenance) -> Self {
        let length = text.chars().count();
        Self {
            url: url.into(),
            text,
            length,
            status: FetchStatus::Success,
            provenance,
            note: None,
        }
    }

    pub fn failed(url: impl Into<String>, provenance: Provenance, note: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: String::new(),
            length: 0,
            status: FetchStatus::Failed,
            provenance,
            note: Some(note.into()),
        }
    }

    /// Keep the fetched text but mark it unusable
    pub fn discarded(mut self, note: impl Into<String>) -> Self {
        self.status = FetchStatus::Failed;
        self.note = Some(note.into());
        self
    }

    pub fn is_user_source(&self) -> bool {
        self.provenance == Provenance::UserSupplied
    }

    pub fn is_usable(&self) -> bool {
        self.status == FetchStatus::Success && !self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_counts_chars() {
        let c = SourceCandidate::fetched("https://a.example", "zażółć".into(), Provenance::Discovered);
        assert_eq!(c.length, 6);
        assert!(c.is_usable());
    }

    #[test]
    fn test_discarded_is_not_usable() {
        let c = SourceCandidate::fetched("https://a.example", "text".into(), Provenance::Discovered)
            .discarded("too short");
        assert!(!c.is_usable());
        assert_eq!(c.note.as_deref(), Some("too short"));
    }
}
