//! Job model: one document to generate, and its coarse progress marker.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::job::MIN_TARGET_LENGTH;

use super::error::{Result, ScribeError};

/// Type-safe wrapper for Job IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Language
// =============================================================================

/// Supported output languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    De,
    Fr,
    Es,
    It,
    Pl,
    Nl,
    Pt,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::En,
        Language::De,
        Language::Fr,
        Language::Es,
        Language::It,
        Language::Pl,
        Language::Nl,
        Language::Pt,
    ];

    /// ISO 639-1 code, also used as the search `hl` hint
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::De => "de",
            Self::Fr => "fr",
            Self::Es => "es",
            Self::It => "it",
            Self::Pl => "pl",
            Self::Nl => "nl",
            Self::Pt => "pt",
        }
    }

    /// English name used inside prompts
    pub fn name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::De => "German",
            Self::Fr => "French",
            Self::Es => "Spanish",
            Self::It => "Italian",
            Self::Pl => "Polish",
            Self::Nl => "Dutch",
            Self::Pt => "Portuguese",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.code() == lower)
            .ok_or_else(|| {
                format!(
                    "Unsupported language: {}. Valid values: en, de, fr, es, it, pl, nl, pt",
                    s
                )
            })
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Document category with an optional custom label ("other: white paper")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKind {
    pub category: String,
    #[serde(default)]
    pub custom_label: Option<String>,
}

impl DocumentKind {
    /// Label used in prompts; the custom label wins when present
    pub fn label(&self) -> &str {
        self.custom_label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.category)
    }
}

impl Default for DocumentKind {
    fn default() -> Self {
        Self {
            category: "article".to_string(),
            custom_label: None,
        }
    }
}

/// Required SEO link: the exact URL must appear behind the exact anchor text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoLink {
    pub url: String,
    pub anchor: String,
}

/// User-supplied reference material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserSource {
    /// Web page fetched through the scrape service
    Url { url: String },
    /// Uploaded document, referenced by its storage key
    Document { reference: String },
}

impl UserSource {
    /// Human-readable origin recorded on the candidate
    pub fn origin(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Document { reference } => format!("document:{}", reference),
        }
    }
}

// =============================================================================
// Progress & Status
// =============================================================================

/// Coarse progress marker polled by external observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Progress {
    Query,
    Search,
    ScrapingAll,
    Selecting,
    Writing,
    Completed,
    Error,
}

impl Progress {
    /// Position in the forward order; `Error` sits outside it
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Query => Some(0),
            Self::Search => Some(1),
            Self::ScrapingAll => Some(2),
            Self::Selecting => Some(3),
            Self::Writing => Some(4),
            Self::Completed => Some(5),
            Self::Error => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Forward-only transitions; `Error` is reachable from any non-terminal state
    pub fn can_advance_to(&self, next: Progress) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(target)) => target >= current,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Search => "search",
            Self::ScrapingAll => "scraping-all",
            Self::Selecting => "selecting",
            Self::Writing => "writing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Progress {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "search" => Ok(Self::Search),
            "scraping-all" => Ok(Self::ScrapingAll),
            "selecting" => Ok(Self::Selecting),
            "writing" => Ok(Self::Writing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown progress marker: {}", s)),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Pending Jobs start; failed Jobs may be retried by hand
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// One document to generate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Parent order; Jobs of one order run sequentially
    #[serde(default)]
    pub order_id: Option<String>,
    pub topic: String,
    /// Target length in characters
    pub target_length: u32,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub kind: DocumentKind,
    #[serde(default)]
    pub guidelines: String,
    #[serde(default)]
    pub seo_keywords: Vec<String>,
    #[serde(default)]
    pub seo_links: Vec<SeoLink>,
    #[serde(default)]
    pub user_sources: Vec<UserSource>,
}

impl Job {
    pub fn new(topic: impl Into<String>, target_length: u32, language: Language) -> Self {
        Self {
            id: JobId::generate(),
            order_id: None,
            topic: topic.into(),
            target_length,
            language,
            kind: DocumentKind::default(),
            guidelines: String::new(),
            seo_keywords: Vec::new(),
            seo_links: Vec::new(),
            user_sources: Vec::new(),
        }
    }

    /// Reject inputs the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(ScribeError::InvalidJob("topic must not be empty".to_string()));
        }
        if self.target_length < MIN_TARGET_LENGTH {
            return Err(ScribeError::InvalidJob(format!(
                "target length must be at least {} characters, got {}",
                MIN_TARGET_LENGTH, self.target_length
            )));
        }
        for link in &self.seo_links {
            if url::Url::parse(&link.url).is_err() {
                return Err(ScribeError::InvalidJob(format!(
                    "SEO link is not a valid URL: {}",
                    link.url
                )));
            }
            if link.anchor.trim().is_empty() {
                return Err(ScribeError::InvalidJob(format!(
                    "SEO link {} has an empty anchor",
                    link.url
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        assert!(Progress::Query.can_advance_to(Progress::Search));
        assert!(Progress::Query.can_advance_to(Progress::Writing));
        assert!(Progress::Writing.can_advance_to(Progress::Writing));
        assert!(!Progress::Writing.can_advance_to(Progress::Selecting));
        assert!(!Progress::Completed.can_advance_to(Progress::Error));
    }

    #[test]
    fn test_error_reachable_from_non_terminal() {
        for p in [
            Progress::Query,
            Progress::Search,
            Progress::ScrapingAll,
            Progress::Selecting,
            Progress::Writing,
        ] {
            assert!(p.can_advance_to(Progress::Error));
        }
        assert!(!Progress::Error.can_advance_to(Progress::Writing));
    }

    #[test]
    fn test_progress_wire_format() {
        let json = serde_json::to_string(&Progress::ScrapingAll).unwrap();
        assert_eq!(json, "\"scraping-all\"");
        assert_eq!(
            "scraping-all".parse::<Progress>().unwrap(),
            Progress::ScrapingAll
        );
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("DE".parse::<Language>().unwrap(), Language::De);
        assert!("xx".parse::<Language>().is_err());
        assert_eq!(Language::ALL.len(), 8);
    }

    #[test]
    fn test_job_validation() {
        let mut job = Job::new("Solar roofs", 1_500, Language::En);
        assert!(job.validate().is_err());

        job.target_length = 2_000;
        assert!(job.validate().is_ok());

        job.seo_links.push(SeoLink {
            url: "not a url".into(),
            anchor: "x".into(),
        });
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_kind_label_prefers_custom() {
        let kind = DocumentKind {
            category: "other".into(),
            custom_label: Some("white paper".into()),
        };
        assert_eq!(kind.label(), "white paper");
        assert_eq!(DocumentKind::default().label(), "article");
    }

    #[test]
    fn test_user_source_tagging() {
        let src: UserSource =
            serde_json::from_str(r#"{"type":"document","reference":"uploads/a.pdf"}"#).unwrap();
        assert_eq!(src.origin(), "document:uploads/a.pdf");
    }
}
