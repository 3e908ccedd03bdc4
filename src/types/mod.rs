pub mod attempt;
pub mod content;
pub mod error;
pub mod job;
pub mod plan;
pub mod source;

pub use attempt::{FinishSignal, GenerationAttempt, PromptKind, TokenUsage};
pub use content::{EndingReport, JobContent, LinkReport, ScrapedSourceRecord, SourceTrace};
pub use error::{ErrorCategory, ErrorClassifier, LlmError, Result, ResultExt, ScribeError};
pub use job::{
    DocumentKind, Job, JobId, JobStatus, Language, Progress, SeoLink, UserSource,
};
pub use plan::{PlanMode, Section, StructurePlan, WriterAssignment, render_skeleton};
pub use source::{FetchStatus, Provenance, SearchHit, SourceCandidate};
