//! Post-Generation Validation
//!
//! Runs once on the fully assembled document: ending validation first, then
//! SEO link validation with at most one repair pass. Neither step fails the
//! Job on an unsatisfactory result; both are reported in the Job content.

mod ending;
mod links;

pub use ending::{EndingValidator, EndingVerdict, apply_trim, ending_prompt};
pub use links::{LinkValidator, count_link, dedupe_links, missing_links, repair_prompt};

use tracing::instrument;

use crate::ai::{ModelClient, TokenCeiling};
use crate::config::GenerationConfig;
use crate::document::ensure_closed;
use crate::types::{EndingReport, Job, LinkReport, Result};

#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    pub text: String,
    pub ending: EndingReport,
    pub links: LinkReport,
}

pub struct PostValidator {
    ending: EndingValidator,
    links: LinkValidator,
}

impl PostValidator {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            ending: EndingValidator::new(config.ending_window_chars),
            links: LinkValidator::new(TokenCeiling::from(config)),
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn validate(&self, client: &ModelClient, job: &Job, doc: &str) -> Result<ValidatedDocument> {
        let (text, ending) = self.ending.validate(client, job, doc).await?;
        let (text, links) = self.links.validate(client, job, &text).await?;

        // A repaired document must still end on a closed block
        let (closed, changed) = ensure_closed(&text);
        let text = if changed { closed } else { text };

        Ok(ValidatedDocument { text, ending, links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ends_cleanly;
    use crate::testing::{ScriptedProvider, test_client};
    use crate::types::{Language, PromptKind, SeoLink};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_validate_runs_both_checks() {
        let provider = Arc::new(ScriptedProvider::new());
        let client = test_client(provider.clone());
        let mut job = Job::new("Compost", 2_000, Language::En);
        job.seo_links = vec![SeoLink {
            url: "https://bins.example/".into(),
            anchor: "compost bins".into(),
        }];
        let doc = "<h2>Basics</h2><p>Compost needs air and water. Turn the pile every week so it stays warm.</p>\n\
                   <p>Brown and green material should be balanced. Too much green makes it smell.</p>";

        let out = PostValidator::new(&GenerationConfig::default())
            .validate(&client, &job, doc)
            .await
            .unwrap();
        assert_eq!(provider.calls(PromptKind::EndingCheck), 1);
        assert_eq!(provider.calls(PromptKind::LinkRepair), 1);
        assert!(out.links.is_complete());
        assert!(ends_cleanly(&out.text));
    }
}
