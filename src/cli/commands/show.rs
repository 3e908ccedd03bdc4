//! Show Command
//!
//! Print the generated document of a Job.

use crate::cli::{CommandContext, Output};
use crate::types::{Result, ScribeError};

pub fn run(job_id: &str, report: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let content = ctx
        .db
        .load_content(job_id)?
        .ok_or_else(|| ScribeError::InvalidContent(format!("{} has no content yet", job_id)))?;

    if report {
        println!("{}", serde_json::to_string_pretty(&content)?);
        return Ok(());
    }

    match (content.generated_content, content.draft_content) {
        (Some(text), _) => println!("{}", text),
        (None, Some(draft)) => {
            Output::new().warning("Document did not pass validation, showing the draft");
            println!("{}", draft);
        }
        (None, None) => {
            return Err(ScribeError::InvalidContent(format!(
                "{} has not produced a document yet",
                job_id
            )));
        }
    }
    Ok(())
}
