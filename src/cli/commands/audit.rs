//! Audit Command
//!
//! Print the generation-attempt log and the source trail of a Job.

use console::style;

use crate::cli::{CommandContext, Output};
use crate::document::head_chars;
use crate::types::{FetchStatus, Result};

const PREVIEW_CHARS: usize = 200;

pub fn run(job_id: &str, full: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let record = ctx.db.job_record(job_id)?;
    let attempts = ctx.db.load_attempts(job_id)?;
    let sources = ctx.db.load_sources(job_id)?;
    let out = Output::new();

    out.header(&format!("Audit: {}", record.topic));
    out.field("Status", out.status(record.status, record.progress));
    if let Some(error) = &record.error {
        out.field("Error", error);
    }

    out.section(&format!("Sources ({})", sources.len()));
    for (source, selected) in &sources {
        let mark = match (source.status, selected) {
            (FetchStatus::Success, true) => style("●").green(),
            (FetchStatus::Success, false) => style("○").dim(),
            (FetchStatus::Failed, _) => style("✗").red(),
        };
        let note = source.note.as_deref().map(|n| format!(" [{}]", n)).unwrap_or_default();
        println!("  {} {} ({} chars){}", mark, source.url, source.length, note);
    }

    out.section(&format!("Model calls ({})", attempts.len()));
    let mut total = 0;
    for (i, attempt) in attempts.iter().enumerate() {
        total += attempt.usage.total();
        let assignment = attempt
            .assignment
            .map(|a| format!(" writer {}", a))
            .unwrap_or_default();
        println!(
            "{:>3}. {}{} {} {} tokens{}",
            i + 1,
            style(attempt.kind.as_str()).bold(),
            assignment,
            attempt.finish.as_str(),
            attempt.usage.total(),
            style(format!(" {}", attempt.created_at.to_rfc3339())).dim()
        );
        if full {
            println!("{}\n{}\n", style("--- prompt").dim(), attempt.prompt);
            println!("{}\n{}\n", style("--- output").dim(), attempt.output);
        } else {
            println!("     {}", style(head_chars(&attempt.output, PREVIEW_CHARS).replace('\n', " ")).dim());
        }
    }
    println!();
    println!("Total tokens: {}", total);
    Ok(())
}
