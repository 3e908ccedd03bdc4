//! Run Command
//!
//! Run one Job, or every pending Job of an order in sequence.

use std::time::Duration;

use crate::ai::SharedProvider;
use crate::cli::{CommandContext, Output};
use crate::constants::network::NOTIFY_DRAIN_SECS;
use crate::pipeline::{JobPipeline, JobResult};
use crate::types::Result;

/// Build the pipeline after a provider reachability check. An unreachable
/// provider only warns; the per-call retries decide the Job's fate.
async fn prepare(ctx: &CommandContext, out: &Output) -> Result<JobPipeline> {
    let provider: SharedProvider = ctx.provider()?;
    match provider.health_check().await {
        Ok(true) => tracing::debug!(provider = provider.name(), model = provider.model(), "Provider reachable"),
        Ok(false) => out.warning(&format!("Provider {} reports unavailable", provider.name())),
        Err(e) => out.warning(&format!("Provider check failed: {}", e)),
    }
    ctx.pipeline(provider)
}

/// The runtime is dropped right after a command returns
async fn finish(pipeline: &JobPipeline, out: &Output) {
    let abandoned = pipeline.drain(Duration::from_secs(NOTIFY_DRAIN_SECS)).await;
    if abandoned > 0 {
        out.warning(&format!("{} notification(s) not delivered", abandoned));
    }
}

pub async fn run_job(job_id: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let out = Output::new();
    let pipeline = prepare(&ctx, &out).await?;

    let outcome = pipeline.run(job_id).await;
    finish(&pipeline, &out).await;

    match outcome {
        Ok(result) => {
            print_result(&out, &result);
            Ok(())
        }
        Err(e) => {
            out.error(&format!("Job {} failed", job_id));
            Err(e)
        }
    }
}

pub async fn run_order(order_id: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let out = Output::new();
    let pipeline = prepare(&ctx, &out).await?;

    let outcome = pipeline.run_order(order_id).await;
    finish(&pipeline, &out).await;
    let result = outcome?;
    if result.completed.is_empty() && result.failed.is_empty() {
        out.info(&format!("No pending jobs for order {}", order_id));
        return Ok(());
    }

    out.header(&format!("Order {}", order_id));
    for done in &result.completed {
        print_result(&out, done);
    }
    for (job_id, error) in &result.failed {
        out.error(&format!("{}: {}", job_id, error));
    }
    println!();
    println!(
        "{} completed, {} failed",
        result.completed.len(),
        result.failed.len()
    );
    Ok(())
}

fn print_result(out: &Output, result: &JobResult) {
    out.success(&format!(
        "{}: {} / {} chars in {}s",
        result.job_id, result.chars, result.target_length, result.duration_secs
    ));
    out.field("Writers", result.assignments);
    out.field("Continuations", result.continuations);
    out.field("Sources", result.sources_selected);
    out.field("Tokens", result.tokens.total());
    if !result.links_complete {
        out.warning("Some required links could not be placed");
    }
}
