//! Status Command
//!
//! Poll the coarse progress of a Job.

use crate::cli::util::{is_initialized, open_database};
use crate::cli::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

pub fn run(job_id: &str, format: &str) -> Result<()> {
    let json_output = format == "json";

    if !is_initialized() {
        if json_output {
            println!("{{\"status\": \"not_initialized\"}}");
        } else {
            println!("Not initialized. Run 'longscribe init' first.");
        }
        // Informational command
        return Ok(());
    }

    let config = ConfigLoader::load()?;
    let db = open_database(&config)?;
    let record = db.job_record(job_id)?;

    if json_output {
        // External observers only ever see the coarse marker
        let status = serde_json::json!({
            "id": record.id,
            "orderId": record.order_id,
            "status": record.status.as_str(),
            "progress": record.progress.map(|p| p.as_str()),
            "updatedAt": record.updated_at.to_rfc3339(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let out = Output::new();
    out.section(&record.topic);
    out.field("Job", &record.id);
    if let Some(order_id) = &record.order_id {
        out.field("Order", order_id);
    }
    out.field("Status", out.status(record.status, record.progress));
    out.field("Target", format!("{} chars", record.target_length));
    out.field("Updated", record.updated_at.to_rfc3339());
    if let Some(error) = &record.error {
        let stage = record
            .error_stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        out.field("Failed at", stage);
        out.field("Error", error);
    }
    Ok(())
}
