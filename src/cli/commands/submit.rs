//! Submit Command
//!
//! Read an order file and create one pending Job per order line.
//!
//! Usage:
//!   longscribe submit order.toml
//!   longscribe submit order.json
//!   longscribe submit order.yaml

use serde::Deserialize;
use std::path::Path;

use crate::cli::{CommandContext, Output};
use crate::types::{
    DocumentKind, Job, JobId, Language, Result, ScribeError, SeoLink, UserSource,
};

/// An order as submitted by the ordering system
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub lines: Vec<OrderLine>,
}

/// One document requested by an order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    pub topic: String,
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

impl Order {
    /// Parse by file extension: toml, json, yaml/yml
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let order: Order = match ext.as_str() {
            "toml" => toml::from_str(text)
                .map_err(|e| ScribeError::Config(format!("Invalid order file: {}", e)))?,
            "json" => serde_json::from_str(text)?,
            "yaml" | "yml" => serde_yaml::from_str(text)?,
            other => {
                return Err(ScribeError::Config(format!(
                    "Unsupported order format '{}'. Use .toml, .json or .yaml",
                    other
                )));
            }
        };
        if order.lines.is_empty() {
            return Err(ScribeError::InvalidJob("order has no lines".to_string()));
        }
        Ok(order)
    }

    /// Jobs for every line, all validated before any is stored
    pub fn into_jobs(self) -> Result<(String, Vec<Job>)> {
        let order_id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| JobId::generate().to_string());

        let jobs = self
            .lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let mut job = Job::new(line.topic, line.target_length, line.language);
                job.order_id = Some(order_id.clone());
                job.kind = line.kind;
                job.guidelines = line.guidelines;
                job.seo_keywords = line.seo_keywords;
                job.seo_links = line.seo_links;
                job.user_sources = line.user_sources;
                job.validate()
                    .map_err(|e| ScribeError::InvalidJob(format!("line {}: {}", i + 1, e)))?;
                Ok(job)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((order_id, jobs))
    }
}

pub fn run(path: &Path) -> Result<()> {
    let ctx = CommandContext::load()?;
    let text = std::fs::read_to_string(path)?;
    let (order_id, jobs) = Order::parse(path, &text)?.into_jobs()?;

    for job in &jobs {
        ctx.db.insert_job(job)?;
    }

    let out = Output::new();
    out.success(&format!("Order {} submitted with {} job(s)", order_id, jobs.len()));
    for job in &jobs {
        out.field(job.id.as_str(), format!("{} ({} chars)", job.topic, job.target_length));
    }
    println!();
    println!("Next: longscribe run --order {}", order_id);
    Ok(())
}
