use console::style;

use crate::types::{JobStatus, Progress};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<14} {}", style(label).dim(), value);
    }

    /// Status word colored by outcome
    pub fn status(&self, status: JobStatus, progress: Option<Progress>) -> String {
        let stage = progress.map(|p| format!(" ({})", p)).unwrap_or_default();
        let text = format!("{}{}", status.as_str(), stage);
        match status {
            JobStatus::Completed => style(text).green().to_string(),
            JobStatus::Error => style(text).red().to_string(),
            JobStatus::Running => style(text).cyan().to_string(),
            JobStatus::Pending => style(text).dim().to_string(),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
