//! Progress reporting between stages.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::types::{Progress, Result, ScribeError};

/// Receives the coarse progress marker as a Job moves through its stages
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: Progress) -> Result<()>;
}

/// Tracks the current marker and rejects backward moves before forwarding
pub struct MonotonicProgress<S> {
    inner: S,
    current: Mutex<Option<Progress>>,
}

impl<S: ProgressSink> MonotonicProgress<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<Progress> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check(&self, next: Progress) -> Result<bool> {
        let current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        match *current {
            Some(now) if now == next => Ok(false),
            Some(now) if !now.can_advance_to(next) => Err(ScribeError::pipeline(
                now,
                format!("progress cannot move from {} to {}", now, next),
            )),
            _ => Ok(true),
        }
    }
}

#[async_trait]
impl<S: ProgressSink> ProgressSink for MonotonicProgress<S> {
    async fn report(&self, progress: Progress) -> Result<()> {
        if !self.check(progress)? {
            return Ok(());
        }
        self.inner.report(progress).await?;
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = Some(progress);
        Ok(())
    }
}

/// Discards every report
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _progress: Progress) -> Result<()> {
        Ok(())
    }
}
