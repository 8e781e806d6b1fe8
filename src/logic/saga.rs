use std::future::Future;
use std::pin::Pin;

use log::{error, info};

use crate::error::Result;

type Compensation = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Ordered list of compensating actions for a multi-step operation.
/// Each completed step registers how to undo itself; on failure the
/// registered compensations run newest first.
pub struct Saga {
    name: String,
    steps: Vec<(String, Compensation)>,
}

impl Saga {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Register the compensation for a step that just completed. The future
    /// is not polled unless [`Saga::compensate`] runs.
    pub fn push<F>(&mut self, step: impl Into<String>, compensation: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push((step.into(), Box::pin(compensation)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every registered compensation in reverse order. A failing
    /// compensation is logged and the remaining ones still run. Returns the
    /// number that succeeded.
    pub async fn compensate(self) -> usize {
        let mut succeeded = 0;
        for (step, compensation) in self.steps.into_iter().rev() {
            info!("[{}] compensating step '{}'", self.name, step);
            match compensation.await {
                Ok(()) => succeeded += 1,
                Err(e) => error!("[{}] compensation of '{}' failed: {}", self.name, step, e),
            }
        }
        succeeded
    }

    /// Discard the compensations once the operation has succeeded.
    pub fn commit(self) {
        if !self.steps.is_empty() {
            info!("[{}] completed {} steps", self.name, self.steps.len());
        }
    }
}
