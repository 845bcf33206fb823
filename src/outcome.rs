// src/outcome.rs

use std::fmt;
use tracing::{info, warn};

/// Result of one unit of work (a file, a relation, a row).
/// Fatal failures are not represented here; they are `Err` from the stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped { item: String, reason: String },
}

impl Outcome {
    pub fn skipped(item: impl Into<String>, reason: impl fmt::Display) -> Self {
        Outcome::Skipped {
            item: item.into(),
            reason: reason.to_string(),
        }
    }
}

/// Per-stage tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: &'static str,
    pub done: usize,
    pub skipped: Vec<(String, String)>,
    /// Stage-specific count, e.g. rows appended or rows written.
    pub rows: usize,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            done: 0,
            skipped: Vec::new(),
            rows: 0,
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Done => self.done += 1,
            Outcome::Skipped { item, reason } => {
                warn!(stage = self.stage, item = %item, reason = %reason, "skipped");
                self.skipped.push((item, reason));
            }
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} done, {} skipped, {} rows",
            self.stage,
            self.done,
            self.skipped.len(),
            self.rows
        )
    }
}

/// Status of a stage as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Ok(StageReport),
    Fatal { stage: &'static str, error: String },
    NotRun { stage: &'static str },
}

/// Aggregated view of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stages: Vec<StageStatus>,
}

impl RunSummary {
    pub fn push_ok(&mut self, report: StageReport) {
        info!(%report, "stage finished");
        self.stages.push(StageStatus::Ok(report));
    }

    pub fn push_fatal(&mut self, stage: &'static str, error: &anyhow::Error) {
        tracing::error!(stage, error = %format!("{:#}", error), "stage failed");
        self.stages.push(StageStatus::Fatal {
            stage,
            error: format!("{:#}", error),
        });
    }

    pub fn push_not_run(&mut self, stage: &'static str) {
        self.stages.push(StageStatus::NotRun { stage });
    }

    pub fn has_fatal(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s, StageStatus::Fatal { .. }))
    }

    pub fn report(&self, stage: &str) -> Option<&StageReport> {
        self.stages.iter().find_map(|s| match s {
            StageStatus::Ok(r) if r.stage == stage => Some(r),
            _ => None,
        })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for status in &self.stages {
            match status {
                StageStatus::Ok(r) => {
                    writeln!(f, "  {}", r)?;
                    for (item, reason) in &r.skipped {
                        writeln!(f, "    - {}: {}", item, reason)?;
                    }
                }
                StageStatus::Fatal { stage, error } => writeln!(f, "  {}: FAILED ({})", stage, error)?,
                StageStatus::NotRun { stage } => writeln!(f, "  {}: not run", stage)?,
            }
        }
        Ok(())
    }
}
