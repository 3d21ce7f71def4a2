//! Structured outcome of a pipeline run.

use std::time::Duration;

use serde::{Serialize, Serializer};

use super::unit::UnitId;
use crate::aggregation::AggregationReport;
use crate::cleaning::{CleaningReport, DropCounts};
use crate::error::{ErrorClass, PipelineError};
use crate::publish::{PublishStats, PublishSummary};

/// Serialize a duration as fractional milliseconds.
pub(crate) fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

/// What a successful unit produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UnitOutput {
    pub rows_in: usize,
    pub rows_out: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drops: Option<DropCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishStats>,
}

impl From<CleaningReport> for UnitOutput {
    fn from(r: CleaningReport) -> Self {
        Self {
            rows_in: r.rows_in,
            rows_out: r.rows_out,
            drops: Some(r.drops),
            ..Self::default()
        }
    }
}

impl From<AggregationReport> for UnitOutput {
    fn from(r: AggregationReport) -> Self {
        Self {
            rows_in: r.rows_in,
            rows_out: r.rows_out,
            unresolved: r.unresolved,
            ..Self::default()
        }
    }
}

impl From<PublishStats> for UnitOutput {
    fn from(s: PublishStats) -> Self {
        Self {
            rows_in: s.rows_inserted,
            rows_out: s.rows_inserted,
            published: Some(s),
            ..Self::default()
        }
    }
}

/// Why a unit never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The run was cancelled before the unit started.
    Cancelled,
    /// A dependency did not succeed.
    UpstreamFailed { unit: UnitId },
}

/// Final state of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
    /// Executed and wrote its artifact.
    Succeeded,
    /// Belongs to a stage before the resume point; its checkpoint artifact was found.
    Reused,
    Failed { class: ErrorClass, error: String },
    Skipped { reason: SkipReason },
}

impl UnitStatus {
    /// `true` when dependents may run.
    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Reused)
    }
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    pub status: UnitStatus,
    /// Attempts made, first one included. Zero for skipped units.
    pub attempts: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<UnitOutput>,
}

impl UnitReport {
    pub(crate) fn finished(
        unit: UnitId,
        status: UnitStatus,
        attempts: u32,
        elapsed: Duration,
        output: Option<UnitOutput>,
    ) -> Self {
        Self {
            unit,
            status,
            attempts,
            elapsed,
            output,
        }
    }

    pub(crate) fn failed(unit: UnitId, attempts: u32, elapsed: Duration, err: &PipelineError) -> Self {
        let status = UnitStatus::Failed {
            class: err.class(),
            error: err.to_string(),
        };
        Self::finished(unit, status, attempts, elapsed, None)
    }

    pub(crate) fn skipped(unit: UnitId, reason: SkipReason) -> Self {
        Self::finished(unit, UnitStatus::Skipped { reason }, 0, Duration::ZERO, None)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned unit succeeded or was reused.
    Succeeded,
    /// At least one unit failed.
    Failed,
    /// Cancelled before every unit could run; nothing failed.
    Cancelled,
}

/// Structured report of a run, in unit plan order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    pub(crate) fn new(units: Vec<UnitReport>, elapsed: Duration) -> Self {
        let failed = units
            .iter()
            .any(|u| matches!(u.status, UnitStatus::Failed { .. }));
        let cancelled = units.iter().any(|u| {
            matches!(
                u.status,
                UnitStatus::Skipped {
                    reason: SkipReason::Cancelled
                }
            )
        });
        let status = if failed {
            RunStatus::Failed
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        };
        Self {
            status,
            elapsed,
            units,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Report of one unit, if it was part of the plan.
    pub fn unit(&self, unit: UnitId) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit == unit)
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units
            .iter()
            .filter(|u| matches!(u.status, UnitStatus::Failed { .. }))
    }

    /// Totals over the collections published by this run.
    pub fn publish_summary(&self) -> PublishSummary {
        self.units
            .iter()
            .filter_map(|u| u.output.as_ref()?.published.as_ref())
            .collect()
    }
}
