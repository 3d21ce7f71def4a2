//! Units of work, stages, and the dependency graph between them.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::config::StorageLayout;
use crate::error::{PipelineError, PipelineResult};
use crate::records::ViewKind;

/// Pipeline stage. Stages are ordered: `Clean < Aggregate < Publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clean,
    Aggregate,
    Publish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::Aggregate => "aggregate",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clean" => Ok(Stage::Clean),
            "aggregate" => Ok(Stage::Aggregate),
            "publish" => Ok(Stage::Publish),
            other => Err(PipelineError::Config {
                message: format!("unknown stage '{other}' (expected clean, aggregate or publish)"),
            }),
        }
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    CleanCustomers,
    CleanPurchases,
    Aggregate(ViewKind),
    Publish(ViewKind),
}

impl UnitId {
    /// Every unit, dependencies before dependents.
    pub fn all() -> Vec<UnitId> {
        let mut units = vec![UnitId::CleanCustomers, UnitId::CleanPurchases];
        units.extend(ViewKind::ALL.map(UnitId::Aggregate));
        units.extend(ViewKind::ALL.map(UnitId::Publish));
        units
    }

    pub fn stage(self) -> Stage {
        match self {
            UnitId::CleanCustomers | UnitId::CleanPurchases => Stage::Clean,
            UnitId::Aggregate(_) => Stage::Aggregate,
            UnitId::Publish(_) => Stage::Publish,
        }
    }

    /// Units that must succeed before this one may start.
    pub fn dependencies(self) -> Vec<UnitId> {
        match self {
            UnitId::CleanCustomers | UnitId::CleanPurchases => Vec::new(),
            UnitId::Aggregate(_) => vec![UnitId::CleanCustomers, UnitId::CleanPurchases],
            UnitId::Publish(view) => vec![UnitId::Aggregate(view)],
        }
    }

    /// `(bucket, key)` of the artifact this unit persists, if it persists one in the object store.
    pub fn checkpoint(self, layout: &StorageLayout) -> Option<(&str, &str)> {
        match self {
            UnitId::CleanCustomers => Some((
                layout.intermediate_bucket.as_str(),
                StorageLayout::CLEAN_CUSTOMERS_KEY,
            )),
            UnitId::CleanPurchases => Some((
                layout.intermediate_bucket.as_str(),
                StorageLayout::CLEAN_PURCHASES_KEY,
            )),
            UnitId::Aggregate(view) => {
                Some((layout.aggregate_bucket.as_str(), view.object_key()))
            }
            UnitId::Publish(_) => None,
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::CleanCustomers => f.write_str("clean_customers"),
            UnitId::CleanPurchases => f.write_str("clean_purchases"),
            UnitId::Aggregate(view) => write!(f, "aggregate_{view}"),
            UnitId::Publish(view) => write!(f, "publish_{view}"),
        }
    }
}

impl Serialize for UnitId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Which stages a run covers.
///
/// Units of stages before `start_from` are not recomputed: they only check that their
/// checkpoint artifact exists. Units of stages after `stop_after` are not planned at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub start_from: Stage,
    pub stop_after: Stage,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_from: Stage::Clean,
            stop_after: Stage::Publish,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.start_from > self.stop_after {
            return Err(PipelineError::Config {
                message: format!(
                    "cannot start from '{}' and stop after '{}'",
                    self.start_from, self.stop_after
                ),
            });
        }
        Ok(())
    }

    /// Planned units, dependencies before dependents.
    pub fn plan(&self) -> Vec<UnitId> {
        UnitId::all()
            .into_iter()
            .filter(|u| u.stage() <= self.stop_after)
            .collect()
    }

    /// `true` if `unit` only has its checkpoint verified.
    pub fn reuses(&self, unit: UnitId) -> bool {
        unit.stage() < self.start_from
    }
}
