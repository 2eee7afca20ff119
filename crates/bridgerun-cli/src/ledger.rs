//! Status Ledger
//!
//! Per-item, per-stage outcomes of one run. Each (item, stage) cell is
//! written at most once. Items are registered with [`Ledger::observe`] so they
//! get a report row even when no stage reached them.

use crate::report::{Report, ReportRow};
use bridgerun_common::types::{ItemId, SkipReason, StageKind, StageOutcome};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Reason used for cells no stage reached
pub const NOT_REACHED: &str = "not reached";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("outcome for stage '{stage}' already recorded for '{item}'")]
    Duplicate { item: ItemId, stage: StageKind },
}

#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: BTreeMap<ItemId, BTreeMap<StageKind, StageOutcome>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item without recording anything
    pub fn observe(&mut self, item: &ItemId) {
        self.entries.entry(item.clone()).or_default();
    }

    /// Record the outcome of `stage` for `item`
    pub fn record(
        &mut self,
        item: &ItemId,
        stage: StageKind,
        outcome: StageOutcome,
    ) -> Result<(), LedgerError> {
        let cells = self.entries.entry(item.clone()).or_default();
        if cells.contains_key(&stage) {
            return Err(LedgerError::Duplicate {
                item: item.clone(),
                stage,
            });
        }
        cells.insert(stage, outcome);
        Ok(())
    }

    pub fn get(&self, item: &ItemId, stage: StageKind) -> Option<&StageOutcome> {
        self.entries.get(item).and_then(|cells| cells.get(&stage))
    }

    pub fn contains(&self, item: &ItemId) -> bool {
        self.entries.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold a sub-run ledger into this one
    ///
    /// Fails on the first cell both ledgers hold; cells merged before that
    /// point stay merged.
    pub fn merge(&mut self, other: Ledger) -> Result<(), LedgerError> {
        for (item, cells) in other.entries {
            self.observe(&item);
            for (stage, outcome) in cells {
                self.record(&item, stage, outcome)?;
            }
        }
        Ok(())
    }

    /// One row per observed item and one cell per column
    ///
    /// Absent cells read `Skipped(stage disabled)` for disabled stages and
    /// `Failed(not reached)` otherwise.
    pub fn finalize(&self, columns: &[StageKind], disabled: &BTreeSet<StageKind>) -> Report {
        let rows = self
            .entries
            .iter()
            .map(|(item, cells)| {
                let outcomes = columns
                    .iter()
                    .map(|stage| match cells.get(stage) {
                        Some(outcome) => outcome.clone(),
                        None if disabled.contains(stage) => {
                            StageOutcome::skipped(SkipReason::StageDisabled)
                        },
                        None => StageOutcome::failed(NOT_REACHED),
                    })
                    .collect();
                ReportRow {
                    item: item.clone(),
                    cells: outcomes,
                }
            })
            .collect();

        Report {
            columns: columns.to_vec(),
            rows,
        }
    }
}
