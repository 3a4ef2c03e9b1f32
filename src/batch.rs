// Batch Driver - one run's worth of records through the pipeline
//
// Strictly sequential: a later record observes every mutation made by
// earlier records, including retention evictions.

use crate::db::Collection;
use crate::filter::AgentFilter;
use crate::normalizer::normalize;
use crate::parser::RawRecord;
use crate::reconciliation::{ReconcileAction, ReconciliationEngine};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// ARCHIVER BOUNDARY
// ============================================================================

/// Marks a feed source processed. Invoked once per source, after its last
/// record and only when none of its records failed, so a failed source stays
/// in the feed directory for the next run.
pub trait Archiver {
    fn archive(&self, source_id: &str) -> Result<()>;
}

/// Archiver that does nothing. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct NoopArchiver;

impl Archiver for NoopArchiver {
    fn archive(&self, _source_id: &str) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// ERROR POLICY
// ============================================================================

/// What to do when a single record fails normalization or validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Record the failure in the report and keep going (default). One bad
    /// record must not abort the batch.
    #[default]
    Continue,
    /// Abort the whole batch on the first failure.
    FailFast,
}

// ============================================================================
// BATCH RECORDS & REPORT
// ============================================================================

/// One raw record tagged with the feed document it came from.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub source_id: String,
    pub raw: RawRecord,
}

/// Failure of a single record, kept in the report.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub source_id: String,
    /// Index of the record within its source document.
    pub index: usize,
    pub error: String,
}

/// Aggregate outcome of one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub out_of_scope: usize,
    pub failed: usize,
    pub listed: usize,
    pub updated: usize,
    pub sold: usize,
    pub withdrawn: usize,
    pub ignored: usize,
    pub evicted: Vec<String>,
    pub failures: Vec<RecordFailure>,
    pub archived_sources: Vec<String>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!(
            "{} reconciled, {} out of scope, {} failed | {} listed, {} updated, {} sold, {} withdrawn, {} evicted",
            self.processed,
            self.out_of_scope,
            self.failed,
            self.listed,
            self.updated,
            self.sold,
            self.withdrawn,
            self.evicted.len()
        )
    }

    fn record(&mut self, action: &ReconcileAction) {
        self.processed += 1;
        match action {
            ReconcileAction::Listed => self.listed += 1,
            ReconcileAction::Updated => self.updated += 1,
            ReconcileAction::Sold { evicted, .. } => {
                self.sold += 1;
                self.evicted.extend(evicted.iter().cloned());
            }
            ReconcileAction::Withdrawn => self.withdrawn += 1,
            ReconcileAction::Ignored => self.ignored += 1,
        }
    }
}

// ============================================================================
// BATCH DRIVER
// ============================================================================

/// Runs every record of a batch through normalize → filter → reconcile.
pub struct BatchDriver<'a> {
    engine: ReconciliationEngine,
    filter: AgentFilter,
    policy: ErrorPolicy,
    archiver: &'a dyn Archiver,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        engine: ReconciliationEngine,
        filter: AgentFilter,
        policy: ErrorPolicy,
        archiver: &'a dyn Archiver,
    ) -> Self {
        BatchDriver {
            engine,
            filter,
            policy,
            archiver,
        }
    }

    /// Process one batch against the loaded collections.
    ///
    /// Records are processed in lexicographic source order; the sort is
    /// stable, so document order within a source is preserved and
    /// reprocessing the same inputs is deterministic.
    pub fn run(
        &self,
        mut records: Vec<BatchRecord>,
        current: &mut Collection,
        sold: &mut Collection,
    ) -> Result<BatchReport> {
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let mut report = BatchReport::default();
        let mut source: Option<String> = None;
        let mut source_failed = false;
        let mut index = 0;

        for record in records {
            if source.as_deref() != Some(record.source_id.as_str()) {
                if let Some(done) = source.take() {
                    self.finish_source(&done, source_failed, &mut report)?;
                }
                source = Some(record.source_id.clone());
                source_failed = false;
                index = 0;
            }

            if let Err(error) = self.apply_record(&record, current, sold, &mut report) {
                source_failed = true;
                report.failed += 1;
                report.failures.push(RecordFailure {
                    source_id: record.source_id.clone(),
                    index,
                    error: error.to_string(),
                });
                if self.policy == ErrorPolicy::FailFast {
                    bail!("record {} of '{}' failed: {}", index, record.source_id, error);
                }
            }
            index += 1;
        }

        if let Some(done) = source.take() {
            self.finish_source(&done, source_failed, &mut report)?;
        }

        Ok(report)
    }

    fn apply_record(
        &self,
        record: &BatchRecord,
        current: &mut Collection,
        sold: &mut Collection,
        report: &mut BatchReport,
    ) -> Result<()> {
        let listing = normalize(&record.raw)?;

        if !self.filter.in_scope(&listing) {
            report.out_of_scope += 1;
            return Ok(());
        }

        let action = self.engine.apply(listing, current, sold)?;
        report.record(&action);
        Ok(())
    }

    fn finish_source(&self, source_id: &str, failed: bool, report: &mut BatchReport) -> Result<()> {
        if failed {
            return Ok(());
        }
        // Archiver failures are external collaborator failures; surfaced
        // as-is, not retried.
        self.archiver.archive(source_id)?;
        report.archived_sources.push(source_id.to_string());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
