//! Persisting parsed ingestion results in batches.

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::error::{RowError, StructuralError};
use acctfleet_core::ingest::Ingested;
use acctfleet_core::summary::{Summary, SummaryBuilder};
use acctfleet_core::types::AccountInput;
use serde::Serialize;
use thiserror::Error;

use crate::config::IngestConfig;
use crate::store::{FleetStore, StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
}

/// One batch the store did not confirm.
///
/// Each batch is one transaction, so a batch that failed outright left
/// nothing behind. A batch whose store call timed out is different: the
/// write keeps running after the importer stops waiting and may still have
/// committed, so its rows are in an unknown state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub rows: usize,
    pub error: String,
    pub timed_out: bool,
}

impl BatchFailure {
    pub fn category(&self) -> &'static str {
        if self.timed_out {
            "store_timeout"
        } else {
            "store_error"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Records the parser accepted.
    pub parsed: usize,
    /// New records written.
    pub inserted: usize,
    /// Parsed records already present in the store (or repeated in the input).
    pub duplicates: usize,
    pub skipped: Vec<RowError>,
    pub failed_batches: Vec<BatchFailure>,
}

impl ImportReport {
    pub fn summary(&self) -> Summary {
        let mut builder = SummaryBuilder::new();
        builder.accept(self.inserted);
        for row in &self.skipped {
            builder.skip(row.kind.category(), row);
        }
        for _ in 0..self.duplicates {
            builder.skip("duplicate", "record already stored");
        }
        for batch in &self.failed_batches {
            for _ in 0..batch.rows {
                builder.fail(
                    batch.category(),
                    format!("batch {}: {}", batch.index, batch.error),
                );
            }
        }
        builder.build()
    }
}

/// Writes [`Ingested`] results through a [`StoreHandle`].
#[derive(Debug, Clone)]
pub struct Importer {
    store: StoreHandle,
    batch_size: usize,
    max_records: usize,
}

impl Importer {
    pub fn new(store: StoreHandle, config: &IngestConfig) -> Self {
        Self {
            store,
            batch_size: config.batch_size.max(1),
            max_records: config.max_records,
        }
    }

    pub async fn import_accounts(
        &self,
        ingested: Ingested<AccountInput>,
    ) -> Result<ImportReport, ImportError> {
        self.import(ingested, "account", |store, batch| store.insert_accounts(batch))
            .await
    }

    pub async fn import_proxies(
        &self,
        ingested: Ingested<ProxyDescriptor>,
    ) -> Result<ImportReport, ImportError> {
        self.import(ingested, "proxy", |store, batch| store.insert_proxies(batch))
            .await
    }

    /// Each batch is written in its own transaction. A failed batch is
    /// reported; earlier batches stay committed and the remaining batches
    /// are still attempted.
    async fn import<T, F>(
        &self,
        ingested: Ingested<T>,
        kind: &'static str,
        insert: F,
    ) -> Result<ImportReport, ImportError>
    where
        T: Send + 'static,
        F: Fn(&dyn FleetStore, &[T]) -> Result<usize, StoreError> + Copy + Send + 'static,
    {
        let rows = ingested.total_rows();
        if rows > self.max_records {
            return Err(StructuralError::TooManyRecords {
                count: rows,
                limit: self.max_records,
            }
            .into());
        }

        let mut report = ImportReport {
            parsed: ingested.accepted.len(),
            skipped: ingested.skipped,
            ..ImportReport::default()
        };

        let mut records = ingested.accepted;
        let mut index = 0;
        while !records.is_empty() {
            let rest = records.split_off(self.batch_size.min(records.len()));
            let batch = std::mem::replace(&mut records, rest);
            let len = batch.len();
            match self.store.call(move |s| insert(s, &batch)).await {
                Ok(inserted) => {
                    report.inserted += inserted;
                    report.duplicates += len - inserted.min(len);
                }
                Err(e) => {
                    tracing::warn!(kind, batch = index, rows = len, "import batch failed: {e}");
                    report.failed_batches.push(BatchFailure {
                        index,
                        rows: len,
                        timed_out: matches!(e, StoreError::Timeout(_)),
                        error: e.to_string(),
                    });
                }
            }
            index += 1;
        }

        tracing::info!(
            kind,
            parsed = report.parsed,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped.len(),
            failed_batches = report.failed_batches.len(),
            "import finished"
        );
        Ok(report)
    }
}
