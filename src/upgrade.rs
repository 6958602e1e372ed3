//! Schema upgrades.
//!
//! An upgrade rewrites records in one batch transaction. Unlike ordinary
//! transactions it is forgiving: a record the migration cannot handle is
//! logged and left as it is, and the rest of the upgrade proceeds.

use crate::error::Result;
use crate::store::Store;
use crate::txn::TransactionOptions;
use crate::types::{Handle, RecordClass};
use tracing::{info, warn};

/// Outcome of [`Store::upgrade`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Records passed to the migration.
    pub examined: usize,
    /// Records whose payload changed.
    pub rewritten: usize,
    /// Records the migration failed on.
    pub skipped: usize,
}

impl Store {
    /// Migrate every record to `target_version`.
    ///
    /// `migrate` returns `Ok(Some(payload))` to rewrite a record, `Ok(None)`
    /// to keep it, or an error to skip it. The upgrade runs as a batch
    /// transaction: subscribers see one rebuild signal per touched class and
    /// the undo history is cleared. A store already at or past the target is
    /// left alone.
    pub fn upgrade<F>(&self, target_version: u32, mut migrate: F) -> Result<UpgradeReport>
    where
        F: FnMut(RecordClass, &Handle, &[u8]) -> Result<Option<Vec<u8>>>,
    {
        let from_version = self.schema_version()?;
        let mut report = UpgradeReport {
            from_version,
            to_version: from_version,
            ..Default::default()
        };
        if from_version >= target_version {
            info!(version = from_version, "schema already current");
            return Ok(report);
        }

        let description = format!("Upgrade schema to version {}", target_version);
        self.begin_with(description.as_str(), TransactionOptions::batch())?;

        let outcome = self
            .migrate_all(&mut migrate, &mut report)
            .and_then(|()| self.set_schema_version(target_version))
            .and_then(|()| self.commit(&description));
        if let Err(e) = outcome {
            if self.in_transaction() {
                if let Err(reset_err) = self.set_schema_version(from_version) {
                    warn!(error = %reset_err, "failed to restore schema version");
                }
                if let Err(abort_err) = self.abort() {
                    warn!(error = %abort_err, "failed to abort schema upgrade");
                }
            }
            return Err(e);
        }

        report.to_version = target_version;
        info!(
            from = from_version,
            to = target_version,
            examined = report.examined,
            rewritten = report.rewritten,
            skipped = report.skipped,
            "upgraded schema"
        );
        Ok(report)
    }

    fn migrate_all<F>(&self, migrate: &mut F, report: &mut UpgradeReport) -> Result<()>
    where
        F: FnMut(RecordClass, &Handle, &[u8]) -> Result<Option<Vec<u8>>>,
    {
        for class in RecordClass::ALL {
            for (handle, payload) in self.records(class)? {
                report.examined += 1;
                match migrate(class, &handle, &payload) {
                    Ok(Some(new)) if new != payload => {
                        self.update_record(class, &handle, &new)?;
                        report.rewritten += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%class, %handle, error = %e, "skipping record during upgrade");
                        report.skipped += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
