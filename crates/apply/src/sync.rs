//! Applying a variant sync plan: three disjoint batches fanned out in parallel.

#![forbid(unsafe_code)]

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use storefront_core::{NewVariantRow, PersistedVariant, SyncPlan, Table, VariantId, VariantPatch};
use storefront_store::{from_record, from_records, to_record, Backend, BackendError, BackendResult};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncStage {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncStage::Create => "create",
            SyncStage::Update => "update",
            SyncStage::Delete => "delete",
        })
    }
}

/// What the backend acknowledged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub created: Vec<PersistedVariant>,
    pub updated: Vec<PersistedVariant>,
    pub deleted: Vec<VariantId>,
}

/// First failing batch, reported once every batch has settled. `partial`
/// holds whatever the other batches applied; the store has no cross-batch
/// transaction, so callers must re-fetch before trusting local state.
#[derive(Debug, thiserror::Error)]
#[error("variant {stage} batch failed: {source}")]
pub struct SyncFailure {
    pub stage: SyncStage,
    #[source]
    pub source: BackendError,
    pub partial: SyncOutcome,
}

async fn create_batch<B: Backend + ?Sized>(backend: &B, rows: &[NewVariantRow]) -> BackendResult<Vec<PersistedVariant>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let records = rows.iter().map(to_record).collect::<BackendResult<Vec<_>>>()?;
    let created = backend.batch_insert(Table::ProductVariants, records).await?;
    from_records(created)
}

async fn update_one<B: Backend + ?Sized>(backend: &B, patch: &VariantPatch) -> BackendResult<PersistedVariant> {
    let row = backend.update(Table::ProductVariants, &patch.id, to_record(patch)?).await?;
    from_record(row)
}

/// Per-record updates, all attempted; successes kept alongside the first error.
async fn update_batch<B: Backend + ?Sized>(
    backend: &B,
    patches: &[VariantPatch],
) -> (Vec<PersistedVariant>, Option<BackendError>) {
    let results = join_all(patches.iter().map(|p| update_one(backend, p))).await;
    let mut updated = Vec::with_capacity(results.len());
    let mut first_err = None;
    for (patch, res) in patches.iter().zip(results) {
        match res {
            Ok(v) => updated.push(v),
            Err(e) => {
                warn!(variant = %patch.id, error = %e, "variant update failed");
                first_err.get_or_insert(e);
            }
        }
    }
    (updated, first_err)
}

async fn delete_batch<B: Backend + ?Sized>(backend: &B, ids: &[VariantId]) -> BackendResult<Vec<VariantId>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    backend.batch_delete(Table::ProductVariants, ids).await?;
    Ok(ids.to_vec())
}

/// Apply `plan` for `product_id`. Creates, updates and deletes touch disjoint
/// ids, so they run concurrently; none is abandoned because another failed.
pub async fn sync_variants<B: Backend + ?Sized>(
    backend: &B,
    product_id: &str,
    plan: &SyncPlan,
) -> Result<SyncOutcome, SyncFailure> {
    if plan.is_empty() {
        debug!(product_id, "no variant changes");
        return Ok(SyncOutcome::default());
    }
    let t0 = std::time::Instant::now();
    counter!("variant_sync_attempts", 1u64);

    let (created, (updated, update_err), deleted) = futures::join!(
        create_batch(backend, &plan.to_create),
        update_batch(backend, &plan.to_update),
        delete_batch(backend, &plan.to_delete),
    );

    let mut first: Option<(SyncStage, BackendError)> = None;
    let created = created.unwrap_or_else(|e| {
        first.get_or_insert((SyncStage::Create, e));
        Vec::new()
    });
    if let Some(e) = update_err {
        first.get_or_insert((SyncStage::Update, e));
    }
    let deleted = deleted.unwrap_or_else(|e| {
        first.get_or_insert((SyncStage::Delete, e));
        Vec::new()
    });
    let outcome = SyncOutcome { created, updated, deleted };
    histogram!("variant_sync_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);

    match first {
        Some((stage, source)) => {
            counter!("variant_sync_err", 1u64);
            warn!(product_id, %stage, error = %source, "variant sync incomplete");
            Err(SyncFailure { stage, source, partial: outcome })
        }
        None => {
            counter!("variant_sync_ok", 1u64);
            counter!("variants_created_total", outcome.created.len() as u64);
            counter!("variants_updated_total", outcome.updated.len() as u64);
            counter!("variants_deleted_total", outcome.deleted.len() as u64);
            info!(
                product_id,
                created = outcome.created.len(),
                updated = outcome.updated.len(),
                deleted = outcome.deleted.len(),
                "variant sync applied"
            );
            Ok(outcome)
        }
    }
}
