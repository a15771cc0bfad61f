//! End-to-end form submission: validate, diff, persist, sync, upload.

#![forbid(unsafe_code)]

use metrics::counter;
use serde::Serialize;
use storefront_core::{ChangeSummary, DraftColorGroup, ProductFields, ProductId, ProductRecord, ProductWithDetails};
use storefront_reconcile::{
    detect_variant_changes, prepare_sync, validate_draft, ReconcileError, ValidationErrors, ValidationWarning,
};
use storefront_store::{Backend, BackendError};
use tracing::{info, warn};

use crate::images::{max_image_bytes, upload_variant_images, ImageContext, UploadReport};
use crate::products::{create_product, update_product};
use crate::session::FormGroup;
use crate::sync::{sync_variants, SyncFailure, SyncOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("product save failed: {0}")]
    Product(#[source] BackendError),
    #[error("product {product_id} saved but {source}")]
    Sync {
        product_id: ProductId,
        #[source]
        source: SyncFailure,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReport {
    pub product: ProductRecord,
    pub changes: ChangeSummary,
    pub sync: SyncOutcome,
    pub images: UploadReport,
    pub warnings: Vec<ValidationWarning>,
}

/// Persist a product form. Blocking checks run before any backend call; image
/// failures are reported, never raised.
pub async fn submit_product<B: Backend + ?Sized>(
    backend: &B,
    fields: &ProductFields,
    groups: &[FormGroup],
    original: Option<&ProductWithDetails>,
) -> Result<SubmitReport, SubmitError> {
    counter!("product_submit_total", 1u64);
    let drafts: Vec<DraftColorGroup> = groups.iter().map(|g| g.draft.clone()).collect();
    let validation = validate_draft(&drafts).map_err(|e| {
        counter!("product_submit_rejected", 1u64);
        e
    })?;
    let originals = original.map(|p| p.product_variants.as_slice()).unwrap_or_default();
    let changes = detect_variant_changes(originals, &drafts)?;

    let product = match original {
        Some(p) => update_product(backend, &p.product.id, fields).await,
        None => create_product(backend, fields).await,
    }
    .map_err(SubmitError::Product)?;

    let plan = prepare_sync(&product.id, &product.slug, &changes);
    let sync = sync_variants(backend, &product.id, &plan)
        .await
        .map_err(|source| SubmitError::Sync { product_id: product.id.clone(), source })?;

    let ctx = ImageContext {
        product_id: &product.id,
        product_name: &product.name,
        slug: &product.slug,
        has_primary: original.map(|p| p.product_images.iter().any(|i| i.is_primary)).unwrap_or(false),
        max_image_bytes: max_image_bytes(),
    };
    let images = upload_variant_images(backend, &ctx, groups, &sync).await;
    if !images.is_clean() {
        warn!(product_id = %product.id, images = %images, "product saved with image problems");
    }
    info!(product_id = %product.id, changes = %changes.summary(), "product submitted");

    Ok(SubmitReport { product, changes: changes.summary(), sync, images, warnings: validation.warnings })
}
