//! Variant reconciler: validates an edited variant draft and computes the
//! create/update/delete change-set against the persisted variants.
//!
//! Everything here is pure and synchronous; applying the result is the job of
//! `storefront-apply`.

#![forbid(unsafe_code)]

pub mod diff;
pub mod plan;
pub mod seed;
pub mod sku;
pub mod validate;

use serde::{Deserialize, Serialize};
use storefront_core::{VariantId, VariantKey};

pub use diff::{detect_variant_changes, flatten, normalize};
pub use plan::prepare_sync;
pub use seed::{group_variants, DEFAULT_COLOR};
pub use sku::generate_sku;
pub use validate::{
    duplicate_skus, duplicate_variants, has_duplicate_variants, has_stock_available, has_unique_skus,
    validate_draft, ValidationReport, ValidationWarning,
};

/// Draft inconsistencies detected while diffing.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("draft references variant {0} which does not exist on the product")]
    UnknownVariantId(VariantId),
    #[error("variant {0} is referenced by more than one draft entry")]
    DuplicateVariantId(VariantId),
}

/// Blocking validation failures; submission must not touch the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub duplicate_variants: Vec<VariantKey>,
    pub duplicate_skus: Vec<String>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.duplicate_variants.is_empty() && self.duplicate_skus.is_empty()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if !self.duplicate_variants.is_empty() {
            let pairs: Vec<String> = self.duplicate_variants.iter().map(|k| k.to_string()).collect();
            parts.push(format!("duplicate variants: {}", pairs.join(", ")));
        }
        if !self.duplicate_skus.is_empty() {
            parts.push(format!("duplicate SKUs: {}", self.duplicate_skus.join(", ")));
        }
        if parts.is_empty() {
            return f.write_str("no validation errors");
        }
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_render_both_lists() {
        let e = ValidationErrors {
            duplicate_variants: vec![VariantKey { color: "red".into(), size: "M".into() }],
            duplicate_skus: vec!["TEE-1".into(), "TEE-2".into()],
        };
        assert_eq!(e.to_string(), "duplicate variants: red - M; duplicate SKUs: TEE-1, TEE-2");
        assert!(!e.is_empty());
    }

    #[test]
    fn reconcile_error_mentions_id() {
        let e = ReconcileError::UnknownVariantId("v-42".into());
        assert!(e.to_string().contains("v-42"));
    }
}
