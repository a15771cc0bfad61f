//! Draft validation: duplicate (color, size) pairs, duplicate SKUs, stock.

#![forbid(unsafe_code)]

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use storefront_core::{DraftColorGroup, VariantKey};
use tracing::{debug, warn};

use crate::ValidationErrors;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Every size entry has zero stock; the product will not be purchasable.
    NoStock,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::NoStock => f.write_str("all variants have 0 stock; product won't be purchasable"),
        }
    }
}

/// Outcome of a draft that passed the blocking checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<ValidationWarning>,
}

fn pair_key(color: &str, size: &str) -> (String, String) {
    (color.to_lowercase(), size.to_lowercase())
}

/// SKUs that are absent, empty or whitespace-only are exempt from uniqueness.
fn sku_key(sku: Option<&str>) -> Option<String> {
    match sku {
        Some(s) if !s.trim().is_empty() => Some(s.to_uppercase()),
        _ => None,
    }
}

pub fn has_duplicate_variants(groups: &[DraftColorGroup]) -> bool {
    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    for g in groups {
        for s in &g.sizes {
            if !seen.insert(pair_key(&g.color, &s.size)) {
                return true;
            }
        }
    }
    false
}

/// Every occurrence of a (color, size) pair beyond its first, in encounter order.
pub fn duplicate_variants(groups: &[DraftColorGroup]) -> Vec<VariantKey> {
    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    let mut out = Vec::new();
    for g in groups {
        for s in &g.sizes {
            if !seen.insert(pair_key(&g.color, &s.size)) {
                out.push(VariantKey { color: g.color.clone(), size: s.size.clone() });
            }
        }
    }
    out
}

pub fn has_unique_skus(groups: &[DraftColorGroup]) -> bool {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    for s in groups.iter().flat_map(|g| g.sizes.iter()) {
        if let Some(key) = sku_key(s.sku.as_deref()) {
            if !seen.insert(key) {
                return false;
            }
        }
    }
    true
}

/// Distinct SKUs that occur more than once, in the casing first seen and in
/// order of first appearance.
pub fn duplicate_skus(groups: &[DraftColorGroup]) -> Vec<String> {
    // upper-cased key -> occurrences; `order` keeps the first spelling
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();
    let mut order: Vec<(String, String)> = Vec::new();
    for s in groups.iter().flat_map(|g| g.sizes.iter()) {
        let Some(key) = sku_key(s.sku.as_deref()) else { continue };
        let n = counts.entry(key.clone()).or_insert(0);
        if *n == 0 {
            order.push((key, s.sku.clone().unwrap_or_default()));
        }
        *n += 1;
    }
    order
        .into_iter()
        .filter(|(key, _)| counts.get(key).copied().unwrap_or(0) > 1)
        .map(|(_, first)| first)
        .collect()
}

pub fn has_stock_available(groups: &[DraftColorGroup]) -> bool {
    groups.iter().any(|g| g.sizes.iter().any(|s| s.stock > 0))
}

/// Run every pre-submit check. Duplicate pairs and SKUs block; zero stock warns.
pub fn validate_draft(groups: &[DraftColorGroup]) -> Result<ValidationReport, ValidationErrors> {
    let errors = ValidationErrors {
        duplicate_variants: duplicate_variants(groups),
        duplicate_skus: duplicate_skus(groups),
    };
    if !errors.is_empty() {
        debug!(
            duplicate_variants = errors.duplicate_variants.len(),
            duplicate_skus = errors.duplicate_skus.len(),
            "draft rejected"
        );
        return Err(errors);
    }
    let mut report = ValidationReport::default();
    if !has_stock_available(groups) {
        warn!("draft has no stock on any variant");
        report.warnings.push(ValidationWarning::NoStock);
    }
    Ok(report)
}
