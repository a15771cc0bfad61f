//! Flattening and change detection between persisted variants and a draft.

#![forbid(unsafe_code)]

use rustc_hash::{FxHashMap, FxHashSet};
use storefront_core::{ChangeSet, DraftColorGroup, FlatVariant, PersistedVariant};
use tracing::debug;

use crate::ReconcileError;

/// Absent and empty strings compare equal.
pub fn normalize(v: Option<&str>) -> &str {
    v.unwrap_or("")
}

/// One record per (color, size), outer group order then inner size order.
/// A size entry's own id wins over the group id.
pub fn flatten(groups: &[DraftColorGroup]) -> Vec<FlatVariant> {
    groups
        .iter()
        .flat_map(|g| {
            g.sizes.iter().map(move |s| FlatVariant {
                id: s.id.clone().or_else(|| g.id.clone()),
                color: g.color.clone(),
                color_code: g.color_code.clone(),
                size: s.size.clone(),
                stock: s.stock,
                sku: s.sku.clone(),
            })
        })
        .collect()
}

fn differs(original: &PersistedVariant, v: &FlatVariant) -> bool {
    normalize(original.color.as_deref()) != v.color
        || normalize(original.size.as_deref()) != v.size
        || original.stock != v.stock
        || normalize(original.sku.as_deref()) != normalize(v.sku.as_deref())
        || normalize(original.color_code.as_deref()) != normalize(v.color_code.as_deref())
}

/// Classify every original as unchanged, updated or deleted, and every id-less
/// draft record as a create.
pub fn detect_variant_changes(
    original: &[PersistedVariant],
    draft: &[DraftColorGroup],
) -> Result<ChangeSet, ReconcileError> {
    let by_id: FxHashMap<&str, &PersistedVariant> = original.iter().map(|o| (o.id.as_str(), o)).collect();
    let mut cs = ChangeSet::default();
    let mut kept: FxHashSet<String> = FxHashSet::default();

    for v in flatten(draft) {
        let Some(id) = v.id.clone() else {
            cs.to_create.push(v);
            continue;
        };
        let Some(orig) = by_id.get(id.as_str()) else {
            return Err(ReconcileError::UnknownVariantId(id));
        };
        if !kept.insert(id.clone()) {
            return Err(ReconcileError::DuplicateVariantId(id));
        }
        if differs(orig, &v) {
            cs.to_update.push(v);
        } else {
            cs.unchanged.push(id);
        }
    }

    cs.to_delete = original.iter().filter(|o| !kept.contains(&o.id)).map(|o| o.id.clone()).collect();
    debug!(summary = %cs.summary(), "variant changes detected");
    Ok(cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::DraftSize;

    fn orig(id: &str, color: Option<&str>, size: Option<&str>, stock: u32, sku: Option<&str>) -> PersistedVariant {
        PersistedVariant {
            id: id.into(),
            product_id: Some("p1".into()),
            color: color.map(Into::into),
            size: size.map(Into::into),
            stock,
            sku: sku.map(Into::into),
            color_code: None,
            price_override: None,
            weight: None,
            is_available: true,
            created_at: None,
            updated_at: None,
        }
    }

    fn sized(id: Option<&str>, size: &str, stock: u32, sku: Option<&str>) -> DraftSize {
        DraftSize { id: id.map(Into::into), size: size.into(), stock, sku: sku.map(Into::into) }
    }

    #[test]
    fn flatten_keeps_order_and_propagates_fields() {
        let draft = vec![
            DraftColorGroup {
                id: Some("g".into()),
                color: "Black".into(),
                color_code: Some("#000".into()),
                sizes: vec![sized(None, "S", 1, None), sized(Some("own"), "M", 2, Some("K"))],
                ..Default::default()
            },
            DraftColorGroup { color: "White".into(), sizes: vec![sized(None, "L", 3, None)], ..Default::default() },
        ];
        let flat = flatten(&draft);
        let labels: Vec<_> = flat.iter().map(|f| format!("{}/{}", f.color, f.size)).collect();
        assert_eq!(labels, vec!["Black/S", "Black/M", "White/L"]);
        assert_eq!(flat[0].id.as_deref(), Some("g"));
        assert_eq!(flat[1].id.as_deref(), Some("own"));
        assert_eq!(flat[1].color_code.as_deref(), Some("#000"));
        assert_eq!(flat[2].id, None);
        assert_eq!(flatten(&draft), flat);
    }

    #[test]
    fn null_and_empty_compare_equal() {
        let o = orig("1", None, Some("M"), 1, None);
        let v = FlatVariant { id: Some("1".into()), color: "".into(), color_code: Some("".into()), size: "M".into(), stock: 1, sku: Some("".into()) };
        assert!(!differs(&o, &v));
    }

    #[test]
    fn color_code_change_is_an_update() {
        let mut o = orig("1", Some("Black"), Some("M"), 1, None);
        o.color_code = Some("#000000".into());
        let draft = vec![DraftColorGroup {
            id: Some("1".into()),
            color: "Black".into(),
            color_code: Some("#111111".into()),
            sizes: vec![sized(None, "M", 1, None)],
            ..Default::default()
        }];
        let cs = detect_variant_changes(&[o], &draft).unwrap();
        assert_eq!(cs.to_update.len(), 1);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let draft = vec![DraftColorGroup { id: Some("ghost".into()), color: "Red".into(), sizes: vec![sized(None, "M", 1, None)], ..Default::default() }];
        let err = detect_variant_changes(&[], &draft).unwrap_err();
        assert_eq!(err, ReconcileError::UnknownVariantId("ghost".into()));
    }

    #[test]
    fn group_id_fanned_over_sizes_is_an_error() {
        let o = orig("1", Some("Red"), Some("S"), 1, None);
        let draft = vec![DraftColorGroup {
            id: Some("1".into()),
            color: "Red".into(),
            sizes: vec![sized(None, "S", 1, None), sized(None, "M", 1, None)],
            ..Default::default()
        }];
        let err = detect_variant_changes(&[o], &draft).unwrap_err();
        assert_eq!(err, ReconcileError::DuplicateVariantId("1".into()));
    }
}
