#![forbid(unsafe_code)]

use storefront_core::{ChangeSet, FlatVariant, NewVariantRow, SyncPlan, VariantPatch};

use crate::generate_sku;

fn sku_or_default(slug: &str, v: &FlatVariant) -> String {
    match v.sku.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => generate_sku(slug, &v.color, &v.size),
    }
}

fn color_code(v: &FlatVariant) -> Option<String> {
    v.color_code.clone().filter(|c| !c.trim().is_empty())
}

/// Turn a change-set into backend rows. Blank SKUs get the generated default.
pub fn prepare_sync(product_id: &str, slug: &str, changes: &ChangeSet) -> SyncPlan {
    let to_create = changes
        .to_create
        .iter()
        .map(|v| NewVariantRow {
            product_id: product_id.to_string(),
            color: v.color.clone(),
            color_code: color_code(v),
            size: v.size.clone(),
            stock: v.stock,
            sku: sku_or_default(slug, v),
            is_available: true,
        })
        .collect();
    let to_update = changes
        .to_update
        .iter()
        .filter_map(|v| {
            let id = v.id.clone()?;
            Some(VariantPatch {
                id,
                product_id: product_id.to_string(),
                color: v.color.clone(),
                color_code: color_code(v),
                size: v.size.clone(),
                stock: v.stock,
                sku: sku_or_default(slug, v),
                is_available: true,
            })
        })
        .collect();
    SyncPlan { to_create, to_update, to_delete: changes.to_delete.clone() }
}
