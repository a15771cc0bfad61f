#![forbid(unsafe_code)]

use rustc_hash::FxHashSet;
use storefront_core::{DraftColorGroup, DraftSize, PersistedVariant, ProductImage};

/// Group label used for variants stored without a color.
pub const DEFAULT_COLOR: &str = "Default";

/// Seed an editor draft from persisted variants: one group per color in
/// first-seen order, one size entry per variant carrying that variant's id.
/// Images attached to any variant of a color are listed on its group.
///
/// Variants stored without a color land under [`DEFAULT_COLOR`]; diffing the
/// seeded draft then reports them as updates that write that label.
pub fn group_variants(variants: &[PersistedVariant], images: &[ProductImage]) -> Vec<DraftColorGroup> {
    let mut groups: Vec<DraftColorGroup> = Vec::new();
    let mut members: Vec<FxHashSet<&str>> = Vec::new();

    for v in variants {
        let color = v.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string());
        let idx = match groups.iter().position(|g| g.color == color) {
            Some(i) => i,
            None => {
                groups.push(DraftColorGroup {
                    id: None,
                    color,
                    color_code: v.color_code.clone().filter(|c| !c.is_empty()),
                    sizes: Vec::new(),
                    existing_images: Vec::new(),
                });
                members.push(FxHashSet::default());
                groups.len() - 1
            }
        };
        groups[idx].sizes.push(DraftSize {
            id: Some(v.id.clone()),
            size: v.size.clone().unwrap_or_default(),
            stock: v.stock,
            sku: v.sku.clone(),
        });
        members[idx].insert(v.id.as_str());
    }

    for (g, ids) in groups.iter_mut().zip(members.iter()) {
        g.existing_images = images
            .iter()
            .filter(|img| img.variant_id.as_deref().map(|id| ids.contains(id)).unwrap_or(false))
            .map(|img| img.image_url.clone())
            .collect();
    }
    groups
}
