//! Product rows and their cascading reads/deletes.

#![forbid(unsafe_code)]

use metrics::counter;
use serde::{Deserialize, Serialize};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use storefront_core::{
    PersistedVariant, ProductFields, ProductId, ProductImage, ProductRecord, ProductType, ProductWithDetails, Table,
};
use storefront_store::{from_record, from_records, to_record, Backend, BackendError, BackendResult};
use tracing::{debug, info};

pub async fn create_product<B: Backend + ?Sized>(backend: &B, fields: &ProductFields) -> BackendResult<ProductRecord> {
    let row = backend.insert(Table::Products, to_record(fields)?).await?;
    let product: ProductRecord = from_record(row)?;
    counter!("product_created_total", 1u64);
    info!(product_id = %product.id, slug = %product.slug, "product created");
    Ok(product)
}

pub async fn update_product<B: Backend + ?Sized>(
    backend: &B,
    id: &str,
    fields: &ProductFields,
) -> BackendResult<ProductRecord> {
    let row = backend.update(Table::Products, id, to_record(fields)?).await?;
    let product: ProductRecord = from_record(row)?;
    info!(product_id = %product.id, "product updated");
    Ok(product)
}

pub async fn load_variants<B: Backend + ?Sized>(backend: &B, product_id: &str) -> BackendResult<Vec<PersistedVariant>> {
    from_records(backend.select_eq(Table::ProductVariants, "product_id", &Json::from(product_id)).await?)
}

pub async fn load_images<B: Backend + ?Sized>(backend: &B, product_id: &str) -> BackendResult<Vec<ProductImage>> {
    let mut images: Vec<ProductImage> =
        from_records(backend.select_eq(Table::ProductImages, "product_id", &Json::from(product_id)).await?)?;
    sort_images(&mut images);
    Ok(images)
}

/// Product with its variants and images (primary image first).
pub async fn load_product<B: Backend + ?Sized>(backend: &B, id: &str) -> BackendResult<ProductWithDetails> {
    let rows = backend.select_eq(Table::Products, "id", &Json::from(id)).await?;
    let row = rows.into_iter().next().ok_or_else(|| BackendError::NotFound(format!("{}/{}", Table::Products, id)))?;
    let product: ProductRecord = from_record(row)?;
    let product_variants = load_variants(backend, id).await?;
    let product_images = load_images(backend, id).await?;
    Ok(ProductWithDetails { product, product_variants, product_images })
}

fn sort_images(images: &mut [ProductImage]) {
    images.sort_by_key(|i| (!i.is_primary, i.display_order));
}

/// Every product, newest first, optionally of one type, with variants and
/// images attached.
pub async fn list_products<B: Backend + ?Sized>(
    backend: &B,
    product_type: Option<ProductType>,
) -> BackendResult<Vec<ProductWithDetails>> {
    let rows = match product_type {
        Some(t) => backend.select_eq(Table::Products, "product_type", &Json::from(t.as_str())).await?,
        None => backend.select_all(Table::Products).await?,
    };
    let mut products: Vec<ProductRecord> = from_records(rows)?;
    products.reverse();
    products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if products.is_empty() {
        return Ok(Vec::new());
    }

    let mut variants: FxHashMap<ProductId, Vec<PersistedVariant>> = FxHashMap::default();
    for v in from_records::<PersistedVariant>(backend.select_all(Table::ProductVariants).await?)? {
        if let Some(pid) = v.product_id.clone() {
            variants.entry(pid).or_default().push(v);
        }
    }
    let mut images: FxHashMap<ProductId, Vec<ProductImage>> = FxHashMap::default();
    for i in from_records::<ProductImage>(backend.select_all(Table::ProductImages).await?)? {
        images.entry(i.product_id.clone()).or_default().push(i);
    }

    debug!(products = products.len(), filter = ?product_type, "products listed");
    Ok(products
        .into_iter()
        .map(|product| {
            let product_variants = variants.remove(&product.id).unwrap_or_default();
            let mut product_images = images.remove(&product.id).unwrap_or_default();
            sort_images(&mut product_images);
            ProductWithDetails { product, product_variants, product_images }
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteSummary {
    pub variants: u64,
    pub images: u64,
}

/// Delete a product, its variants and its images. Children go first so no
/// orphan survives a failure halfway through.
pub async fn delete_product<B: Backend + ?Sized>(backend: &B, id: &str) -> BackendResult<DeleteSummary> {
    let key = Json::from(id);
    let variants = backend.delete_where(Table::ProductVariants, "product_id", &key).await?;
    let images = backend.delete_where(Table::ProductImages, "product_id", &key).await?;
    backend.batch_delete(Table::Products, &[id.to_string()]).await?;
    counter!("product_deleted_total", 1u64);
    info!(product_id = id, variants, images, "product deleted");
    Ok(DeleteSummary { variants, images })
}

pub async fn delete_image<B: Backend + ?Sized>(backend: &B, image_id: &str) -> BackendResult<()> {
    backend.batch_delete(Table::ProductImages, &[image_id.to_string()]).await
}

/// Delete every product along with all variant and image rows. Returns the
/// number of products removed.
pub async fn delete_all_products<B: Backend + ?Sized>(backend: &B) -> BackendResult<u64> {
    let products: Vec<ProductRecord> = from_records(backend.select_all(Table::Products).await?)?;
    if products.is_empty() {
        return Ok(0);
    }
    for table in [Table::ProductVariants, Table::ProductImages] {
        let ids: Vec<String> = backend
            .select_all(table)
            .await?
            .iter()
            .filter_map(|r| r.get("id").and_then(Json::as_str).map(str::to_string))
            .collect();
        if !ids.is_empty() {
            backend.batch_delete(table, &ids).await?;
        }
    }
    let ids: Vec<String> = products.into_iter().map(|p| p.id).collect();
    backend.batch_delete(Table::Products, &ids).await?;
    let deleted = ids.len() as u64;
    counter!("product_deleted_total", deleted);
    info!(deleted, "all products deleted");
    Ok(deleted)
}
