//! Storefront core types: products, persisted variants, editor drafts and change-sets.

#![forbid(unsafe_code)]

pub mod slug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use slug::slugify;

pub type ProductId = String;
pub type VariantId = String;
pub type ImageId = String;

/// Backend tables the storefront touches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Products,
    ProductVariants,
    ProductImages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Products => "products",
            Table::ProductVariants => "product_variants",
            Table::ProductImages => "product_images",
        }
    }

    pub const ALL: [Table; 3] = [Table::Products, Table::ProductVariants, Table::ProductImages];
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown product type: {0}")]
    UnknownProductType(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    #[default]
    Clothes,
    Shoes,
    Accessories,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Clothes => "clothes",
            ProductType::Shoes => "shoes",
            ProductType::Accessories => "accessories",
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ProductType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clothes" => Ok(ProductType::Clothes),
            "shoes" => Ok(ProductType::Shoes),
            "accessories" => Ok(ProductType::Accessories),
            _ => Err(CoreError::UnknownProductType(s.to_string())),
        }
    }
}

/// A product row as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub compare_at_price: Option<f64>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub product_type: ProductType,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Editable product fields; used both for creation and full updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProductFields {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub compare_at_price: Option<f64>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub product_type: ProductType,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl From<&ProductRecord> for ProductFields {
    fn from(p: &ProductRecord) -> Self {
        Self {
            name: p.name.clone(),
            slug: p.slug.clone(),
            description: p.description.clone(),
            price: p.price,
            compare_at_price: p.compare_at_price,
            category_id: p.category_id.clone(),
            product_type: p.product_type,
            brand: p.brand.clone(),
            material: p.material.clone(),
            is_featured: p.is_featured,
            is_active: p.is_active,
        }
    }
}

/// A variant row as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedVariant {
    pub id: VariantId,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub color_code: Option<String>,
    #[serde(default)]
    pub price_override: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductImage {
    pub id: ImageId,
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub image_url: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub display_order: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Product together with its variants and images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductWithDetails {
    #[serde(flatten)]
    pub product: ProductRecord,
    #[serde(default)]
    pub product_variants: Vec<PersistedVariant>,
    #[serde(default)]
    pub product_images: Vec<ProductImage>,
}

/// One size entry inside a draft color group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DraftSize {
    /// Persisted id this entry was seeded from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VariantId>,
    pub size: String,
    #[serde(default)]
    pub stock: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

/// Editor draft: one color with its ordered sizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DraftColorGroup {
    /// Group-level id; applies to size entries that carry none of their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VariantId>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_code: Option<String>,
    #[serde(default)]
    pub sizes: Vec<DraftSize>,
    /// URLs of images already stored for this color.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing_images: Vec<String>,
}

/// A draft flattened to one record per (color, size) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlatVariant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VariantId>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_code: Option<String>,
    pub size: String,
    pub stock: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

/// A (color, size) pair, used when reporting duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub color: String,
    pub size: String,
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.color, self.size)
    }
}

/// Difference between persisted variants and an edited draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSet {
    pub to_create: Vec<FlatVariant>,
    pub to_update: Vec<FlatVariant>,
    pub to_delete: Vec<VariantId>,
    /// Originals retained as-is; no operation is emitted for them.
    #[serde(default)]
    pub unchanged: Vec<VariantId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            creates: self.to_create.len(),
            updates: self.to_update.len(),
            deletes: self.to_delete.len(),
            unchanged: self.unchanged.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.creates, self.updates, self.deletes, self.unchanged
        )
    }
}

/// Variant row ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewVariantRow {
    pub product_id: ProductId,
    pub color: String,
    pub color_code: Option<String>,
    pub size: String,
    pub stock: u32,
    pub sku: String,
    pub is_available: bool,
}

/// Full replacement of the editable columns of one variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantPatch {
    #[serde(skip)]
    pub id: VariantId,
    pub product_id: ProductId,
    pub color: String,
    pub color_code: Option<String>,
    pub size: String,
    pub stock: u32,
    pub sku: String,
    pub is_available: bool,
}

/// Backend-ready form of a change-set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_create: Vec<NewVariantRow>,
    pub to_update: Vec<VariantPatch>,
    pub to_delete: Vec<VariantId>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Image metadata row written after a successful object upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewImageRow {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub image_url: String,
    pub alt_text: Option<String>,
    pub is_primary: bool,
    pub display_order: u32,
}

fn default_true() -> bool {
    true
}

pub mod prelude {
    pub use super::{
        ChangeSet, ChangeSummary, DraftColorGroup, DraftSize, FlatVariant, NewImageRow, NewVariantRow,
        PersistedVariant, ProductFields, ProductId, ProductImage, ProductRecord, ProductType,
        ProductWithDetails, SyncPlan, Table, VariantId, VariantKey, VariantPatch,
    };
}
