//! Image uploads for color groups, run after the variant sync has returned ids.

#![forbid(unsafe_code)]

use bytes::Bytes;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use storefront_core::{slugify, DraftColorGroup, NewImageRow, PersistedVariant, ProductImage, Table, VariantId};
use storefront_store::{from_record, to_record, Backend, BackendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::FormGroup;
use crate::sync::SyncOutcome;

pub type FileId = Uuid;

/// Upload size limit from `STOREFRONT_MAX_IMAGE_BYTES`, 10 MiB by default.
pub fn max_image_bytes() -> usize {
    std::env::var("STOREFRONT_MAX_IMAGE_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(10 * 1024 * 1024)
}

/// A file picked in the form, held in memory until submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub id: FileId,
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl AttachedFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into(), content_type: content_type.into(), bytes: bytes.into() }
    }

    /// Lowercased extension from the file name, `bin` when there is none.
    pub fn extension(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
            _ => "bin".to_string(),
        }
    }
}

/// Product-level values the upload needs.
#[derive(Debug, Clone, Copy)]
pub struct ImageContext<'a> {
    pub product_id: &'a str,
    pub product_name: &'a str,
    pub slug: &'a str,
    /// A primary image is already stored; new uploads never claim the flag.
    pub has_primary: bool,
    /// Files larger than this are rejected without an upload.
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageStage {
    /// Refused locally before any upload.
    Rejected,
    Upload,
    Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageFailure {
    pub color: String,
    pub file: String,
    pub stage: ImageStage,
    pub error: BackendError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UploadReport {
    pub uploaded: Vec<ProductImage>,
    pub failed: Vec<ImageFailure>,
    /// Colors whose files were not uploaded because no variant id was known.
    pub skipped: Vec<String>,
}

impl UploadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

impl std::fmt::Display for UploadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} uploaded, {} failed, {} groups skipped", self.uploaded.len(), self.failed.len(), self.skipped.len())
    }
}

/// Variant a group's images attach to: the first size's id, the group id, or
/// the freshly created variant with the group's color and first size.
pub fn resolve_variant_id(group: &DraftColorGroup, created: &[PersistedVariant]) -> Option<VariantId> {
    if let Some(id) = group.sizes.first().and_then(|s| s.id.clone()).or_else(|| group.id.clone()) {
        return Some(id);
    }
    let first_size = group.sizes.first()?.size.as_str();
    created
        .iter()
        .find(|v| v.color.as_deref() == Some(group.color.as_str()) && v.size.as_deref() == Some(first_size))
        .map(|v| v.id.clone())
}

pub fn object_path(slug: &str, color: &str, millis: i64, group: usize, index: usize, ext: &str) -> String {
    format!("products/{}-{}-{}-{}-{}.{}", slug, slugify(color), millis, group, index, ext)
}

/// Upload every attached file, one at a time, and record an image row for
/// each. A failed file is recorded and the next one is still attempted.
pub async fn upload_variant_images<B: Backend + ?Sized>(
    backend: &B,
    ctx: &ImageContext<'_>,
    groups: &[FormGroup],
    outcome: &SyncOutcome,
) -> UploadReport {
    let mut report = UploadReport::default();
    let t0 = std::time::Instant::now();

    for (group_index, group) in groups.iter().enumerate() {
        if group.files.is_empty() {
            continue;
        }
        let Some(variant_id) = resolve_variant_id(&group.draft, &outcome.created) else {
            warn!(color = %group.draft.color, files = group.files.len(), "no variant for color group; images skipped");
            report.skipped.push(group.draft.color.clone());
            continue;
        };

        for (index, file) in group.files.iter().enumerate() {
            let millis = chrono::Utc::now().timestamp_millis();
            let path = object_path(ctx.slug, &group.draft.color, millis, group_index, index, &file.extension());
            let fail = |stage, error: BackendError| ImageFailure {
                color: group.draft.color.clone(),
                file: file.name.clone(),
                stage,
                error,
            };

            let max_bytes = ctx.max_image_bytes;
            if file.bytes.len() > max_bytes {
                warn!(file = %file.name, size = file.bytes.len(), max_bytes, "image too large");
                report.failed.push(fail(
                    ImageStage::Rejected,
                    BackendError::Storage(format!("{} bytes exceeds the {} byte limit", file.bytes.len(), max_bytes)),
                ));
                continue;
            }

            let url = match backend.upload_object(file.bytes.clone(), &path, &file.content_type).await {
                Ok(url) => url,
                Err(e) => {
                    counter!("image_upload_err", 1u64);
                    warn!(%path, error = %e, "image upload failed");
                    report.failed.push(fail(ImageStage::Upload, e));
                    continue;
                }
            };
            debug!(%path, %url, "object stored");

            let row = NewImageRow {
                product_id: ctx.product_id.to_string(),
                variant_id: Some(variant_id.clone()),
                image_url: url,
                alt_text: Some(format!("{} - {}", ctx.product_name, group.draft.color)),
                is_primary: !ctx.has_primary && group_index == 0 && index == 0,
                display_order: index as u32,
            };
            let inserted = match to_record(&row) {
                Ok(rec) => backend.insert(Table::ProductImages, rec).await.and_then(from_record::<ProductImage>),
                Err(e) => Err(e),
            };
            match inserted {
                Ok(image) => {
                    counter!("image_upload_ok", 1u64);
                    report.uploaded.push(image);
                }
                Err(e) => {
                    counter!("image_upload_err", 1u64);
                    warn!(%path, error = %e, "image metadata insert failed");
                    report.failed.push(fail(ImageStage::Metadata, e));
                }
            }
        }
    }

    histogram!("image_upload_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    if !report.uploaded.is_empty() || !report.is_clean() {
        info!(product_id = ctx.product_id, report = %report, "variant images processed");
    }
    report
}
