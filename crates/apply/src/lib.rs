//! Storefront apply: pushes reconciled variant changes, product rows and
//! images to a [`storefront_store::Backend`].
//!
//! - [`sync_variants`] runs the create/update/delete batches concurrently.
//! - [`upload_variant_images`] uploads attached files one at a time.
//! - [`FormSession`] holds an editing session and submits it.

#![forbid(unsafe_code)]

pub mod images;
pub mod products;
pub mod session;
pub mod submit;
pub mod sync;

pub use images::{
    max_image_bytes, object_path, resolve_variant_id, upload_variant_images, AttachedFile, FileId, ImageContext, ImageFailure,
    ImageStage, UploadReport,
};
pub use products::{
    create_product, delete_all_products, delete_image, delete_product, list_products, load_images, load_product,
    load_variants, update_product, DeleteSummary,
};
pub use session::{BlobPreviews, FormGroup, FormSession, PreviewRegistry, PreviewSink};
pub use submit::{submit_product, SubmitError, SubmitReport};
pub use sync::{sync_variants, SyncFailure, SyncOutcome, SyncStage};
