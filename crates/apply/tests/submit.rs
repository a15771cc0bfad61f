#![forbid(unsafe_code)]

use std::sync::Arc;

use storefront_apply::{
    delete_all_products, delete_product, list_products, load_product, max_image_bytes, upload_variant_images,
    AttachedFile, BlobPreviews, FormGroup, FormSession, ImageContext, ImageStage, SubmitError, SyncOutcome,
};
use storefront_core::{DraftColorGroup, DraftSize, ProductType, Table};
use storefront_persist::SqliteBackend;
use storefront_reconcile::ValidationWarning;
use storefront_store::{BackendError, FailRule, MemoryBackend, Op};

fn jpg(name: &str) -> AttachedFile {
    AttachedFile::new(name, "image/jpeg", vec![0xffu8, 0xd8, 0xff])
}

fn new_tee() -> FormSession {
    let mut s = FormSession::open_new(Arc::new(BlobPreviews));
    s.fields.name = "Classic Tee".into();
    s.fields.slug = "classic-tee".into();
    s.fields.price = 19.5;
    s.fields.product_type = ProductType::Clothes;
    {
        let g = s.group_mut(0).unwrap();
        g.color = "Black".into();
        g.sizes = vec![
            DraftSize { id: None, size: "M".into(), stock: 3, sku: None },
            DraftSize { id: None, size: "L".into(), stock: 0, sku: Some("TEE-BLK-L".into()) },
        ];
    }
    let w = s.add_group();
    {
        let g = s.group_mut(w).unwrap();
        g.color = "White".into();
        g.sizes = vec![DraftSize { id: None, size: "M".into(), stock: 1, sku: None }];
    }
    s
}

#[tokio::test]
async fn new_product_round_trip() {
    let b = MemoryBackend::with_storage("https://cdn.test/public", "product-images");
    let mut s = new_tee();
    s.attach_file(0, jpg("front.jpg")).unwrap();
    s.attach_file(0, jpg("back.jpg")).unwrap();
    s.attach_file(1, jpg("white.png")).unwrap();

    let report = s.submit(&b).await.unwrap();
    assert_eq!(report.changes.creates, 3);
    assert_eq!(report.sync.created.len(), 3);
    assert!(report.warnings.is_empty());
    assert_eq!(report.images.uploaded.len(), 3);
    assert!(report.images.is_clean());
    assert_eq!(s.preview_count(), 0);
    assert!(s.groups().iter().all(|g| g.files.is_empty()));

    let skus: Vec<String> = report.sync.created.iter().filter_map(|v| v.sku.clone()).collect();
    assert!(skus.contains(&"CLASSIC-TEE-BLACK-M".to_string()));
    assert!(skus.contains(&"TEE-BLK-L".to_string()));

    let primary: Vec<_> = report.images.uploaded.iter().filter(|i| i.is_primary).collect();
    assert_eq!(primary.len(), 1);
    assert_eq!(primary[0].alt_text.as_deref(), Some("Classic Tee - Black"));
    assert!(primary[0].image_url.starts_with("https://cdn.test/public/product-images/products/classic-tee-black-"));

    let black_m = report.sync.created.iter().find(|v| v.color.as_deref() == Some("Black") && v.size.as_deref() == Some("M")).unwrap();
    assert!(report.images.uploaded.iter().filter(|i| i.alt_text.as_deref() == Some("Classic Tee - Black")).all(|i| i.variant_id.as_deref() == Some(black_m.id.as_str())));

    let loaded = load_product(&b, &report.product.id).await.unwrap();
    assert_eq!(loaded.product.slug, "classic-tee");
    assert_eq!(loaded.product_variants.len(), 3);
    assert_eq!(loaded.product_images.len(), 3);
    assert!(loaded.product_images[0].is_primary);
}

#[tokio::test]
async fn validation_failure_touches_nothing() {
    let b = MemoryBackend::new();
    let mut s = new_tee();
    s.group_mut(1).unwrap().color = "black".into();
    let err = s.submit(&b).await.unwrap_err();
    match err {
        SubmitError::Validation(v) => assert_eq!(v.duplicate_variants.len(), 1),
        other => panic!("unexpected {other:?}"),
    }
    assert!(b.calls().is_empty());
}

#[tokio::test]
async fn no_stock_is_only_a_warning() {
    let b = MemoryBackend::new();
    let mut s = new_tee();
    for g in 0..2 {
        for size in &mut s.group_mut(g).unwrap().sizes {
            size.stock = 0;
        }
    }
    let report = s.submit(&b).await.unwrap();
    assert_eq!(report.warnings, vec![ValidationWarning::NoStock]);
    assert_eq!(report.sync.created.len(), 3);
}

#[tokio::test]
async fn a_failed_upload_does_not_block_the_next_file() {
    let b = MemoryBackend::new();
    b.push_rule(FailRule::once(Op::Upload, None, BackendError::Storage("quota".into())));
    let mut s = new_tee();
    s.attach_file(0, jpg("one.jpg")).unwrap();
    s.attach_file(0, jpg("two.jpg")).unwrap();
    let report = s.submit(&b).await.unwrap();
    assert_eq!(report.images.failed.len(), 1);
    assert_eq!(report.images.failed[0].file, "one.jpg");
    assert_eq!(report.images.failed[0].stage, ImageStage::Upload);
    assert_eq!(report.images.uploaded.len(), 1);
    assert_eq!(report.images.uploaded[0].display_order, 1);
    assert!(!report.images.uploaded[0].is_primary);
}

#[tokio::test]
async fn sync_failure_reports_the_saved_product() {
    let b = MemoryBackend::new();
    b.push_rule(FailRule::always(Op::BatchInsert, Some(Table::ProductVariants), BackendError::Unavailable("down".into())));
    let err = new_tee().submit(&b).await.unwrap_err();
    match err {
        SubmitError::Sync { product_id, source } => {
            assert!(!product_id.is_empty());
            assert!(source.partial.created.is_empty());
            assert_eq!(b.rows(Table::Products).len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn editing_an_existing_product() {
    let b = MemoryBackend::new();
    let created = new_tee().submit(&b).await.unwrap();
    let product = load_product(&b, &created.product.id).await.unwrap();

    let mut s = FormSession::open_existing(product, Arc::new(BlobPreviews));
    assert!(s.is_editing());
    assert_eq!(s.groups().len(), 2);
    let white = s.groups().iter().position(|g| g.draft.color == "White").unwrap();
    s.remove_group(white).unwrap();
    let black = s.groups().iter().position(|g| g.draft.color == "Black").unwrap();
    s.group_mut(black).unwrap().sizes[0].stock = 99;
    s.fields.price = 25.0;

    b.reset_calls();
    let report = s.submit(&b).await.unwrap();
    assert_eq!(report.changes.updates, 1);
    assert_eq!(report.changes.deletes, 1);
    assert_eq!(report.changes.creates, 0);
    assert_eq!(report.changes.unchanged, 1);
    assert_eq!(report.product.price, 25.0);
    assert!(b.calls().iter().all(|c| c.op != Op::BatchInsert));

    let reloaded = load_product(&b, &created.product.id).await.unwrap();
    assert_eq!(reloaded.product_variants.len(), 2);
}

#[tokio::test]
async fn stale_ids_abort_before_any_write() {
    let b = MemoryBackend::new();
    let mut s = new_tee();
    s.group_mut(0).unwrap().sizes[0].id = Some("ghost".into());
    let err = s.submit(&b).await.unwrap_err();
    assert!(matches!(err, SubmitError::Reconcile(_)));
    assert!(b.calls().is_empty());
}

#[tokio::test]
async fn removing_a_stored_image_deletes_its_row() {
    let b = MemoryBackend::new();
    let mut s = new_tee();
    s.attach_file(0, jpg("front.jpg")).unwrap();
    let created = s.submit(&b).await.unwrap();
    let url = created.images.uploaded[0].image_url.clone();

    let mut edit = FormSession::open_existing(load_product(&b, &created.product.id).await.unwrap(), Arc::new(BlobPreviews));
    let g = edit.groups().iter().position(|g| g.draft.existing_images.contains(&url)).unwrap();
    assert!(edit.remove_existing_image(&b, g, &url).await.unwrap());
    assert!(edit.groups()[g].draft.existing_images.is_empty());
    assert!(b.rows(Table::ProductImages).is_empty());
    assert!(!edit.remove_existing_image(&b, g, &url).await.unwrap());
}

#[tokio::test]
async fn delete_cascades_on_sqlite() {
    let db = SqliteBackend::open_in_memory().unwrap();
    let mut s = new_tee();
    s.attach_file(1, jpg("white.jpg")).unwrap();
    let created = s.submit(&db).await.unwrap();
    assert_eq!(created.images.uploaded.len(), 1);

    let summary = delete_product(&db, &created.product.id).await.unwrap();
    assert_eq!(summary.variants, 3);
    assert_eq!(summary.images, 1);
    let err = load_product(&db, &created.product.id).await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
}

#[tokio::test]
async fn edits_do_not_add_a_second_primary_image() {
    let b = MemoryBackend::new();
    let mut s = new_tee();
    s.attach_file(0, jpg("first.jpg")).unwrap();
    let created = s.submit(&b).await.unwrap();

    let mut edit = FormSession::open_existing(load_product(&b, &created.product.id).await.unwrap(), Arc::new(BlobPreviews));
    edit.attach_file(0, jpg("second.jpg")).unwrap();
    let report = edit.submit(&b).await.unwrap();
    assert_eq!(report.images.uploaded.len(), 1);
    assert!(!report.images.uploaded[0].is_primary);

    let loaded = load_product(&b, &created.product.id).await.unwrap();
    assert_eq!(loaded.product_images.iter().filter(|i| i.is_primary).count(), 1);
}

#[tokio::test]
async fn a_second_submit_edits_the_saved_product() {
    let b = MemoryBackend::new();
    let mut s = new_tee();
    s.attach_file(0, jpg("front.jpg")).unwrap();
    let first = s.submit(&b).await.unwrap();

    assert!(s.is_editing());
    assert!(s.groups().iter().flat_map(|g| &g.draft.sizes).all(|size| size.id.is_some()));
    assert_eq!(s.groups()[0].draft.sizes[0].sku.as_deref(), Some("CLASSIC-TEE-BLACK-M"));
    assert_eq!(s.groups()[0].draft.existing_images, vec![first.images.uploaded[0].image_url.clone()]);

    let unchanged = s.submit(&b).await.unwrap();
    assert_eq!(unchanged.product.id, first.product.id);
    assert_eq!(unchanged.changes.creates, 0);
    assert_eq!(unchanged.changes.updates, 0);
    assert_eq!(unchanged.changes.unchanged, 3);

    s.group_mut(1).unwrap().sizes[0].stock = 7;
    let edited = s.submit(&b).await.unwrap();
    assert_eq!(edited.changes.updates, 1);
    assert_eq!(edited.changes.creates, 0);
    assert_eq!(b.rows(Table::Products).len(), 1);
    assert_eq!(b.rows(Table::ProductVariants).len(), 3);
    assert_eq!(b.rows(Table::ProductImages).len(), 1);
}

#[tokio::test]
async fn retry_after_a_sync_failure_reuses_the_product() {
    let b = MemoryBackend::new();
    b.push_rule(FailRule::once(Op::BatchInsert, Some(Table::ProductVariants), BackendError::Unavailable("down".into())));
    let mut s = new_tee();
    s.attach_file(1, jpg("white.jpg")).unwrap();

    let err = s.submit(&b).await.unwrap_err();
    let saved = match err {
        SubmitError::Sync { product_id, .. } => product_id,
        other => panic!("unexpected {other:?}"),
    };
    assert!(s.is_editing());
    assert_eq!(s.groups()[1].files.len(), 1);

    let report = s.submit(&b).await.unwrap();
    assert_eq!(report.product.id, saved);
    assert_eq!(report.changes.creates, 3);
    assert_eq!(report.images.uploaded.len(), 1);
    assert_eq!(b.rows(Table::Products).len(), 1);
    assert_eq!(b.rows(Table::ProductVariants).len(), 3);
}

#[tokio::test]
async fn a_failed_reload_is_retried_before_the_next_submit() {
    let b = MemoryBackend::new();
    b.push_rule(FailRule::once(Op::SelectEq, Some(Table::Products), BackendError::Unavailable("blip".into())));
    let mut s = new_tee();
    let first = s.submit(&b).await.unwrap();
    assert!(!s.is_editing());

    let second = s.submit(&b).await.unwrap();
    assert_eq!(second.product.id, first.product.id);
    assert_eq!(second.changes.creates, 0);
    assert_eq!(b.rows(Table::Products).len(), 1);
    assert_eq!(b.rows(Table::ProductVariants).len(), 3);
}

#[tokio::test]
async fn a_failed_image_row_does_not_block_the_next_file() {
    let b = MemoryBackend::new();
    b.push_rule(FailRule::once(Op::Insert, Some(Table::ProductImages), BackendError::Conflict("dup".into())));
    let mut s = new_tee();
    s.attach_file(0, jpg("one.jpg")).unwrap();
    s.attach_file(0, jpg("two.jpg")).unwrap();
    let report = s.submit(&b).await.unwrap();

    assert_eq!(report.images.failed.len(), 1);
    assert_eq!(report.images.failed[0].file, "one.jpg");
    assert_eq!(report.images.failed[0].stage, ImageStage::Metadata);
    assert_eq!(report.images.uploaded.len(), 1);
    assert_eq!(report.images.uploaded[0].display_order, 1);
    assert_eq!(b.rows(Table::ProductImages).len(), 1);
}

fn red_group(size_id: Option<&str>, files: Vec<AttachedFile>) -> FormGroup {
    FormGroup {
        draft: DraftColorGroup {
            color: "Red".into(),
            sizes: vec![DraftSize { id: size_id.map(Into::into), size: "S".into(), stock: 1, sku: None }],
            ..Default::default()
        },
        files,
    }
}

fn context(max_image_bytes: usize) -> ImageContext<'static> {
    ImageContext { product_id: "p1", product_name: "Tee", slug: "tee", has_primary: false, max_image_bytes }
}

#[tokio::test]
async fn files_for_an_unresolved_color_are_skipped() {
    let b = MemoryBackend::new();
    let groups = [red_group(None, vec![jpg("red.jpg")])];
    let report = upload_variant_images(&b, &context(max_image_bytes()), &groups, &SyncOutcome::default()).await;
    assert_eq!(report.skipped, vec!["Red".to_string()]);
    assert!(report.uploaded.is_empty());
    assert!(report.failed.is_empty());
    assert!(b.calls().is_empty());
}

#[tokio::test]
async fn oversized_files_are_rejected_without_an_upload() {
    let b = MemoryBackend::new();
    let tiny = AttachedFile::new("tiny.png", "image/png", vec![1u8, 2]);
    let groups = [red_group(Some("v1"), vec![jpg("big.jpg"), tiny])];
    let report = upload_variant_images(&b, &context(2), &groups, &SyncOutcome::default()).await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].file, "big.jpg");
    assert_eq!(report.failed[0].stage, ImageStage::Rejected);
    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.uploaded[0].variant_id.as_deref(), Some("v1"));
    assert_eq!(b.calls().iter().filter(|c| c.op == Op::Upload).count(), 1);
}

async fn submit_shoe(b: &MemoryBackend) -> String {
    let mut s = FormSession::open_new(Arc::new(BlobPreviews));
    s.fields.name = "Runner".into();
    s.fields.slug = "runner".into();
    s.fields.price = 80.0;
    s.fields.product_type = ProductType::Shoes;
    {
        let g = s.group_mut(0).unwrap();
        g.color = "Grey".into();
        g.sizes = vec![DraftSize { id: None, size: "42".into(), stock: 2, sku: None }];
    }
    s.submit(b).await.unwrap().product.id
}

#[tokio::test]
async fn listing_is_newest_first_and_filters_by_type() {
    let b = MemoryBackend::new();
    let mut tee = new_tee();
    tee.attach_file(0, jpg("front.jpg")).unwrap();
    let tee_id = tee.submit(&b).await.unwrap().product.id;
    let shoe_id = submit_shoe(&b).await;

    let all = list_products(&b, None).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|p| p.product.id.as_str()).collect();
    assert_eq!(ids, vec![shoe_id.as_str(), tee_id.as_str()]);
    assert_eq!(all[0].product_variants.len(), 1);
    assert_eq!(all[1].product_variants.len(), 3);
    assert_eq!(all[1].product_images.len(), 1);

    let shoes = list_products(&b, Some(ProductType::Shoes)).await.unwrap();
    assert_eq!(shoes.len(), 1);
    assert_eq!(shoes[0].product.id, shoe_id);
    assert!(list_products(&b, Some(ProductType::Accessories)).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_all_clears_children_first() {
    let b = MemoryBackend::new();
    let mut tee = new_tee();
    tee.attach_file(0, jpg("front.jpg")).unwrap();
    tee.submit(&b).await.unwrap();
    submit_shoe(&b).await;

    b.reset_calls();
    assert_eq!(delete_all_products(&b).await.unwrap(), 2);
    let deletes: Vec<Option<Table>> = b.calls().iter().filter(|c| c.op == Op::BatchDelete).map(|c| c.table).collect();
    assert_eq!(deletes, vec![Some(Table::ProductVariants), Some(Table::ProductImages), Some(Table::Products)]);
    for t in Table::ALL {
        assert!(b.rows(t).is_empty());
    }

    b.reset_calls();
    assert_eq!(delete_all_products(&b).await.unwrap(), 0);
    assert!(b.calls().iter().all(|c| c.op != Op::BatchDelete));
}

#[tokio::test]
async fn list_and_delete_all_on_sqlite() {
    let db = SqliteBackend::open_in_memory().unwrap();
    let mut s = new_tee();
    s.attach_file(1, jpg("white.jpg")).unwrap();
    s.submit(&db).await.unwrap();

    let listed = list_products(&db, Some(ProductType::Clothes)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].product_variants.len(), 3);
    assert_eq!(listed[0].product_images.len(), 1);

    assert_eq!(delete_all_products(&db).await.unwrap(), 1);
    assert!(list_products(&db, None).await.unwrap().is_empty());
}
