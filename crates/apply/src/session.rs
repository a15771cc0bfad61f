//! Product form session: draft state, attached files and their previews.

#![forbid(unsafe_code)]

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use storefront_core::{
    DraftColorGroup, DraftSize, PersistedVariant, ProductFields, ProductId, ProductWithDetails, VariantId,
};
use storefront_reconcile::group_variants;
use storefront_store::{Backend, BackendResult};
use tracing::{debug, trace, warn};

use crate::images::{AttachedFile, FileId};
use crate::products::{delete_image, load_product};
use crate::submit::{submit_product, SubmitError, SubmitReport};

/// Creates and revokes temporary preview URLs for attached files.
pub trait PreviewSink: Send + Sync {
    fn create(&self, file: &AttachedFile) -> String;
    fn revoke(&self, url: &str);
}

/// Default sink: opaque `blob:` handles with nothing behind them to free.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlobPreviews;

impl PreviewSink for BlobPreviews {
    fn create(&self, file: &AttachedFile) -> String {
        format!("blob:storefront/{}", file.id)
    }

    fn revoke(&self, url: &str) {
        trace!(url, "preview revoked");
    }
}

/// Live preview URLs, one per attached file. Everything still held is
/// revoked on drop.
pub struct PreviewRegistry {
    sink: Arc<dyn PreviewSink>,
    urls: FxHashMap<FileId, String>,
}

impl PreviewRegistry {
    pub fn new(sink: Arc<dyn PreviewSink>) -> Self {
        Self { sink, urls: FxHashMap::default() }
    }

    /// Preview for `file`, created on first request.
    pub fn acquire(&mut self, file: &AttachedFile) -> String {
        let sink = &self.sink;
        self.urls.entry(file.id).or_insert_with(|| sink.create(file)).clone()
    }

    pub fn get(&self, id: FileId) -> Option<&str> {
        self.urls.get(&id).map(String::as_str)
    }

    pub fn release(&mut self, id: FileId) -> bool {
        match self.urls.remove(&id) {
            Some(url) => {
                self.sink.revoke(&url);
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) -> usize {
        let n = self.urls.len();
        for (_, url) in self.urls.drain() {
            self.sink.revoke(&url);
        }
        n
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl Drop for PreviewRegistry {
    fn drop(&mut self) {
        let n = self.release_all();
        if n > 0 {
            debug!(released = n, "previews released on drop");
        }
    }
}

/// A color group as edited in the form, with files waiting for upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormGroup {
    pub draft: DraftColorGroup,
    pub files: Vec<AttachedFile>,
}

impl FormGroup {
    fn blank() -> Self {
        Self {
            draft: DraftColorGroup { sizes: vec![DraftSize::default()], ..Default::default() },
            files: Vec::new(),
        }
    }
}

impl From<DraftColorGroup> for FormGroup {
    fn from(draft: DraftColorGroup) -> Self {
        Self { draft, files: Vec::new() }
    }
}

pub struct FormSession {
    pub fields: ProductFields,
    groups: Vec<FormGroup>,
    original: Option<ProductWithDetails>,
    previews: PreviewRegistry,
    /// Saved product whose reload failed; reloaded before the next submit.
    stale: Option<ProductId>,
}

impl FormSession {
    /// Empty form: one blank color group with one blank size.
    pub fn open_new(sink: Arc<dyn PreviewSink>) -> Self {
        Self {
            fields: ProductFields { is_active: true, ..Default::default() },
            groups: vec![FormGroup::blank()],
            original: None,
            previews: PreviewRegistry::new(sink),
            stale: None,
        }
    }

    /// Form seeded from a stored product, grouped by color.
    pub fn open_existing(product: ProductWithDetails, sink: Arc<dyn PreviewSink>) -> Self {
        let mut groups: Vec<FormGroup> =
            group_variants(&product.product_variants, &product.product_images).into_iter().map(FormGroup::from).collect();
        if groups.is_empty() {
            groups.push(FormGroup::blank());
        }
        Self {
            fields: ProductFields::from(&product.product),
            groups,
            original: Some(product),
            previews: PreviewRegistry::new(sink),
            stale: None,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.original.is_some()
    }

    pub fn original(&self) -> Option<&ProductWithDetails> {
        self.original.as_ref()
    }

    pub fn groups(&self) -> &[FormGroup] {
        &self.groups
    }

    pub fn group_mut(&mut self, group: usize) -> Option<&mut DraftColorGroup> {
        self.groups.get_mut(group).map(|g| &mut g.draft)
    }

    pub fn preview_count(&self) -> usize {
        self.previews.len()
    }

    /// Append a blank group; returns its index.
    pub fn add_group(&mut self) -> usize {
        self.groups.push(FormGroup::blank());
        self.groups.len() - 1
    }

    /// Remove a group and release the previews of its files.
    pub fn remove_group(&mut self, group: usize) -> Option<FormGroup> {
        if group >= self.groups.len() {
            return None;
        }
        let removed = self.groups.remove(group);
        for f in &removed.files {
            self.previews.release(f.id);
        }
        Some(removed)
    }

    pub fn add_size(&mut self, group: usize) -> bool {
        match self.groups.get_mut(group) {
            Some(g) => {
                g.draft.sizes.push(DraftSize::default());
                true
            }
            None => false,
        }
    }

    /// A group always keeps at least one size.
    pub fn remove_size(&mut self, group: usize, size: usize) -> bool {
        match self.groups.get_mut(group) {
            Some(g) if g.draft.sizes.len() > 1 && size < g.draft.sizes.len() => {
                g.draft.sizes.remove(size);
                true
            }
            _ => false,
        }
    }

    /// Attach a file to a group; returns its preview URL.
    pub fn attach_file(&mut self, group: usize, file: AttachedFile) -> Option<String> {
        let g = self.groups.get_mut(group)?;
        let url = self.previews.acquire(&file);
        g.files.push(file);
        Some(url)
    }

    pub fn remove_file(&mut self, group: usize, index: usize) -> Option<AttachedFile> {
        let g = self.groups.get_mut(group)?;
        if index >= g.files.len() {
            return None;
        }
        let file = g.files.remove(index);
        self.previews.release(file.id);
        Some(file)
    }

    /// Drop an already stored image from a group, deleting its row when the
    /// product exists. Returns whether a row was deleted.
    pub async fn remove_existing_image<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        group: usize,
        url: &str,
    ) -> BackendResult<bool> {
        let image_id = self
            .original
            .as_ref()
            .and_then(|p| p.product_images.iter().find(|i| i.image_url == url))
            .map(|i| i.id.clone());
        if let Some(id) = &image_id {
            delete_image(backend, id).await?;
            if let Some(p) = self.original.as_mut() {
                p.product_images.retain(|i| &i.id != id);
            }
        }
        if let Some(g) = self.groups.get_mut(group) {
            g.draft.existing_images.retain(|u| u != url);
        }
        Ok(image_id.is_some())
    }

    /// Point the draft at what is stored: sizes written by the last submit
    /// take their new ids and generated SKUs, ids no longer stored are
    /// dropped, and the stored product becomes the diff base.
    fn rebase(&mut self, product: ProductWithDetails) {
        let stored: FxHashSet<&str> = product.product_variants.iter().map(|v| v.id.as_str()).collect();
        let mut claimed: FxHashSet<VariantId> = FxHashSet::default();
        for g in &mut self.groups {
            let d = &mut g.draft;
            if d.id.as_deref().map_or(false, |id| !stored.contains(id)) {
                d.id = None;
            }
            for size in &mut d.sizes {
                if size.id.as_deref().map_or(false, |id| !stored.contains(id)) {
                    size.id = None;
                }
                if let Some(id) = &size.id {
                    claimed.insert(id.clone());
                }
            }
            if let Some(id) = &d.id {
                if d.sizes.iter().any(|s| s.id.is_none()) {
                    claimed.insert(id.clone());
                }
            }
        }

        for g in &mut self.groups {
            let d = &mut g.draft;
            if d.id.is_some() {
                continue;
            }
            let color = d.color.as_str();
            for size in d.sizes.iter_mut().filter(|s| s.id.is_none()) {
                let found = product.product_variants.iter().find(|v| {
                    !claimed.contains(&v.id)
                        && v.color.as_deref() == Some(color)
                        && v.size.as_deref() == Some(size.size.as_str())
                });
                if let Some(v) = found {
                    claimed.insert(v.id.clone());
                    size.id = Some(v.id.clone());
                }
            }
        }

        let by_id: FxHashMap<&str, &PersistedVariant> =
            product.product_variants.iter().map(|v| (v.id.as_str(), v)).collect();
        for g in &mut self.groups {
            let d = &mut g.draft;
            for size in d.sizes.iter_mut().filter(|s| s.sku.is_none()) {
                if let Some(v) = size.id.as_deref().and_then(|id| by_id.get(id)) {
                    size.sku = v.sku.clone();
                }
            }
            let ids: FxHashSet<&str> = d.sizes.iter().filter_map(|s| s.id.as_deref()).chain(d.id.as_deref()).collect();
            d.existing_images = product
                .product_images
                .iter()
                .filter(|img| img.variant_id.as_deref().map_or(false, |id| ids.contains(id)))
                .map(|img| img.image_url.clone())
                .collect();
        }
        self.fields = ProductFields::from(&product.product);
        self.stale = None;
        self.original = Some(product);
    }

    async fn reload<B: Backend + ?Sized>(&mut self, backend: &B, product_id: ProductId) -> BackendResult<()> {
        match load_product(backend, &product_id).await {
            Ok(product) => {
                self.rebase(product);
                Ok(())
            }
            Err(e) => {
                self.stale = Some(product_id);
                Err(e)
            }
        }
    }

    /// Validate and persist the form. Once the product row is written the
    /// session reloads it, so a later submit edits that product instead of
    /// creating another one. Uploaded files and their previews are cleared on
    /// success; after a variant sync failure the draft is kept for a retry.
    pub async fn submit<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<SubmitReport, SubmitError> {
        if let Some(id) = self.stale.take() {
            self.reload(backend, id).await.map_err(SubmitError::Product)?;
        }

        let result = submit_product(backend, &self.fields, &self.groups, self.original.as_ref()).await;
        let saved = match &result {
            Ok(report) => Some(report.product.id.clone()),
            Err(SubmitError::Sync { product_id, .. }) => Some(product_id.clone()),
            Err(_) => None,
        };
        if result.is_ok() {
            for g in &mut self.groups {
                g.files.clear();
            }
            self.previews.release_all();
        }
        if let Some(id) = saved {
            if let Err(e) = self.reload(backend, id.clone()).await {
                warn!(product_id = %id, error = %e, "reload after submit failed; retried before the next submit");
            }
        }
        result
    }
}
