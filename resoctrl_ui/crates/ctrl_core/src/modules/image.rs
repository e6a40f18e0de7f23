use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;

pub type ImageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSlot {
    MasterPreview,
    Thumbnail { layer_index: usize, clip_index: usize },
}

/// Tracks every image handle allocated by this process.
///
/// A handle is registered on allocation and removed exactly once when it is
/// dropped, so `live_count()` is the number of images still held by an owner
/// or by a published view.
#[derive(Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    allocated: AtomicU64,
    released: AtomicU64,
    live: Mutex<HashMap<ImageId, ImageSlot>>,
}

impl HandleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocate(
        self: &Arc<Self>,
        slot: ImageSlot,
        bytes: Bytes,
        content_type: Option<String>,
    ) -> ImageHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock_live().insert(id, slot);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        ImageHandle {
            id,
            slot,
            bytes,
            content_type,
            registry: Arc::clone(self),
        }
    }

    fn release(&self, id: ImageId) {
        if self.lock_live().remove(&id).is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
        } else {
            error!(image_id = id, "release of an image handle that is not live");
        }
    }

    pub fn live_count(&self) -> usize {
        self.lock_live().len()
    }

    pub fn live_previews(&self) -> usize {
        self.lock_live()
            .values()
            .filter(|s| matches!(s, ImageSlot::MasterPreview))
            .count()
    }

    pub fn live_thumbnails(&self) -> usize {
        self.lock_live()
            .values()
            .filter(|s| matches!(s, ImageSlot::Thumbnail { .. }))
            .count()
    }

    pub fn is_live(&self, id: ImageId) -> bool {
        self.lock_live().contains_key(&id)
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<ImageId, ImageSlot>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("allocated", &self.allocated())
            .field("released", &self.released())
            .field("live", &self.live_count())
            .finish()
    }
}

pub struct ImageHandle {
    id: ImageId,
    slot: ImageSlot,
    bytes: Bytes,
    content_type: Option<String>,
    registry: Arc<HandleRegistry>,
}

impl ImageHandle {
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn slot(&self) -> ImageSlot {
        self.slot
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn uri(&self) -> String {
        format!("resoctrl://image/{}", self.id)
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_releases_exactly_once() {
        let registry = HandleRegistry::new();
        let a = registry.allocate(ImageSlot::MasterPreview, Bytes::from_static(b"a"), None);
        let b = registry.allocate(
            ImageSlot::Thumbnail {
                layer_index: 0,
                clip_index: 1,
            },
            Bytes::from_static(b"bb"),
            Some("image/png".to_string()),
        );
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.live_count(), 2);
        assert_eq!(registry.live_previews(), 1);
        assert_eq!(registry.live_thumbnails(), 1);

        let a_id = a.id();
        drop(a);
        assert!(!registry.is_live(a_id));
        assert_eq!(registry.released(), 1);

        let shared = Arc::new(b);
        let view_copy = Arc::clone(&shared);
        drop(shared);
        assert_eq!(registry.live_count(), 1, "still referenced by the view");
        drop(view_copy);

        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.allocated(), 2);
        assert_eq!(registry.released(), 2);
    }

    #[test]
    fn uri_is_stable_per_handle() {
        let registry = HandleRegistry::new();
        let h = registry.allocate(ImageSlot::MasterPreview, Bytes::from_static(b"x"), None);
        assert_eq!(h.uri(), format!("resoctrl://image/{}", h.id()));
        assert_eq!(h.len(), 1);
    }
}
