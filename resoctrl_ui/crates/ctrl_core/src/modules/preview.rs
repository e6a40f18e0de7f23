use crate::modules::image::{ImageHandle, ImageId};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct PreviewSlot {
    current: Option<Arc<ImageHandle>>,
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, handle: ImageHandle) -> Option<ImageId> {
        let previous = self.current.replace(Arc::new(handle));
        previous.map(|old| old.id())
    }

    pub fn release(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn current(&self) -> Option<&Arc<ImageHandle>> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::image::{HandleRegistry, ImageSlot};
    use bytes::Bytes;

    #[test]
    fn install_supersedes_previous_synchronously() {
        let registry = HandleRegistry::new();
        let mut slot = PreviewSlot::new();

        let first = registry.allocate(ImageSlot::MasterPreview, Bytes::from_static(b"1"), None);
        let first_id = first.id();
        assert_eq!(slot.install(first), None);
        assert_eq!(registry.live_previews(), 1);

        let second = registry.allocate(ImageSlot::MasterPreview, Bytes::from_static(b"2"), None);
        assert_eq!(slot.install(second), Some(first_id));
        assert!(!registry.is_live(first_id));
        assert_eq!(registry.live_previews(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = HandleRegistry::new();
        let mut slot = PreviewSlot::new();
        slot.install(registry.allocate(ImageSlot::MasterPreview, Bytes::from_static(b"1"), None));

        assert!(slot.release());
        assert!(!slot.release());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.released(), 1);
    }
}
