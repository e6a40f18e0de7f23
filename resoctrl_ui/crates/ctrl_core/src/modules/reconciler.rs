use crate::modules::protocol::{Composition, LayerId};
use std::sync::Arc;

/// In-memory composition used for rendering and command dispatch.
///
/// Poll results replace the whole snapshot. Opacity edits made by the user
/// are written straight into the current snapshot so the slider does not
/// wait for a round-trip; the next poll overwrites them with whatever the
/// mixer reports, so a slow mixer can make the value snap back for one tick.
#[derive(Debug, Default)]
pub struct Reconciler {
    composition: Option<Arc<Composition>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_snapshot(&mut self, snapshot: Composition) {
        self.composition = Some(Arc::new(snapshot));
    }

    pub fn apply_optimistic_opacity(&mut self, layer_index: usize, value: f32) -> Option<LayerId> {
        if !value.is_finite() {
            return None;
        }
        let composition = self.composition.as_mut()?;
        let id = composition.layer(layer_index)?.id;
        let layer = Arc::make_mut(composition).layer_by_id_mut(id)?;
        layer.opacity = value.clamp(0.0, 1.0);
        Some(id)
    }

    pub fn composition(&self) -> Option<&Arc<Composition>> {
        self.composition.as_ref()
    }

    pub fn clear(&mut self) {
        self.composition = None;
    }
}
