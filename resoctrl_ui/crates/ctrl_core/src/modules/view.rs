use crate::modules::image::ImageHandle;
use crate::modules::protocol::{ClipId, Composition, LayerId};
use crate::modules::settings::ConnectionSettings;
use crate::modules::thumbnails::{thumbnail_at, ThumbnailMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub settings: ConnectionSettings,
    pub link: LinkState,
    pub last_error: Option<String>,
    pub composition: Option<Arc<Composition>>,
    pub preview: Option<Arc<ImageHandle>>,
    pub thumbnails: Arc<ThumbnailMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerRow {
    pub index: usize,
    pub id: LayerId,
    pub name: String,
    pub opacity: f32,
    pub clips: Vec<ClipCell>,
}

impl LayerRow {
    pub fn opacity_percent(&self) -> u8 {
        (self.opacity.clamp(0.0, 1.0) * 100.0).round() as u8
    }

    pub fn active_clip(&self) -> Option<&ClipCell> {
        self.clips.iter().find(|c| c.active)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipCell {
    pub index: usize,
    pub id: ClipId,
    pub name: String,
    pub active: bool,
    pub thumbnail_uri: Option<String>,
}

impl SessionView {
    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    pub fn status_line(&self) -> String {
        if self.is_connected() {
            "Connected".to_string()
        } else {
            format!("Attempting connection to {}...", self.settings)
        }
    }

    pub fn composition_name(&self) -> Option<&str> {
        self.composition.as_deref().map(Composition::display_name)
    }

    pub fn column_count(&self) -> usize {
        self.composition
            .as_deref()
            .map(Composition::column_count)
            .unwrap_or(0)
    }

    pub fn thumbnail_at(&self, layer_index: usize, clip_index: usize) -> Option<&ImageHandle> {
        let composition = self.composition.as_deref()?;
        thumbnail_at(&self.thumbnails, composition, layer_index, clip_index)
    }

    pub fn rows(&self) -> Vec<LayerRow> {
        let Some(composition) = self.composition.as_deref() else {
            return Vec::new();
        };
        composition
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| LayerRow {
                index,
                id: layer.id,
                name: layer.display_name(index),
                opacity: layer.opacity,
                clips: layer
                    .clips
                    .iter()
                    .enumerate()
                    .map(|(clip_index, clip)| ClipCell {
                        index: clip_index,
                        id: clip.id,
                        name: clip.display_name().to_string(),
                        active: clip.connected,
                        thumbnail_uri: thumbnail_at(
                            &self.thumbnails,
                            composition,
                            index,
                            clip_index,
                        )
                        .map(ImageHandle::uri),
                    })
                    .collect(),
            })
            .collect()
    }
}
