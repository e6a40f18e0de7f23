use crate::modules::client::MixerApi;
use crate::modules::image::ImageHandle;
use crate::modules::protocol::{ClipId, Composition, LayerId};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipKey {
    pub layer_id: LayerId,
    pub clip_id: ClipId,
}

pub type ThumbnailMap = BTreeMap<ClipKey, ImageHandle>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading { generation: u64 },
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub key: ClipKey,
    pub layer_index: usize,
    pub clip_index: usize,
}

#[derive(Debug, Clone)]
pub struct ThumbnailBatch {
    pub generation: u64,
    pub requests: Vec<ThumbnailRequest>,
}

#[derive(Debug)]
pub struct ThumbnailCache {
    state: LoadState,
    generation: u64,
    map: Arc<ThumbnailMap>,
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self {
            state: LoadState::NotLoaded,
            generation: 0,
            map: Arc::new(ThumbnailMap::new()),
        }
    }
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Plans one request per clip. Returns `None` unless the cache is
    /// `NotLoaded`, so repeated polls never fan out again.
    pub fn begin_load(&mut self, composition: &Composition) -> Option<ThumbnailBatch> {
        if self.state != LoadState::NotLoaded {
            return None;
        }
        self.generation += 1;
        self.state = LoadState::Loading {
            generation: self.generation,
        };

        let requests = composition
            .layers
            .iter()
            .enumerate()
            .flat_map(|(layer_index, layer)| {
                layer
                    .clips
                    .iter()
                    .enumerate()
                    .map(move |(clip_index, clip)| ThumbnailRequest {
                        key: ClipKey {
                            layer_id: layer.id,
                            clip_id: clip.id,
                        },
                        layer_index,
                        clip_index,
                    })
            })
            .collect();

        Some(ThumbnailBatch {
            generation: self.generation,
            requests,
        })
    }

    pub fn commit(&mut self, generation: u64, map: ThumbnailMap) -> bool {
        if self.state != (LoadState::Loading { generation }) {
            debug!(generation, "discarding stale thumbnail batch");
            return false;
        }
        self.map = Arc::new(map);
        self.state = LoadState::Loaded;
        true
    }

    pub fn reset(&mut self) {
        self.map = Arc::new(ThumbnailMap::new());
        self.state = LoadState::NotLoaded;
    }

    pub fn map(&self) -> &Arc<ThumbnailMap> {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub fn thumbnail_at<'a>(
    map: &'a ThumbnailMap,
    composition: &Composition,
    layer_index: usize,
    clip_index: usize,
) -> Option<&'a ImageHandle> {
    let layer = composition.layers.get(layer_index)?;
    let clip = layer.clips.get(clip_index)?;
    map.get(&ClipKey {
        layer_id: layer.id,
        clip_id: clip.id,
    })
}

pub async fn fetch_batch(api: &dyn MixerApi, batch: ThumbnailBatch) -> (u64, ThumbnailMap) {
    let fetches = batch.requests.iter().map(|req| async move {
        let handle = api
            .fetch_clip_thumbnail(req.layer_index, req.clip_index)
            .await;
        (req.key, handle)
    });

    let map: ThumbnailMap = join_all(fetches)
        .await
        .into_iter()
        .filter_map(|(key, handle)| handle.map(|h| (key, h)))
        .collect();

    debug!(
        generation = batch.generation,
        requested = batch.requests.len(),
        loaded = map.len(),
        "thumbnail batch finished"
    );
    (batch.generation, map)
}
