use crate::modules::client::{ClientError, MixerApi};
use crate::modules::image::ImageHandle;
use crate::modules::preview::PreviewSlot;
use crate::modules::protocol::Composition;
use crate::modules::reconciler::Reconciler;
use crate::modules::settings::ConnectionSettings;
use crate::modules::thumbnails::{fetch_batch, ThumbnailCache, ThumbnailMap};
use crate::modules::view::{LinkState, SessionView};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);
pub const PREVIEW_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub snapshot_interval: Duration,
    pub preview_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: SNAPSHOT_INTERVAL,
            preview_interval: PREVIEW_INTERVAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is no longer running")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionCommand {
    TriggerClip { layer_index: usize, clip_index: usize },
    ClearLayer { layer_index: usize },
    SetOpacity { layer_index: usize, value: f32 },
    TriggerColumn { column_index: usize },
    ReloadThumbnails,
}

enum Inbound {
    Command(SessionCommand),
    Shutdown,
}

/// Owner-side handle of one connection session.
///
/// Dropping the handle without calling `shutdown` still tears the session
/// down once the actor notices the closed channel.
pub struct SessionHandle {
    tx: mpsc::Sender<Inbound>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
    settings: ConnectionSettings,
}

impl SessionHandle {
    pub fn spawn(api: Arc<dyn MixerApi>, settings: ConnectionSettings, config: PollConfig) -> Self {
        let (view_tx, _) = watch::channel(SessionView::default());
        Self::spawn_with_view(api, settings, config, Arc::new(view_tx))
    }

    pub fn spawn_with_view(
        api: Arc<dyn MixerApi>,
        settings: ConnectionSettings,
        config: PollConfig,
        view_tx: Arc<watch::Sender<SessionView>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let view = view_tx.subscribe();
        let actor = SessionActor::new(api, settings.clone(), config, rx, view_tx);
        actor.publish();
        let task = tokio::spawn(actor.run());
        Self {
            tx,
            view,
            task,
            settings,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx
            .send(Inbound::Command(command))
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn trigger_clip(&self, layer_index: usize, clip_index: usize) -> Result<(), SessionError> {
        self.send(SessionCommand::TriggerClip {
            layer_index,
            clip_index,
        })
        .await
    }

    pub async fn clear_layer(&self, layer_index: usize) -> Result<(), SessionError> {
        self.send(SessionCommand::ClearLayer { layer_index }).await
    }

    pub async fn set_opacity(&self, layer_index: usize, value: f32) -> Result<(), SessionError> {
        self.send(SessionCommand::SetOpacity { layer_index, value })
            .await
    }

    pub async fn trigger_column(&self, column_index: usize) -> Result<(), SessionError> {
        self.send(SessionCommand::TriggerColumn { column_index })
            .await
    }

    pub async fn reload_thumbnails(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ReloadThumbnails).await
    }

    pub async fn shutdown(self) {
        let _ = self.tx.send(Inbound::Shutdown).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "session task ended abnormally");
        }
    }
}

struct SessionActor {
    api: Arc<dyn MixerApi>,
    settings: ConnectionSettings,
    config: PollConfig,
    inbound: mpsc::Receiver<Inbound>,
    view_tx: Arc<watch::Sender<SessionView>>,

    reconciler: Reconciler,
    preview: PreviewSlot,
    thumbnails: ThumbnailCache,
    link: LinkState,
    last_error: Option<String>,

    // One task per poller at most; `Some` means a fetch is in flight.
    snapshot_task: Option<JoinHandle<Result<Composition, ClientError>>>,
    preview_task: Option<JoinHandle<Option<ImageHandle>>>,
    thumbnail_task: Option<JoinHandle<(u64, ThumbnailMap)>>,
}

impl SessionActor {
    fn new(
        api: Arc<dyn MixerApi>,
        settings: ConnectionSettings,
        config: PollConfig,
        inbound: mpsc::Receiver<Inbound>,
        view_tx: Arc<watch::Sender<SessionView>>,
    ) -> Self {
        Self {
            api,
            settings,
            config,
            inbound,
            view_tx,
            reconciler: Reconciler::new(),
            preview: PreviewSlot::new(),
            thumbnails: ThumbnailCache::new(),
            link: LinkState::Idle,
            last_error: None,
            snapshot_task: None,
            preview_task: None,
            thumbnail_task: None,
        }
    }

    async fn run(mut self) {
        info!(endpoint = %self.settings, "session started");

        let mut snapshot_tick = interval(self.config.snapshot_interval);
        snapshot_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut preview_tick = interval(self.config.preview_interval);
        preview_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound::Command(cmd)) => self.handle_command(cmd),
                    Some(Inbound::Shutdown) | None => break,
                },
                res = settle(&mut self.snapshot_task) => {
                    self.snapshot_task = None;
                    self.on_snapshot(res);
                }
                res = settle(&mut self.preview_task) => {
                    self.preview_task = None;
                    self.on_preview(res);
                }
                res = settle(&mut self.thumbnail_task) => {
                    self.thumbnail_task = None;
                    self.on_thumbnails(res);
                }
                _ = snapshot_tick.tick() => self.poll_snapshot(),
                _ = preview_tick.tick() => self.poll_preview(),
            }
        }

        self.teardown().await;
    }

    fn poll_snapshot(&mut self) {
        if self.snapshot_task.is_some() {
            debug!("composition fetch still in flight, skipping tick");
            return;
        }
        let api = Arc::clone(&self.api);
        self.snapshot_task = Some(tokio::spawn(async move { api.fetch_composition().await }));
    }

    fn poll_preview(&mut self) {
        if self.link != LinkState::Connected {
            return;
        }
        if self.preview_task.is_some() {
            debug!("preview fetch still in flight, skipping tick");
            return;
        }
        let api = Arc::clone(&self.api);
        self.preview_task = Some(tokio::spawn(async move { api.fetch_master_thumbnail().await }));
    }

    fn load_thumbnails(&mut self) {
        if self.thumbnail_task.is_some() {
            return;
        }
        let Some(composition) = self.reconciler.composition() else {
            return;
        };
        let Some(batch) = self.thumbnails.begin_load(composition) else {
            return;
        };
        debug!(clips = batch.requests.len(), "loading clip thumbnails");
        let api = Arc::clone(&self.api);
        self.thumbnail_task = Some(tokio::spawn(async move { fetch_batch(&*api, batch).await }));
    }

    fn on_snapshot(&mut self, res: Result<Result<Composition, ClientError>, JoinError>) {
        match res {
            Ok(Ok(composition)) => {
                if self.link != LinkState::Connected {
                    info!(endpoint = %self.settings, layers = composition.layers.len(), "mixer connected");
                }
                self.reconciler.apply_snapshot(composition);
                self.link = LinkState::Connected;
                self.last_error = None;
                self.load_thumbnails();
                self.publish();
            }
            Ok(Err(e)) => self.mark_disconnected(e.to_string()),
            Err(e) => self.mark_disconnected(format!("composition fetch aborted: {e}")),
        }
    }

    fn mark_disconnected(&mut self, reason: String) {
        if self.link != LinkState::Disconnected {
            info!(endpoint = %self.settings, error = %reason, "mixer unreachable");
        } else {
            debug!(error = %reason, "mixer still unreachable");
        }
        self.link = LinkState::Disconnected;
        self.last_error = Some(reason);
        if self.preview.release() {
            debug!("released master preview while disconnected");
        }
        self.publish();
    }

    fn on_preview(&mut self, res: Result<Option<ImageHandle>, JoinError>) {
        match res {
            Ok(Some(handle)) if self.link == LinkState::Connected => {
                self.preview.install(handle);
                self.publish();
            }
            Ok(Some(_)) => debug!("dropping preview that arrived after disconnect"),
            Ok(None) => debug!("preview unavailable, keeping previous image"),
            Err(e) => warn!(error = %e, "preview fetch aborted"),
        }
    }

    fn on_thumbnails(&mut self, res: Result<(u64, ThumbnailMap), JoinError>) {
        match res {
            Ok((generation, map)) => {
                if self.thumbnails.commit(generation, map) {
                    debug!(count = self.thumbnails.len(), "clip thumbnails loaded");
                    self.publish();
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!(error = %e, "thumbnail batch failed, retrying on next poll");
                self.thumbnails.reset();
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let api = Arc::clone(&self.api);
        match command {
            SessionCommand::TriggerClip {
                layer_index,
                clip_index,
            } => {
                tokio::spawn(async move {
                    if let Err(e) = api.trigger_clip(layer_index, clip_index).await {
                        warn!(layer_index, clip_index, error = %e, "failed to trigger clip");
                    }
                });
            }
            SessionCommand::ClearLayer { layer_index } => {
                tokio::spawn(async move {
                    if let Err(e) = api.clear_layer(layer_index).await {
                        warn!(layer_index, error = %e, "failed to clear layer");
                    }
                });
            }
            SessionCommand::SetOpacity { layer_index, value } => {
                if let Some(layer_id) = self.reconciler.apply_optimistic_opacity(layer_index, value) {
                    debug!(layer_index, layer_id, value, "optimistic opacity applied");
                    self.publish();
                }
                tokio::spawn(async move {
                    if let Err(e) = api.set_opacity(layer_index, value).await {
                        warn!(layer_index, value, error = %e, "failed to set opacity");
                    }
                });
            }
            SessionCommand::TriggerColumn { column_index } => {
                tokio::spawn(async move {
                    if let Err(e) = api.trigger_column(column_index).await {
                        warn!(column_index, error = %e, "failed to trigger column");
                    }
                });
            }
            SessionCommand::ReloadThumbnails => {
                if let Some(task) = self.thumbnail_task.take() {
                    task.abort();
                }
                self.thumbnails.reset();
                self.publish();
            }
        }
    }

    fn publish(&self) {
        let view = SessionView {
            settings: self.settings.clone(),
            link: self.link,
            last_error: self.last_error.clone(),
            composition: self.reconciler.composition().cloned(),
            preview: self.preview.current().cloned(),
            thumbnails: Arc::clone(self.thumbnails.map()),
        };
        // The replaced view is dropped here, releasing anything only it referenced.
        drop(self.view_tx.send_replace(view));
    }

    async fn teardown(mut self) {
        abort_and_wait(self.snapshot_task.take()).await;
        abort_and_wait(self.preview_task.take()).await;
        abort_and_wait(self.thumbnail_task.take()).await;

        self.preview.release();
        self.thumbnails.reset();
        self.reconciler.clear();
        self.link = LinkState::Idle;
        self.last_error = None;
        self.publish();

        info!(endpoint = %self.settings, "session stopped");
    }
}

async fn settle<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn abort_and_wait<T>(task: Option<JoinHandle<T>>) {
    if let Some(task) = task {
        task.abort();
        // Resolves once the task's future (and anything it owned) is dropped.
        drop(task.await);
    }
}
