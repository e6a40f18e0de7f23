use crate::modules::client::{ClientError, MixerApi, MixerClient};
use crate::modules::image::HandleRegistry;
use crate::modules::session::{PollConfig, SessionCommand, SessionError, SessionHandle};
use crate::modules::settings::{ConnectionSettings, SettingsError, SettingsStore};
use crate::modules::view::SessionView;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

pub type ApiFactory = Arc<
    dyn Fn(&ConnectionSettings, Arc<HandleRegistry>) -> Result<Arc<dyn MixerApi>, ClientError>
        + Send
        + Sync,
>;

pub fn http_factory() -> ApiFactory {
    let http = reqwest::Client::new();
    Arc::new(
        move |settings: &ConnectionSettings,
              registry: Arc<HandleRegistry>|
              -> Result<Arc<dyn MixerApi>, ClientError> {
            let client = MixerClient::with_http(http.clone(), settings, registry)?;
            Ok(Arc::new(client))
        },
    )
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct Controller {
    store: SettingsStore,
    registry: Arc<HandleRegistry>,
    factory: ApiFactory,
    config: PollConfig,
    view_tx: Arc<watch::Sender<SessionView>>,
    settings: ConnectionSettings,
    session: Option<SessionHandle>,
}

impl Controller {
    pub fn new(store: SettingsStore, factory: ApiFactory, config: PollConfig) -> Self {
        let (view_tx, _) = watch::channel(SessionView::default());
        Self {
            store,
            registry: HandleRegistry::new(),
            factory,
            config,
            view_tx: Arc::new(view_tx),
            settings: ConnectionSettings::default(),
            session: None,
        }
    }

    pub fn with_http(store: SettingsStore, config: PollConfig) -> Self {
        Self::new(store, http_factory(), config)
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> SessionView {
        self.view_tx.borrow().clone()
    }

    pub async fn start(&mut self) -> Result<(), ControllerError> {
        let settings = self.store.load().await;
        self.start_with(settings).await
    }

    pub async fn start_with(&mut self, settings: ConnectionSettings) -> Result<(), ControllerError> {
        settings.validate()?;
        let api = (self.factory)(&settings, Arc::clone(&self.registry))?;
        self.stop_session().await;
        self.spawn_session(api, settings);
        Ok(())
    }

    /// Persists `settings` and restarts the session against them. The old
    /// session is fully torn down before the new one begins polling.
    pub async fn apply_settings(
        &mut self,
        settings: ConnectionSettings,
    ) -> Result<(), ControllerError> {
        settings.validate()?;
        let api = (self.factory)(&settings, Arc::clone(&self.registry))?;
        self.store.save(&settings).await?;
        info!(from = %self.settings, to = %settings, "applying connection settings");
        self.stop_session().await;
        self.spawn_session(api, settings);
        Ok(())
    }

    pub async fn send(&self, command: SessionCommand) -> Result<(), ControllerError> {
        let session = self.session.as_ref().ok_or(SessionError::Closed)?;
        session.send(command).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.stop_session().await;
    }

    fn spawn_session(&mut self, api: Arc<dyn MixerApi>, settings: ConnectionSettings) {
        self.settings = settings.clone();
        self.session = Some(SessionHandle::spawn_with_view(
            api,
            settings,
            self.config,
            Arc::clone(&self.view_tx),
        ));
    }

    async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
    }
}
