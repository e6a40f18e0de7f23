use crate::modules::image::{HandleRegistry, ImageHandle, ImageSlot};
use crate::modules::protocol::{Composition, ParamUpdate};
use crate::modules::settings::ConnectionSettings;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mixer request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("composition parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid mixer endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Request/response surface of the mixer's HTTP API.
///
/// All indices are zero-based; implementations translate them to the
/// mixer's one-based path segments. Image fetches never fail: any problem
/// is reported as `None`, since missing thumbnails are a normal state.
#[async_trait]
pub trait MixerApi: Send + Sync {
    async fn fetch_composition(&self) -> Result<Composition, ClientError>;
    async fn trigger_clip(&self, layer_index: usize, clip_index: usize) -> Result<(), ClientError>;
    async fn clear_layer(&self, layer_index: usize) -> Result<(), ClientError>;
    async fn set_opacity(&self, layer_index: usize, value: f32) -> Result<(), ClientError>;
    async fn trigger_column(&self, column_index: usize) -> Result<(), ClientError>;
    async fn fetch_clip_thumbnail(
        &self,
        layer_index: usize,
        clip_index: usize,
    ) -> Option<ImageHandle>;
    async fn fetch_master_thumbnail(&self) -> Option<ImageHandle>;
}

pub struct MixerClient {
    http: reqwest::Client,
    base: Url,
    registry: Arc<HandleRegistry>,
}

impl MixerClient {
    pub fn new(
        settings: &ConnectionSettings,
        registry: Arc<HandleRegistry>,
    ) -> Result<Self, ClientError> {
        Self::with_http(reqwest::Client::new(), settings, registry)
    }

    pub fn with_http(
        http: reqwest::Client,
        settings: &ConnectionSettings,
        registry: Arc<HandleRegistry>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base: base_url(settings)?,
            registry,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::BadStatus { status, body });
        }
        Ok(resp)
    }

    async fn fetch_image(&self, url: Url, slot: ImageSlot) -> Option<ImageHandle> {
        let resp = match self.http.get(url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(%url, error = %e, "image fetch failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            debug!(%url, status = %resp.status(), "image not available");
            return None;
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(%url, error = %e, "image body read failed");
                return None;
            }
        };
        if bytes.is_empty() {
            debug!(%url, "image body empty");
            return None;
        }
        Some(self.registry.allocate(slot, bytes, content_type))
    }
}

#[async_trait]
impl MixerApi for MixerClient {
    async fn fetch_composition(&self) -> Result<Composition, ClientError> {
        let url = self.endpoint(&["composition"]);
        let resp = self.send(self.http.get(url)).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn trigger_clip(&self, layer_index: usize, clip_index: usize) -> Result<(), ClientError> {
        let layer = one_based(layer_index);
        let clip = one_based(clip_index);
        let url = self.endpoint(&["composition", "layers", &layer, "clips", &clip, "connect"]);
        self.send(self.http.post(url)).await.map(drop)
    }

    async fn clear_layer(&self, layer_index: usize) -> Result<(), ClientError> {
        let layer = one_based(layer_index);
        let url = self.endpoint(&["composition", "layers", &layer, "clear"]);
        self.send(self.http.post(url)).await.map(drop)
    }

    async fn set_opacity(&self, layer_index: usize, value: f32) -> Result<(), ClientError> {
        if !value.is_finite() {
            return Err(ClientError::InvalidValue(format!("opacity {value}")));
        }
        let layer = one_based(layer_index);
        let url = self.endpoint(&["composition", "layers", &layer, "video", "opacity"]);
        let body = ParamUpdate {
            value: value.clamp(0.0, 1.0),
        };
        self.send(self.http.put(url).json(&body)).await.map(drop)
    }

    async fn trigger_column(&self, column_index: usize) -> Result<(), ClientError> {
        let column = one_based(column_index);
        let url = self.endpoint(&["composition", "columns", &column, "connect"]);
        self.send(self.http.post(url)).await.map(drop)
    }

    async fn fetch_clip_thumbnail(
        &self,
        layer_index: usize,
        clip_index: usize,
    ) -> Option<ImageHandle> {
        let layer = one_based(layer_index);
        let clip = one_based(clip_index);
        let url = self.endpoint(&["composition", "layers", &layer, "clips", &clip, "thumbnail"]);
        self.fetch_image(
            url,
            ImageSlot::Thumbnail {
                layer_index,
                clip_index,
            },
        )
        .await
    }

    async fn fetch_master_thumbnail(&self) -> Option<ImageHandle> {
        let mut url = self.endpoint(&["composition", "thumbnail"]);
        url.query_pairs_mut()
            .append_pair("t", &unix_millis().to_string());
        self.fetch_image(url, ImageSlot::MasterPreview).await
    }
}

pub fn base_url(settings: &ConnectionSettings) -> Result<Url, ClientError> {
    let host = settings.host.trim();
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    let endpoint = format!("http://{host}:{}/api/v1", settings.port);
    let url = Url::parse(&endpoint).map_err(|e| ClientError::InvalidEndpoint {
        endpoint: endpoint.clone(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ClientError::InvalidEndpoint {
            endpoint,
            reason: "not a base url".to_string(),
        });
    }
    Ok(url)
}

fn one_based(index: usize) -> String {
    (index + 1).to_string()
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server, registry: &Arc<HandleRegistry>) -> MixerClient {
        let host_port = server.host_with_port();
        let (host, port) = host_port.rsplit_once(':').unwrap();
        let settings = ConnectionSettings::new(host, port.parse().unwrap());
        MixerClient::new(&settings, Arc::clone(registry)).unwrap()
    }

    #[test]
    fn base_url_from_settings() {
        let url = base_url(&ConnectionSettings::new("10.0.0.2", 8080)).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.2:8080/api/v1");

        let v6 = base_url(&ConnectionSettings::new("::1", 8080)).unwrap();
        assert_eq!(v6.as_str(), "http://[::1]:8080/api/v1");

        let bad = base_url(&ConnectionSettings::new("bad host", 8080)).unwrap_err();
        assert!(matches!(bad, ClientError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    async fn fetch_composition_decodes_snapshot() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/composition")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "name": { "value": "Test" },
                    "layers": [{
                        "id": 1,
                        "name": { "value": "L1" },
                        "video": { "opacity": { "value": 1.0 } },
                        "clips": [{ "id": 10, "name": { "value": "C1" }, "connected": { "value": false } }]
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let registry = HandleRegistry::new();
        let comp = client_for(&server, &registry)
            .fetch_composition()
            .await
            .expect("composition should decode");

        mock.assert_async().await;
        assert_eq!(comp.name, "Test");
        assert_eq!(comp.layers[0].clips[0].id, 10);
    }

    #[tokio::test]
    async fn fetch_composition_reports_bad_status_and_bad_json() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/composition")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;
        let registry = HandleRegistry::new();
        let client = client_for(&server, &registry);
        match client.fetch_composition().await {
            Err(ClientError::BadStatus { status, body }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "busy");
            }
            other => panic!("expected bad status, got {other:?}"),
        }

        let mut garbled = Server::new_async().await;
        let _m = garbled
            .mock("GET", "/api/v1/composition")
            .with_status(200)
            .with_body("{ not json")
            .create_async()
            .await;
        assert!(matches!(
            client_for(&garbled, &registry).fetch_composition().await,
            Err(ClientError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn commands_use_one_based_paths() {
        let mut server = Server::new_async().await;
        let trigger = server
            .mock("POST", "/api/v1/composition/layers/1/clips/1/connect")
            .with_status(204)
            .create_async()
            .await;
        let clear = server
            .mock("POST", "/api/v1/composition/layers/3/clear")
            .with_status(204)
            .create_async()
            .await;
        let column = server
            .mock("POST", "/api/v1/composition/columns/5/connect")
            .with_status(204)
            .create_async()
            .await;

        let registry = HandleRegistry::new();
        let client = client_for(&server, &registry);
        client.trigger_clip(0, 0).await.unwrap();
        client.clear_layer(2).await.unwrap();
        client.trigger_column(4).await.unwrap();

        trigger.assert_async().await;
        clear.assert_async().await;
        column.assert_async().await;
    }

    #[tokio::test]
    async fn set_opacity_puts_clamped_value() {
        let mut server = Server::new_async().await;
        let exact = server
            .mock("PUT", "/api/v1/composition/layers/1/video/opacity")
            .match_body(Matcher::Json(json!({ "value": 0.3 })))
            .with_status(204)
            .create_async()
            .await;
        let clamped = server
            .mock("PUT", "/api/v1/composition/layers/2/video/opacity")
            .match_body(Matcher::Json(json!({ "value": 1.0 })))
            .with_status(204)
            .create_async()
            .await;

        let registry = HandleRegistry::new();
        let client = client_for(&server, &registry);
        client.set_opacity(0, 0.3).await.unwrap();
        client.set_opacity(1, 1.7).await.unwrap();
        assert!(matches!(
            client.set_opacity(0, f32::NAN).await,
            Err(ClientError::InvalidValue(_))
        ));

        exact.assert_async().await;
        clamped.assert_async().await;
    }

    #[tokio::test]
    async fn command_failure_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v1/composition/layers/1/clear")
            .with_status(404)
            .create_async()
            .await;
        let registry = HandleRegistry::new();
        let err = client_for(&server, &registry)
            .clear_layer(0)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BadStatus { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn clip_thumbnail_allocates_handle() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/composition/layers/3/clips/6/thumbnail")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![0x89, b'P', b'N', b'G'])
            .create_async()
            .await;

        let registry = HandleRegistry::new();
        let handle = client_for(&server, &registry)
            .fetch_clip_thumbnail(2, 5)
            .await
            .expect("thumbnail should be present");

        mock.assert_async().await;
        assert_eq!(handle.content_type(), Some("image/png"));
        assert_eq!(handle.bytes().as_ref(), &[0x89, b'P', b'N', b'G']);
        assert_eq!(
            handle.slot(),
            ImageSlot::Thumbnail {
                layer_index: 2,
                clip_index: 5
            }
        );
        assert_eq!(registry.live_thumbnails(), 1);
        drop(handle);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn missing_or_empty_images_are_absent() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/api/v1/composition/layers/3/clips/6/thumbnail")
            .with_status(404)
            .create_async()
            .await;
        let _empty = server
            .mock("GET", "/api/v1/composition/layers/1/clips/1/thumbnail")
            .with_status(200)
            .create_async()
            .await;

        let registry = HandleRegistry::new();
        let client = client_for(&server, &registry);
        assert!(client.fetch_clip_thumbnail(2, 5).await.is_none());
        assert!(client.fetch_clip_thumbnail(0, 0).await.is_none());
        assert_eq!(registry.allocated(), 0);
    }

    #[tokio::test]
    async fn master_thumbnail_carries_cache_buster() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/composition/thumbnail")
            .match_query(Matcher::Regex(r"^t=\d+$".to_string()))
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(vec![0xff, 0xd8, 0xff])
            .create_async()
            .await;

        let registry = HandleRegistry::new();
        let handle = client_for(&server, &registry)
            .fetch_master_thumbnail()
            .await
            .expect("preview should be present");

        mock.assert_async().await;
        assert_eq!(handle.slot(), ImageSlot::MasterPreview);
        assert_eq!(registry.live_previews(), 1);
    }

    #[tokio::test]
    async fn unreachable_mixer() {
        let registry = HandleRegistry::new();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client =
            MixerClient::new(&ConnectionSettings::new("127.0.0.1", port), registry.clone())
                .unwrap();
        assert!(matches!(
            client.fetch_composition().await,
            Err(ClientError::Http(_))
        ));
        assert!(client.fetch_master_thumbnail().await.is_none());
        assert_eq!(registry.allocated(), 0);
    }
}
