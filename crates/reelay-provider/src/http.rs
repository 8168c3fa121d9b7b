//! REST client for a Mux-compatible video API.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reelay_core::Config;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::asset::{AssetSnapshot, AssetTrack};
use crate::error::ProviderError;
use crate::provider::ProcessingProvider;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_RENDITION: &str = "capped-1080p.mp4";

#[derive(Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub token_id: String,
    pub token_secret: String,
    pub playback_policy: String,
    pub image_base_url: String,
    pub stream_base_url: String,
    pub request_timeout: Duration,
}

impl Debug for HttpProviderConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HttpProviderConfig")
            .field("base_url", &self.base_url)
            .field("token_id", &self.token_id)
            .field("playback_policy", &self.playback_policy)
            .finish()
    }
}

impl HttpProviderConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.provider_base_url().trim_end_matches('/').to_string(),
            token_id: config.provider_token_id().to_string(),
            token_secret: config.provider_token_secret().to_string(),
            playback_policy: config.provider_playback_policy().to_string(),
            image_base_url: config.provider_image_base_url().trim_end_matches('/').to_string(),
            stream_base_url: config.provider_stream_base_url().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

pub struct HttpProvider {
    http_client: Client,
    config: HttpProviderConfig,
}

impl Debug for HttpProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HttpProvider")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client for processing provider")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request
            .basic_auth(&self.config.token_id, Some(&self.config.token_secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ProcessingProvider for HttpProvider {
    #[tracing::instrument(skip(self, input_url), fields(provider.operation = "create_asset"))]
    async fn create_asset(
        &self,
        input_url: &str,
        passthrough: &str,
    ) -> Result<AssetSnapshot, ProviderError> {
        let body = json!({
            "input": [{ "url": input_url }],
            "playback_policy": [self.config.playback_policy],
            "mp4_support": "capped-1080p",
            "passthrough": passthrough,
        });

        let asset: AssetSnapshot = self
            .send(self.http_client.post(self.url("/video/v1/assets")).json(&body))
            .await?;

        tracing::info!(
            external_asset_id = %asset.id,
            status = asset.status.as_str(),
            "Provider asset created"
        );
        Ok(asset)
    }

    #[tracing::instrument(skip(self), fields(provider.operation = "get_asset"))]
    async fn get_asset(&self, asset_id: &str) -> Result<AssetSnapshot, ProviderError> {
        self.send(
            self.http_client
                .get(self.url(&format!("/video/v1/assets/{}", asset_id))),
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(provider.operation = "request_captions"))]
    async fn request_captions(
        &self,
        asset_id: &str,
        language: &str,
    ) -> Result<String, ProviderError> {
        let asset = self.get_asset(asset_id).await?;
        let audio_track_id = asset
            .audio_track()
            .and_then(|t| t.id.clone())
            .ok_or(ProviderError::Unsupported("captions for assets without audio"))?;

        let body = json!({
            "generated_subtitles": [{
                "language_code": language,
                "name": format!("{} (generated)", language),
            }]
        });

        let tracks: Vec<AssetTrack> = self
            .send(
                self.http_client
                    .post(self.url(&format!(
                        "/video/v1/assets/{}/tracks/{}/generate-subtitles",
                        asset_id, audio_track_id
                    )))
                    .json(&body),
            )
            .await?;

        tracks
            .into_iter()
            .find_map(|t| t.id)
            .ok_or_else(|| ProviderError::InvalidResponse("no caption track returned".to_string()))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ProviderError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                format!("GET {}", url),
            ));
        }
        Ok(response.text().await?)
    }

    fn thumbnail_url(&self, playback_id: &str) -> String {
        format!(
            "{}/{}/thumbnail.jpg?time=1",
            self.config.image_base_url, playback_id
        )
    }

    fn stream_url(&self, playback_id: &str) -> String {
        format!("{}/{}.m3u8", self.config.stream_base_url, playback_id)
    }

    fn download_url(&self, playback_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.stream_base_url, playback_id, DOWNLOAD_RENDITION
        )
    }

    fn text_track_url(&self, playback_id: &str, track_id: &str) -> String {
        format!(
            "{}/{}/text/{}.vtt",
            self.config.stream_base_url, playback_id, track_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(server: &mockito::ServerGuard) -> HttpProvider {
        HttpProvider::new(HttpProviderConfig {
            base_url: server.url(),
            token_id: "id".to_string(),
            token_secret: "secret".to_string(),
            playback_policy: "public".to_string(),
            image_base_url: "https://image.test".to_string(),
            stream_base_url: "https://stream.test".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_asset_unwraps_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/video/v1/assets")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "input": [{ "url": "https://uploads.test/a.mp4" }],
                "passthrough": "video-1"
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": {
                        "id": "asset-1",
                        "status": "preparing",
                        "playback_ids": [{ "id": "pb-1", "policy": "public" }]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let asset = provider(&server)
            .create_asset("https://uploads.test/a.mp4", "video-1")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(asset.id, "asset-1");
        assert_eq!(asset.playback_id(), Some("pb-1"));
    }

    #[tokio::test]
    async fn test_server_errors_are_transient_and_missing_assets_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/video/v1/assets/busy")
            .with_status(503)
            .create_async()
            .await;
        server
            .mock("GET", "/video/v1/assets/gone")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/video/v1/assets/bad")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let provider = provider(&server);
        assert!(provider.get_asset("busy").await.unwrap_err().is_transient());
        assert!(matches!(
            provider.get_asset("gone").await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            provider.get_asset("bad").await,
            Err(ProviderError::Rejected { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_request_captions_targets_audio_track() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/video/v1/assets/asset-1")
            .with_status(200)
            .with_body(
                json!({
                    "data": {
                        "id": "asset-1",
                        "status": "ready",
                        "tracks": [
                            { "type": "video", "id": "v-1" },
                            { "type": "audio", "id": "audio-1" }
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let generate = server
            .mock(
                "POST",
                "/video/v1/assets/asset-1/tracks/audio-1/generate-subtitles",
            )
            .with_status(201)
            .with_body(
                json!({ "data": [{ "id": "text-1", "type": "text", "status": "preparing" }] })
                    .to_string(),
            )
            .create_async()
            .await;

        let track_id = provider(&server)
            .request_captions("asset-1", "en")
            .await
            .unwrap();

        generate.assert_async().await;
        assert_eq!(track_id, "text-1");
    }

    #[test]
    fn test_playback_urls() {
        let provider = HttpProvider::new(HttpProviderConfig {
            base_url: "http://provider.test".to_string(),
            token_id: String::new(),
            token_secret: String::new(),
            playback_policy: "public".to_string(),
            image_base_url: "https://image.test".to_string(),
            stream_base_url: "https://stream.test".to_string(),
            request_timeout: Duration::from_secs(1),
        })
        .unwrap();

        assert_eq!(
            provider.thumbnail_url("pb"),
            "https://image.test/pb/thumbnail.jpg?time=1"
        );
        assert_eq!(provider.stream_url("pb"), "https://stream.test/pb.m3u8");
        assert_eq!(
            provider.text_track_url("pb", "t1"),
            "https://stream.test/pb/text/t1.vtt"
        );
    }
}
