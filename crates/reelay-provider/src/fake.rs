//! Scripted provider for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::asset::{AssetErrors, AssetSnapshot, AssetStatus, AssetTrack, PlaybackId};
use crate::error::ProviderError;
use crate::provider::ProcessingProvider;

pub fn preparing_asset(id: &str, playback_id: &str) -> AssetSnapshot {
    AssetSnapshot {
        id: id.to_string(),
        status: AssetStatus::Preparing,
        playback_ids: vec![PlaybackId {
            id: playback_id.to_string(),
            policy: Some("public".to_string()),
        }],
        duration: None,
        aspect_ratio: None,
        max_stored_frame_rate: None,
        tracks: Vec::new(),
        static_renditions: None,
        errors: None,
        passthrough: None,
    }
}

pub fn ready_asset(id: &str, playback_id: &str) -> AssetSnapshot {
    AssetSnapshot {
        status: AssetStatus::Ready,
        duration: Some(12.0),
        aspect_ratio: Some("16:9".to_string()),
        max_stored_frame_rate: Some(30.0),
        tracks: vec![
            AssetTrack {
                id: Some(format!("{}-video", id)),
                kind: Some("video".to_string()),
                max_width: Some(1920),
                max_height: Some(1080),
                ..Default::default()
            },
            AssetTrack {
                id: Some(format!("{}-audio", id)),
                kind: Some("audio".to_string()),
                ..Default::default()
            },
        ],
        ..preparing_asset(id, playback_id)
    }
}

pub fn errored_asset(id: &str) -> AssetSnapshot {
    AssetSnapshot {
        status: AssetStatus::Errored,
        playback_ids: Vec::new(),
        errors: Some(AssetErrors {
            kind: Some("invalid_input".to_string()),
            messages: vec!["The input file could not be decoded".to_string()],
        }),
        ..preparing_asset(id, "")
    }
}

#[derive(Default)]
struct FakeState {
    create_script: VecDeque<Result<AssetSnapshot, ProviderError>>,
    poll_script: VecDeque<Result<AssetSnapshot, ProviderError>>,
    assets: HashMap<String, AssetSnapshot>,
    texts: HashMap<String, String>,
    caption_result: Option<Result<String, ProviderError>>,
    audio_result: Option<Result<String, ProviderError>>,
    created: u32,
    create_calls: u32,
    poll_calls: u32,
    caption_requests: Vec<(String, String)>,
}

/// In-process provider whose responses are scripted by the test.
///
/// Without a script, `create_asset` returns a fresh preparing asset and
/// `get_asset` returns the last stored snapshot for that id.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn script_creates(&self, results: Vec<Result<AssetSnapshot, ProviderError>>) {
        self.state().create_script.extend(results);
    }

    pub fn script_polls(&self, results: Vec<Result<AssetSnapshot, ProviderError>>) {
        self.state().poll_script.extend(results);
    }

    pub fn set_asset(&self, asset: AssetSnapshot) {
        self.state().assets.insert(asset.id.clone(), asset);
    }

    pub fn set_text(&self, url: &str, body: &str) {
        self.state().texts.insert(url.to_string(), body.to_string());
    }

    pub fn set_caption_result(&self, result: Result<String, ProviderError>) {
        self.state().caption_result = Some(result);
    }

    pub fn set_audio_result(&self, result: Result<String, ProviderError>) {
        self.state().audio_result = Some(result);
    }

    pub fn create_calls(&self) -> u32 {
        self.state().create_calls
    }

    pub fn poll_calls(&self) -> u32 {
        self.state().poll_calls
    }

    pub fn caption_requests(&self) -> Vec<(String, String)> {
        self.state().caption_requests.clone()
    }
}

#[async_trait]
impl ProcessingProvider for FakeProvider {
    async fn create_asset(
        &self,
        _input_url: &str,
        passthrough: &str,
    ) -> Result<AssetSnapshot, ProviderError> {
        let mut state = self.state();
        state.create_calls += 1;
        let result = match state.create_script.pop_front() {
            Some(result) => result,
            None => {
                state.created += 1;
                let n = state.created;
                Ok(preparing_asset(&format!("asset-{}", n), &format!("playback-{}", n)))
            }
        };
        result.map(|mut asset| {
            asset.passthrough = Some(passthrough.to_string());
            state.assets.insert(asset.id.clone(), asset.clone());
            asset
        })
    }

    async fn get_asset(&self, asset_id: &str) -> Result<AssetSnapshot, ProviderError> {
        let mut state = self.state();
        state.poll_calls += 1;
        match state.poll_script.pop_front() {
            Some(Ok(asset)) => {
                state.assets.insert(asset.id.clone(), asset.clone());
                Ok(asset)
            }
            Some(Err(e)) => Err(e),
            None => state
                .assets
                .get(asset_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(asset_id.to_string())),
        }
    }

    async fn request_captions(
        &self,
        asset_id: &str,
        language: &str,
    ) -> Result<String, ProviderError> {
        let mut state = self.state();
        state
            .caption_requests
            .push((asset_id.to_string(), language.to_string()));
        let n = state.caption_requests.len();
        state
            .caption_result
            .clone()
            .unwrap_or_else(|| Ok(format!("track-{}", n)))
    }

    async fn request_audio_enhancement(&self, _asset_id: &str) -> Result<String, ProviderError> {
        self.state()
            .audio_result
            .clone()
            .unwrap_or(Err(ProviderError::Unsupported("audio enhancement")))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ProviderError> {
        self.state()
            .texts
            .get(url)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(url.to_string()))
    }

    fn thumbnail_url(&self, playback_id: &str) -> String {
        format!("https://image.test/{}/thumbnail.jpg", playback_id)
    }

    fn stream_url(&self, playback_id: &str) -> String {
        format!("https://stream.test/{}.m3u8", playback_id)
    }

    fn download_url(&self, playback_id: &str) -> String {
        format!("https://stream.test/{}/capped-1080p.mp4", playback_id)
    }

    fn text_track_url(&self, playback_id: &str, track_id: &str) -> String {
        format!("https://stream.test/{}/text/{}.vtt", playback_id, track_id)
    }
}
