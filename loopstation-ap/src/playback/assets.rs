//! Decoded asset store
//!
//! Fetches each track's bytes (HTTP or the root folder), decodes them on the
//! blocking pool and resamples to the context rate. Loading is all-or-nothing:
//! new buffers enter the cache only when every requested track succeeded,
//! and the cache lock is held for the whole load so a track is never decoded
//! twice for the same rate.

use crate::audio::{AudioBuffer, Resampler, SimpleDecoder};
use crate::config::TrackConfig;
use crate::error::{Error, Result};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Immutable identity of a configured loop
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    pub id: String,
    /// `http(s)://` URL, or a path relative to the root folder
    pub url: String,
    pub initial_level: f32,
}

impl From<&TrackConfig> for TrackDescriptor {
    fn from(config: &TrackConfig) -> Self {
        Self {
            id: config.id.clone(),
            url: config.url.clone(),
            initial_level: config.initial_level,
        }
    }
}

impl TrackDescriptor {
    pub fn is_remote(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }

    /// File extension of the URL path, used as a format hint
    pub fn extension(&self) -> Option<String> {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

/// Fetches raw asset bytes
pub struct AssetLoader {
    http: reqwest::Client,
    root_folder: PathBuf,
}

impl AssetLoader {
    pub fn new(root_folder: PathBuf) -> Self {
        Self {
            http: reqwest::Client::new(),
            root_folder,
        }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Resolve a local URL against the root folder (leading `/` stripped)
    pub fn local_path(&self, url: &str) -> PathBuf {
        self.root_folder.join(url.trim_start_matches('/'))
    }

    /// Fetch the raw bytes of one track
    pub async fn fetch(&self, track: &TrackDescriptor) -> Result<Vec<u8>> {
        let load_err = |reason: String| Error::AssetLoad {
            track_id: track.id.clone(),
            reason,
        };

        if track.is_remote() {
            debug!("Fetching '{}' from {}", track.id, track.url);
            let response = self
                .http
                .get(&track.url)
                .send()
                .await
                .map_err(|e| load_err(format!("request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(load_err(format!("HTTP {}", status)));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| load_err(format!("reading body failed: {}", e)))?;
            return Ok(bytes.to_vec());
        }

        let path = self.local_path(&track.url);
        debug!("Reading '{}' from {}", track.id, path.display());
        tokio::fs::read(&path)
            .await
            .map_err(|e| load_err(format!("{}: {}", path.display(), e)))
    }

    /// Fetch, decode, and resample one track to `sample_rate`
    pub async fn load(&self, track: &TrackDescriptor, sample_rate: u32) -> Result<AudioBuffer> {
        let bytes = self.fetch(track).await?;
        let track_id = track.id.clone();
        let extension = track.extension();

        tokio::task::spawn_blocking(move || {
            let decoded = SimpleDecoder::decode_bytes(&track_id, bytes, extension.as_deref())?;
            let samples = Resampler::resample_stereo(
                &track_id,
                &decoded.samples,
                decoded.sample_rate,
                sample_rate,
            )?;
            let buffer = AudioBuffer::from_interleaved_stereo(samples, sample_rate);
            if buffer.is_empty() {
                return Err(Error::Decode {
                    track_id,
                    reason: "decoded audio is empty".to_string(),
                });
            }
            Ok(buffer)
        })
        .await
        .map_err(|e| Error::Internal(format!("decode task failed: {}", e)))?
    }
}

/// Cache of decoded buffers keyed by track id
pub struct AssetStore {
    loader: AssetLoader,
    cache: Mutex<HashMap<String, Arc<AudioBuffer>>>,
    decodes: AtomicUsize,
}

impl AssetStore {
    pub fn new(loader: AssetLoader) -> Self {
        Self {
            loader,
            cache: Mutex::new(HashMap::new()),
            decodes: AtomicUsize::new(0),
        }
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }

    /// Number of successful decodes performed so far
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    /// Cached buffer for a track, if decoded at this rate
    pub async fn get(&self, track_id: &str) -> Option<Arc<AudioBuffer>> {
        self.cache.lock().await.get(track_id).cloned()
    }

    /// Load every track, in order.
    ///
    /// # Errors
    /// The first `AssetLoad` / `Decode` failure; nothing is cached in that case.
    pub async fn load_all(
        &self,
        tracks: &[TrackDescriptor],
        sample_rate: u32,
    ) -> Result<Vec<Arc<AudioBuffer>>> {
        let mut cache = self.cache.lock().await;

        let missing: Vec<&TrackDescriptor> = tracks
            .iter()
            .filter(|track| {
                cache
                    .get(&track.id)
                    .map_or(true, |buffer| buffer.sample_rate() != sample_rate)
            })
            .collect();

        if !missing.is_empty() {
            info!("Loading {} of {} track assets", missing.len(), tracks.len());

            let loaded = try_join_all(missing.iter().map(|track| async move {
                let buffer = self.loader.load(track, sample_rate).await?;
                Ok::<_, Error>((track.id.clone(), Arc::new(buffer)))
            }))
            .await?;

            self.decodes.fetch_add(loaded.len(), Ordering::Relaxed);
            for (id, buffer) in loaded {
                debug!(
                    "Track '{}' ready: {:.3}s at {} Hz",
                    id,
                    buffer.duration_seconds(),
                    buffer.sample_rate()
                );
                cache.insert(id, buffer);
            }
        }

        tracks
            .iter()
            .map(|track| {
                cache
                    .get(&track.id)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("track '{}' missing after load", track.id)))
            })
            .collect()
    }
}
