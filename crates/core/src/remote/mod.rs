//! HTTP/asset client for the dance server.

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::assets::{ArtifactKind, DanceId};
use crate::config::RemoteConfig;
use crate::{DanceError, Result};

/// Largest artifact accepted from the server.
const MAX_ARTIFACT_BYTES: u64 = 512 * 1024 * 1024;

/// Remote catalogue of dances.
///
/// Calls block; the resolver runs them on tokio's blocking pool and applies
/// its own timeout around each one.
pub trait DanceSource: Send + Sync {
    fn list_dances(&self) -> Result<Vec<DanceId>>;
    fn download(&self, dance: &DanceId, kind: ArtifactKind) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct DanceListResponse {
    success: bool,
    #[serde(default)]
    dances: Vec<DanceId>,
    #[serde(default)]
    message: Option<String>,
}

/// [`DanceSource`] backed by the dance server's HTTP API.
#[derive(Debug)]
pub struct HttpDanceSource {
    agent: ureq::Agent,
    config: RemoteConfig,
}

impl HttpDanceSource {
    pub fn new(config: RemoteConfig, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, config }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    pub fn list_url(&self) -> String {
        format!("{}{}", self.base(), self.config.list_endpoint)
    }

    /// The dance id is percent-encoded as a single path segment.
    pub fn artifact_url(&self, dance: &DanceId, kind: ArtifactKind) -> Result<String> {
        let root = format!("{}{}", self.base(), self.config.uploads_path);
        let mut url = Url::parse(&root)
            .map_err(|err| DanceError::msg(format!("invalid uploads url {root}: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| DanceError::msg(format!("uploads url {root} cannot hold a path")))?
            .pop_if_empty()
            .push(dance.as_str())
            .push(kind.file_name());
        Ok(url.into())
    }

    fn get(&self, url: &str) -> Result<ureq::Response> {
        debug!(%url, "GET");
        self.agent
            .get(url)
            .call()
            .map_err(|err| DanceError::msg(format!("GET {url}: {err}")))
    }
}

impl DanceSource for HttpDanceSource {
    fn list_dances(&self) -> Result<Vec<DanceId>> {
        let url = self.list_url();
        let response: DanceListResponse = self.get(&url)?.into_json()?;
        if !response.success {
            return Err(DanceError::msg(format!(
                "dance list request was rejected: {}",
                response.message.unwrap_or_else(|| "no reason given".to_string())
            )));
        }
        info!(count = response.dances.len(), "fetched dance list");
        Ok(response.dances)
    }

    fn download(&self, dance: &DanceId, kind: ArtifactKind) -> Result<Vec<u8>> {
        let url = self.artifact_url(dance, kind)?;
        let response = self.get(&url)?;
        let bytes = read_capped(response.into_reader(), MAX_ARTIFACT_BYTES)
            .map_err(|err| DanceError::msg(format!("GET {url}: {err}")))?;
        debug!(%url, bytes = bytes.len(), "artifact downloaded");
        Ok(bytes)
    }
}

/// Reads a whole body, failing instead of truncating when it exceeds `limit`.
fn read_capped(reader: impl Read, limit: u64) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(DanceError::msg(format!(
            "artifact is larger than {limit} bytes"
        )));
    }
    Ok(bytes)
}
