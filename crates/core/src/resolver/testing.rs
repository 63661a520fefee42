//! In-memory [`DanceSource`] for resolver and controller tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::assets::{ArtifactKind, DanceId};
use crate::audio::silent_wav;
use crate::frames::sample_table;
use crate::remote::DanceSource;
use crate::{DanceError, Result};

type CallLog = Arc<Mutex<Vec<(DanceId, ArtifactKind)>>>;

#[derive(Default)]
pub(crate) struct MockSource {
    listed: Vec<DanceId>,
    artifacts: HashMap<(DanceId, ArtifactKind), Vec<u8>>,
    delays: HashMap<(Option<DanceId>, ArtifactKind), Duration>,
    calls: CallLog,
}

impl MockSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lists the dance and serves a pose table of `rows` frames, a one
    /// second silent WAV and two beats of analysis.
    pub(crate) fn with_dance(mut self, id: &str, rows: usize) -> Self {
        let dance = DanceId::from(id);
        self.listed.push(dance.clone());
        self.artifacts.insert(
            (dance.clone(), ArtifactKind::PoseTable),
            sample_table(rows).into_bytes(),
        );
        self.artifacts
            .insert((dance.clone(), ArtifactKind::Audio), silent_wav(1.0, 8_000));
        self.artifacts.insert(
            (dance, ArtifactKind::Analysis),
            br#"{"beat_times": [1.0, 0.5], "rms_values": [0.1, 0.4]}"#.to_vec(),
        );
        self
    }

    pub(crate) fn with_bytes(mut self, id: &str, kind: ArtifactKind, bytes: Vec<u8>) -> Self {
        self.artifacts.insert((DanceId::from(id), kind), bytes);
        self
    }

    /// Lists a dance id again without serving anything new for it.
    pub(crate) fn with_listing(mut self, id: &str) -> Self {
        self.listed.push(DanceId::from(id));
        self
    }

    /// Drops an artifact from every dance added so far.
    pub(crate) fn without(mut self, kind: ArtifactKind) -> Self {
        self.artifacts.retain(|(_, served), _| *served != kind);
        self
    }

    /// Slows every download of `kind`.
    pub(crate) fn with_delay(mut self, kind: ArtifactKind, delay: Duration) -> Self {
        self.delays.insert((None, kind), delay);
        self
    }

    /// Slows downloads of `kind` for one dance only.
    pub(crate) fn with_dance_delay(mut self, id: &str, kind: ArtifactKind, delay: Duration) -> Self {
        self.delays.insert((Some(DanceId::from(id)), kind), delay);
        self
    }

    pub(crate) fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }
}

impl DanceSource for MockSource {
    fn list_dances(&self) -> Result<Vec<DanceId>> {
        Ok(self.listed.clone())
    }

    fn download(&self, dance: &DanceId, kind: ArtifactKind) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push((dance.clone(), kind));
        let delay = self
            .delays
            .get(&(Some(dance.clone()), kind))
            .or_else(|| self.delays.get(&(None, kind)));
        if let Some(delay) = delay {
            std::thread::sleep(*delay);
        }
        self.artifacts
            .get(&(dance.clone(), kind))
            .cloned()
            .ok_or_else(|| DanceError::msg(format!("404: {kind} for `{dance}`")))
    }
}
