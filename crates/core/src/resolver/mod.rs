//! Asset Resolver: makes a dance's artifacts available locally and loads
//! them.
//!
//! A pose table already on disk short-circuits the network entirely.
//! Otherwise the artifacts are fetched strictly in order (pose table, audio,
//! analysis) with an independent timeout per artifact. Each artifact is
//! persisted as soon as it arrives.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisData;
use crate::assets::{ArtifactKind, DanceId, LocalStore};
use crate::audio::AudioTrack;
use crate::events::EventBus;
use crate::frames::{parse_pose_bytes, FrameStore};
use crate::remote::DanceSource;
use crate::{DanceError, DownloadFailure, Result};

#[cfg(test)]
pub(crate) mod testing;

/// Per-artifact download job state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    NotStarted,
    InFlight,
    Succeeded,
    Failed(DownloadFailure),
}

/// Everything read from disk for one dance.
#[derive(Debug)]
pub struct LoadedDance {
    pub id: DanceId,
    pub frames: FrameStore,
    /// Rows of the pose table that were skipped.
    pub row_errors: Vec<DanceError>,
    pub audio: Option<AudioTrack>,
    pub analysis: AnalysisData,
    /// False when the pose table was already cached locally.
    pub downloaded: bool,
}

struct Phase {
    active: (f32, &'static str),
    done: (f32, &'static str),
}

fn phase(kind: ArtifactKind) -> Phase {
    match kind {
        ArtifactKind::PoseTable => Phase {
            active: (0.3, "downloading pose table"),
            done: (0.4, "pose table downloaded"),
        },
        ArtifactKind::Audio => Phase {
            active: (0.6, "downloading audio"),
            done: (0.8, "audio downloaded"),
        },
        ArtifactKind::Analysis => Phase {
            active: (0.9, "downloading analysis"),
            done: (0.95, "analysis downloaded"),
        },
    }
}

type JobTable = HashMap<(DanceId, ArtifactKind), DownloadState>;

pub struct AssetResolver {
    source: Arc<dyn DanceSource>,
    store: Arc<LocalStore>,
    events: EventBus,
    download_timeout: Duration,
    jobs: Mutex<JobTable>,
    in_flight: Arc<Mutex<HashSet<DanceId>>>,
}

impl AssetResolver {
    pub fn new(
        source: Arc<dyn DanceSource>,
        store: Arc<LocalStore>,
        events: EventBus,
        download_timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            events,
            download_timeout,
            jobs: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    pub fn job_state(&self, dance: &DanceId, kind: ArtifactKind) -> DownloadState {
        lock(&self.jobs)
            .get(&(dance.clone(), kind))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_in_flight(&self, dance: &DanceId) -> bool {
        lock(&self.in_flight).contains(dance)
    }

    /// Fetches the remote dance list under the download timeout.
    pub async fn list_remote(&self) -> Result<Vec<DanceId>> {
        let source = Arc::clone(&self.source);
        let task = tokio::task::spawn_blocking(move || source.list_dances());
        match tokio::time::timeout(self.download_timeout, task).await {
            Ok(Ok(listed)) => listed,
            Ok(Err(join)) => Err(DanceError::msg(format!("dance list task failed: {join}"))),
            Err(_) => Err(DanceError::msg(format!(
                "dance list timed out after {:?}",
                self.download_timeout
            ))),
        }
    }

    /// Ensures the dance's artifacts are on disk, then loads them.
    ///
    /// Fails with [`DanceError::InFlight`] while another resolve of the same
    /// dance is running. Dropping the returned future releases the dance.
    pub async fn resolve(&self, dance: &DanceId) -> Result<LoadedDance> {
        let _guard = InFlightGuard::acquire(&self.in_flight, dance)?;

        let downloaded = if self.store.exists(dance, ArtifactKind::PoseTable) {
            info!(dance = %dance, "pose table cached locally, skipping download");
            false
        } else {
            self.download_all(dance).await?;
            self.store.refresh()?;
            true
        };

        let store = Arc::clone(&self.store);
        let id = dance.clone();
        let mut loaded = tokio::task::spawn_blocking(move || load_local(&store, &id))
            .await
            .map_err(|join| DanceError::msg(format!("loading `{dance}` failed: {join}")))??;
        loaded.downloaded = downloaded;
        Ok(loaded)
    }

    async fn download_all(&self, dance: &DanceId) -> Result<()> {
        info!(dance = %dance, "starting download");
        self.events.download_progress(dance, 0.0, "starting download");

        for kind in ArtifactKind::ALL {
            let phase = phase(kind);
            self.events
                .download_progress(dance, phase.active.0, phase.active.1);

            match self.download_artifact(dance, kind).await {
                Ok(()) => {
                    self.events.download_progress(dance, phase.done.0, phase.done.1);
                }
                Err(failure) if kind.is_required() => {
                    error!(dance = %dance, artifact = %kind, %failure, "download failed");
                    self.events
                        .download_progress(dance, phase.active.0, "download failed");
                    return Err(DanceError::Download {
                        dance: dance.clone(),
                        artifact: kind,
                        failure,
                    });
                }
                Err(failure) => {
                    warn!(dance = %dance, artifact = %kind, %failure, "continuing without it");
                    self.events
                        .download_progress(dance, phase.done.0, format!("{kind} unavailable"));
                }
            }
        }

        self.events.download_progress(dance, 1.0, "download complete");
        info!(dance = %dance, "download complete");
        Ok(())
    }

    async fn download_artifact(
        &self,
        dance: &DanceId,
        kind: ArtifactKind,
    ) -> std::result::Result<(), DownloadFailure> {
        self.set_job(dance, kind, DownloadState::InFlight);

        let source = Arc::clone(&self.source);
        let id = dance.clone();
        let fetch = tokio::task::spawn_blocking(move || source.download(&id, kind));

        // A fetch that outlives the timeout keeps running on the blocking
        // pool; its bytes are dropped and never reach the store.
        let outcome = match tokio::time::timeout(self.download_timeout, fetch).await {
            Err(_) => Err(DownloadFailure::Timeout),
            Ok(Err(join)) => Err(DownloadFailure::Transport(join.to_string())),
            Ok(Ok(Err(err))) => Err(DownloadFailure::Transport(err.to_string())),
            Ok(Ok(Ok(bytes))) => self
                .persist(dance, kind, bytes)
                .await
                .map_err(|err| DownloadFailure::Transport(err.to_string())),
        };

        let state = match &outcome {
            Ok(()) => DownloadState::Succeeded,
            Err(failure) => DownloadState::Failed(failure.clone()),
        };
        self.set_job(dance, kind, state);
        outcome
    }

    async fn persist(&self, dance: &DanceId, kind: ArtifactKind, bytes: Vec<u8>) -> Result<()> {
        let store = Arc::clone(&self.store);
        let id = dance.clone();
        tokio::task::spawn_blocking(move || store.write(&id, kind, &bytes))
            .await
            .map_err(|join| DanceError::msg(join.to_string()))??;
        Ok(())
    }

    fn set_job(&self, dance: &DanceId, kind: ArtifactKind, state: DownloadState) {
        debug!(dance = %dance, artifact = %kind, ?state, "download job");
        lock(&self.jobs).insert((dance.clone(), kind), state);
    }
}

impl std::fmt::Debug for AssetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetResolver")
            .field("store", &self.store.root())
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

/// Reads a dance from the local store. Only the pose table is mandatory.
fn load_local(store: &LocalStore, dance: &DanceId) -> Result<LoadedDance> {
    let table = parse_pose_bytes(&store.read(dance, ArtifactKind::PoseTable)?)?;
    let row_errors = table.row_errors;
    let frames = FrameStore::new(table.frames);
    info!(
        dance = %dance,
        frames = frames.total_frames(),
        skipped_rows = row_errors.len(),
        "pose table loaded"
    );

    let audio = match store.artifact_path(dance, ArtifactKind::Audio) {
        Ok(path) if path.is_file() => match AudioTrack::open(&path) {
            Ok(track) => Some(track),
            Err(err) => {
                warn!(dance = %dance, %err, "audio is unreadable, playing without it");
                None
            }
        },
        _ => {
            warn!(dance = %dance, "no audio on disk");
            None
        }
    };

    let analysis = if store.exists(dance, ArtifactKind::Analysis) {
        store
            .read(dance, ArtifactKind::Analysis)
            .and_then(|bytes| AnalysisData::from_json(&bytes))
            .unwrap_or_else(|err| {
                warn!(dance = %dance, %err, "analysis data is unusable, leaving it empty");
                AnalysisData::default()
            })
    } else {
        AnalysisData::default()
    };

    Ok(LoadedDance {
        id: dance.clone(),
        frames,
        row_errors,
        audio,
        analysis,
        downloaded: false,
    })
}

/// Marks a dance as being resolved for as long as it lives.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<DanceId>>>,
    dance: DanceId,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<DanceId>>>, dance: &DanceId) -> Result<Self> {
        if !lock(set).insert(dance.clone()) {
            return Err(DanceError::InFlight(dance.clone()));
        }
        Ok(Self {
            set: Arc::clone(set),
            dance: dance.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.dance);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
