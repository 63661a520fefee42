use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{lock_session, spawn_frame_clock, DanceSession, SharedSession};
use crate::assets::{DanceId, LocalStore};
use crate::audio::AudioOutput;
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::pose::Poser;
use crate::remote::HttpDanceSource;
use crate::resolver::AssetResolver;
use crate::{DanceError, Result};

/// Outcome of [`DanceController::refresh_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub loaded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Ids that were listed more than once or already handled earlier.
    pub skipped: usize,
}

/// Loads dances into the shared session and runs its frame clock.
pub struct DanceController {
    resolver: Arc<AssetResolver>,
    session: SharedSession,
    events: EventBus,
    batch_wait: Duration,
    seen: Mutex<HashSet<DanceId>>,
    clock: Mutex<Option<JoinHandle<()>>>,
}

impl DanceController {
    pub fn new(resolver: Arc<AssetResolver>, session: SharedSession, batch_wait: Duration) -> Result<Self> {
        let events = lock_session(&session)?.events().clone();
        Ok(Self {
            resolver,
            session,
            events,
            batch_wait,
            seen: Mutex::new(HashSet::new()),
            clock: Mutex::new(None),
        })
    }

    /// Wires the HTTP source, local store and a fresh session from a config.
    pub fn from_config(
        config: &AppConfig,
        audio: Box<dyn AudioOutput>,
        poser: Box<dyn Poser>,
    ) -> Result<Self> {
        let events = EventBus::new();
        let download_timeout = config.timeouts.download();
        let store = Arc::new(LocalStore::new(&config.storage.root));
        store.refresh()?;

        let source = Arc::new(HttpDanceSource::new(config.remote.clone(), download_timeout));
        let resolver = Arc::new(AssetResolver::new(
            source,
            store,
            events.clone(),
            download_timeout,
        ));
        let session = DanceSession::new(&config.playback, audio, poser, events).into_shared();
        Self::new(resolver, session, config.timeouts.batch_wait())
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn resolver(&self) -> &Arc<AssetResolver> {
        &self.resolver
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Resolves a dance and makes it the current one.
    ///
    /// Publishes `DataLoaded` either way. On failure the previous dance is
    /// unloaded so playback stays disabled until a later load succeeds.
    pub async fn load_by_id(&self, dance: &DanceId) -> Result<()> {
        match self.resolver.resolve(dance).await {
            Ok(loaded) => {
                lock_session(&self.session)?.install(loaded);
                self.events.data_loaded(dance, true);
                Ok(())
            }
            Err(err @ DanceError::InFlight(_)) => {
                warn!(dance = %dance, "load already in progress");
                Err(err)
            }
            Err(err) => {
                error!(dance = %dance, %err, "loading dance failed");
                lock_session(&self.session)?.unload();
                self.events.data_loaded(dance, false);
                Err(err)
            }
        }
    }

    /// Makes a dance available locally without installing it.
    pub async fn fetch(&self, dance: &DanceId) -> Result<()> {
        let outcome = self.resolver.resolve(dance).await;
        if !matches!(outcome, Err(DanceError::InFlight(_))) {
            self.events.data_loaded(dance, outcome.is_ok());
        }
        outcome.map(|loaded| {
            debug!(dance = %dance, frames = loaded.frames.total_frames(), "dance cached");
        })
    }

    /// Lists the remote dances and fetches each one in turn.
    ///
    /// Each dance gets the batch wait budget; one that runs over is skipped
    /// and the batch moves on.
    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        let listed = self.resolver.list_remote().await?;
        info!(count = listed.len(), "refreshing all dances");

        let mut summary = RefreshSummary::default();
        for dance in listed {
            let first_time = self
                .seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(dance.clone());
            if !first_time {
                debug!(dance = %dance, "already handled, skipping");
                summary.skipped += 1;
                continue;
            }

            match tokio::time::timeout(self.batch_wait, self.fetch(&dance)).await {
                Ok(Ok(())) => summary.loaded += 1,
                Ok(Err(err)) => {
                    warn!(dance = %dance, %err, "skipping dance");
                    summary.failed += 1;
                }
                Err(_) => {
                    warn!(dance = %dance, wait = ?self.batch_wait, "dance took too long, skipping");
                    summary.timed_out += 1;
                }
            }
        }

        info!(?summary, "refresh finished");
        Ok(summary)
    }

    /// Starts playback and the frame clock that drives it.
    pub fn play(&self) -> Result<bool> {
        let started = lock_session(&self.session)?.play();
        if started {
            self.start_clock();
        }
        Ok(started)
    }

    pub fn play_with_audio(&self) -> Result<bool> {
        let started = lock_session(&self.session)?.play_with_audio()?;
        if started {
            self.start_clock();
        }
        Ok(started)
    }

    pub fn pause(&self) -> Result<bool> {
        let stopped = lock_session(&self.session)?.pause();
        if let Some(clock) = self.take_clock() {
            clock.abort();
        }
        Ok(stopped)
    }

    pub fn toggle_play_pause(&self) -> Result<bool> {
        if lock_session(&self.session)?.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    pub fn toggle_play_pause_with_audio(&self) -> Result<bool> {
        if lock_session(&self.session)?.is_playing() {
            self.pause()
        } else {
            self.play_with_audio()
        }
    }

    /// Waits for the frame clock to stop on its own, e.g. at the end of an
    /// audio-synced track.
    pub async fn wait_stopped(&self) {
        if let Some(clock) = self.take_clock() {
            if let Err(err) = clock.await {
                if !err.is_cancelled() {
                    error!(%err, "frame clock task failed");
                }
            }
        }
    }

    fn start_clock(&self) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *clock = Some(spawn_frame_clock(Arc::clone(&self.session)));
    }

    fn take_clock(&self) -> Option<JoinHandle<()>> {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for DanceController {
    fn drop(&mut self) {
        if let Some(clock) = self.take_clock() {
            clock.abort();
        }
    }
}
