//! The active dance: frames, playback, edits and the collaborators they
//! drive.
//!
//! [`DanceSession`] is synchronous and owns no threads. It is shared as a
//! [`SharedSession`]; [`spawn_frame_clock`] drives it from a tokio interval
//! while it plays, and [`DanceController`] adds the async loading side.

mod controller;

pub use controller::{DanceController, RefreshSummary};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::AnalysisData;
use crate::assets::DanceId;
use crate::audio::{AudioOutput, AudioTrack};
use crate::config::PlaybackConfig;
use crate::editor::{FrameSpan, PoseEditor};
use crate::events::EventBus;
use crate::frames::FrameStore;
use crate::pose::{Pose, Poser};
use crate::resolver::LoadedDance;
use crate::skeleton::{Frame, Vec3};
use crate::timeline::{PlaybackScheduler, PlaybackState};
use crate::{DanceError, Result};

pub type SharedSession = Arc<Mutex<DanceSession>>;

pub struct DanceSession {
    dance: Option<DanceId>,
    frames: FrameStore,
    scheduler: PlaybackScheduler,
    analysis: AnalysisData,
    track: Option<AudioTrack>,
    audio: Box<dyn AudioOutput>,
    poser: Box<dyn Poser>,
    events: EventBus,
    scale: Vec3,
    /// Set while playback was started together with the audio output.
    audio_synced: bool,
}

impl DanceSession {
    pub fn new(
        config: &PlaybackConfig,
        audio: Box<dyn AudioOutput>,
        poser: Box<dyn Poser>,
        events: EventBus,
    ) -> Self {
        Self {
            dance: None,
            frames: FrameStore::empty(),
            scheduler: PlaybackScheduler::new(config.frame_rate),
            analysis: AnalysisData::default(),
            track: None,
            audio,
            poser,
            events,
            scale: config.scale,
            audio_synced: false,
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Replaces whatever was loaded with a resolved dance, stopped at frame 0
    /// with the full range selected.
    pub fn install(&mut self, loaded: LoadedDance) {
        self.stop();

        let LoadedDance {
            id,
            frames,
            audio,
            analysis,
            ..
        } = loaded;

        self.frames = frames;
        self.analysis = analysis;
        match &audio {
            Some(track) => self.audio.load(track),
            None => self.audio.unload(),
        }
        self.track = audio;
        self.scheduler.load(self.frames.total_frames());

        info!(
            dance = %id,
            frames = self.frames.total_frames(),
            audio = self.track.is_some(),
            beats = self.analysis.beat_times.len(),
            "dance installed"
        );
        self.dance = Some(id);

        self.pose_current();
        self.events.frame_changed(0);
    }

    /// Drops the loaded dance. Playback is disabled until the next install.
    pub fn unload(&mut self) {
        self.stop();
        if let Some(dance) = self.dance.take() {
            info!(dance = %dance, "dance unloaded");
        }
        self.frames = FrameStore::empty();
        self.analysis = AnalysisData::default();
        self.track = None;
        self.audio.unload();
        self.scheduler.unload();
    }

    pub fn dance_id(&self) -> Option<&DanceId> {
        self.dance.as_ref()
    }

    pub fn total_frames(&self) -> usize {
        self.frames.total_frames()
    }

    pub fn current_frame(&self) -> usize {
        self.scheduler.current_frame()
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn playback_state(&self) -> &PlaybackState {
        self.scheduler.state()
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn analysis(&self) -> &AnalysisData {
        &self.analysis
    }

    pub fn beat_times(&self) -> &[f32] {
        &self.analysis.beat_times
    }

    pub fn rms_values(&self) -> &[f32] {
        &self.analysis.rms_values
    }

    pub fn audio_track(&self) -> Option<&AudioTrack> {
        self.track.as_ref()
    }

    pub fn audio_time(&self) -> f32 {
        self.audio.time()
    }

    pub fn frame_period(&self) -> Duration {
        self.scheduler.frame_period()
    }

    pub fn set_frame_rate(&mut self, frame_rate: f32) -> Result<()> {
        self.scheduler.set_frame_rate(frame_rate)
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.pose_current();
    }

    /// Working positions of a frame with the current scale applied.
    pub fn scaled_positions(&self, frame: usize) -> Result<Frame> {
        self.frames.scaled_positions(frame, self.scale)
    }

    /// Starts frame playback. Returns false when already playing or nothing
    /// is loaded.
    pub fn play(&mut self) -> bool {
        if !self.scheduler.play() {
            return false;
        }
        self.audio_synced = false;
        self.events.play_state_changed(true);
        true
    }

    /// Starts frame playback together with the audio output, with the audio
    /// cursor moved to the current frame's time.
    pub fn play_with_audio(&mut self) -> Result<bool> {
        if self.track.is_none() {
            return Err(DanceError::not_found("the loaded dance has no audio"));
        }
        if self.scheduler.is_playing() || self.frames.is_empty() {
            return Ok(false);
        }
        let time = self.scheduler.frame_time(self.current_frame());
        self.audio.set_time(time);
        self.audio.play();
        self.scheduler.play();
        self.audio_synced = true;
        self.events.play_state_changed(true);
        Ok(true)
    }

    /// Stops playback and the audio output. Returns false when already
    /// stopped.
    pub fn pause(&mut self) -> bool {
        if !self.scheduler.pause() {
            return false;
        }
        self.audio.pause();
        self.audio_synced = false;
        self.events.play_state_changed(false);
        true
    }

    pub fn toggle_play_pause(&mut self) -> bool {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    pub fn toggle_play_pause_with_audio(&mut self) -> Result<bool> {
        if self.is_playing() {
            Ok(self.pause())
        } else {
            self.play_with_audio()
        }
    }

    /// Moves to a frame (clamped) and resynchronizes the audio cursor to it.
    pub fn seek(&mut self, frame: i64) -> Option<usize> {
        let target = self.scheduler.seek(frame)?;
        if self.track.is_some() {
            self.audio.set_time(self.scheduler.frame_time(target));
        }
        self.show(target);
        Some(target)
    }

    pub fn set_play_range(&mut self, start: i64, end: i64, enabled: bool) -> Result<()> {
        if let Some(start) = self.scheduler.set_play_range(start, end, enabled)? {
            self.seek(start as i64);
        }
        Ok(())
    }

    pub fn next_frame(&mut self) -> Option<usize> {
        let frame = self.scheduler.next_frame()?;
        self.show(frame);
        Some(frame)
    }

    pub fn previous_frame(&mut self) -> Option<usize> {
        let frame = self.scheduler.previous_frame()?;
        self.show(frame);
        Some(frame)
    }

    pub fn interpolate(
        &mut self,
        joint: usize,
        start_frame: usize,
        start_value: Vec3,
        end_frame: usize,
        end_value: Vec3,
    ) -> Result<FrameSpan> {
        let span = PoseEditor::new(&mut self.frames).interpolate(
            joint,
            start_frame,
            start_value,
            end_frame,
            end_value,
        )?;
        self.repose_if_touched(&span);
        Ok(span)
    }

    pub fn set_joint(&mut self, frame: usize, joint_name: &str, value: Vec3) -> Result<FrameSpan> {
        let span = PoseEditor::new(&mut self.frames).set_joint(frame, joint_name, value)?;
        self.repose_if_touched(&span);
        Ok(span)
    }

    pub fn commit_range(&mut self, start_frame: usize, end_frame: usize) -> Result<Vec<usize>> {
        let touched = PoseEditor::new(&mut self.frames).commit_range(start_frame, end_frame)?;
        if !touched.is_empty() {
            self.repose_if_touched(&FrameSpan::new(start_frame, end_frame));
        }
        Ok(touched)
    }

    pub fn reset_working_frame(&mut self, frame: usize) -> Result<()> {
        self.frames.reset_working_frame(frame)?;
        self.repose_if_touched(&FrameSpan::single(frame));
        Ok(())
    }

    pub fn reset_all_working(&mut self) {
        self.frames.reset_all_working();
        self.pose_current();
    }

    /// Advances playback by the real time elapsed since the previous tick.
    ///
    /// Emits one `FrameChanged` per frame stepped and poses the last one.
    /// Audio-synced playback stops once the audio output reports the end of
    /// its track. Returns the number of frames stepped.
    pub fn tick(&mut self, elapsed: Duration) -> usize {
        if !self.scheduler.is_playing() {
            return 0;
        }

        if self.audio_synced {
            self.audio.advance(elapsed);
            if !self.audio.is_playing() {
                info!("audio track ended, stopping playback");
                self.pause();
                return 0;
            }
        }

        let steps = self.scheduler.tick(elapsed);
        for step in &steps {
            if step.wrapped && self.track.is_some() {
                self.audio.set_time(self.scheduler.frame_time(step.frame));
            }
            self.events.frame_changed(step.frame);
        }
        if !steps.is_empty() {
            self.pose_current();
        }
        steps.len()
    }

    fn stop(&mut self) {
        if self.scheduler.is_playing() {
            self.pause();
        }
    }

    fn show(&mut self, frame: usize) {
        self.pose_current();
        self.events.frame_changed(frame);
    }

    fn repose_if_touched(&mut self, span: &FrameSpan) {
        if span.contains(self.current_frame()) {
            self.pose_current();
        }
    }

    fn pose_current(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        match self.scaled_positions(self.current_frame()) {
            Ok(positions) => self.poser.apply_pose(&Pose::new(positions)),
            Err(err) => warn!(%err, "could not pose the current frame"),
        }
    }
}

impl std::fmt::Debug for DanceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DanceSession")
            .field("dance", &self.dance)
            .field("total_frames", &self.total_frames())
            .field("state", self.scheduler.state())
            .finish()
    }
}

pub fn lock_session(session: &SharedSession) -> Result<MutexGuard<'_, DanceSession>> {
    session
        .lock()
        .map_err(|_| DanceError::msg("dance session has been poisoned"))
}

/// Drives a playing session from a tokio interval at its frame period.
///
/// The task ends on its own once the session stops playing. The lock is
/// taken only for the duration of each tick.
pub fn spawn_frame_clock(session: SharedSession) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = match lock_session(&session) {
            Ok(guard) => guard.frame_period(),
            Err(err) => {
                warn!(%err, "frame clock not started");
                return;
            }
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        let mut last = Instant::now();
        debug!(?period, "frame clock started");

        loop {
            interval.tick().await;
            let now = Instant::now();
            let elapsed = now - last;
            last = now;

            let Ok(mut guard) = lock_session(&session) else {
                break;
            };
            guard.tick(elapsed);
            if !guard.is_playing() {
                break;
            }
        }
        debug!("frame clock stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioTrack, SoftwareAudio};
    use crate::events::DanceEvent;
    use crate::frames::{parse_pose_table, sample_table};
    use crate::skeleton::joint_index;

    #[derive(Clone, Default)]
    struct RecordingPoser(Arc<Mutex<Vec<Pose>>>);

    impl Poser for RecordingPoser {
        fn apply_pose(&mut self, pose: &Pose) {
            self.0.lock().unwrap().push(*pose);
        }
    }

    /// Shares a [`SoftwareAudio`] so tests can inspect the cursor.
    #[derive(Clone, Default)]
    struct SharedAudio(Arc<Mutex<SoftwareAudio>>);

    impl AudioOutput for SharedAudio {
        fn load(&mut self, track: &AudioTrack) {
            self.0.lock().unwrap().load(track)
        }
        fn unload(&mut self) {
            self.0.lock().unwrap().unload()
        }
        fn set_time(&mut self, seconds: f32) {
            self.0.lock().unwrap().set_time(seconds)
        }
        fn time(&self) -> f32 {
            self.0.lock().unwrap().time()
        }
        fn play(&mut self) {
            self.0.lock().unwrap().play()
        }
        fn pause(&mut self) {
            self.0.lock().unwrap().pause()
        }
        fn is_playing(&self) -> bool {
            self.0.lock().unwrap().is_playing()
        }
        fn advance(&mut self, elapsed: Duration) {
            self.0.lock().unwrap().advance(elapsed)
        }
    }

    const FRAME: Duration = Duration::from_millis(100);

    struct Fixture {
        session: DanceSession,
        poses: Arc<Mutex<Vec<Pose>>>,
        audio: SharedAudio,
        events: Arc<Mutex<Vec<DanceEvent>>>,
    }

    fn fixture(rows: usize, audio_seconds: Option<f32>) -> Fixture {
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let poser = RecordingPoser::default();
        let poses = Arc::clone(&poser.0);
        let audio = SharedAudio::default();
        let config = PlaybackConfig {
            frame_rate: 10.0,
            ..PlaybackConfig::default()
        };
        let mut session =
            DanceSession::new(&config, Box::new(audio.clone()), Box::new(poser), bus);

        let table = parse_pose_table(&sample_table(rows));
        session.install(LoadedDance {
            id: DanceId::from("test"),
            frames: FrameStore::new(table.frames),
            row_errors: Vec::new(),
            audio: audio_seconds.map(|duration| AudioTrack {
                duration,
                sample_rate: 8_000,
                channels: 1,
            }),
            analysis: AnalysisData {
                beat_times: vec![0.5],
                rms_values: vec![0.2, 0.4],
            },
            downloaded: false,
        });

        Fixture {
            session,
            poses,
            audio,
            events,
        }
    }

    impl Fixture {
        fn take_events(&self) -> Vec<DanceEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }

        fn frames_changed(&self) -> Vec<usize> {
            self.take_events()
                .into_iter()
                .filter_map(|event| match event {
                    DanceEvent::FrameChanged(frame) => Some(frame),
                    _ => None,
                })
                .collect()
        }

        fn last_pose(&self) -> Pose {
            *self.poses.lock().unwrap().last().unwrap()
        }
    }

    #[test]
    fn install_selects_frame_zero_and_the_full_range() {
        let fx = fixture(30, None);
        let state = fx.session.playback_state();

        assert_eq!(fx.session.total_frames(), 30);
        assert_eq!(state.current_frame, 0);
        assert!(state.use_range);
        assert_eq!((state.range_start, state.range_end), (0, 29));
        assert_eq!(fx.frames_changed(), vec![0]);
        assert_eq!(fx.last_pose().get("hip"), Some(Vec3::ZERO));
        assert_eq!(fx.session.beat_times(), &[0.5]);
        assert_eq!(fx.session.rms_values(), &[0.2, 0.4]);
    }

    #[test]
    fn range_playback_only_visits_the_range() {
        let mut fx = fixture(30, None);
        fx.session.set_play_range(10, 20, true).unwrap();
        fx.session.seek(25);
        fx.take_events();

        assert!(fx.session.play());
        for _ in 0..40 {
            fx.session.tick(FRAME);
        }

        let visited = fx.frames_changed();
        assert_eq!(visited.len(), 40);
        assert!(visited.iter().all(|frame| (10..=20).contains(frame)));
        let frame = fx.session.current_frame() as f32;
        assert_eq!(fx.last_pose().get("head"), Some(Vec3::new(frame, frame, frame)));
    }

    #[test]
    fn empty_sessions_cannot_play() {
        let mut fx = fixture(0, None);
        fx.take_events();

        assert!(!fx.session.play());
        assert_eq!(fx.session.tick(Duration::from_secs(1)), 0);
        assert!(fx.take_events().is_empty());
        assert!(fx.session.set_play_range(0, 5, true).is_err());
    }

    #[test]
    fn play_state_changes_are_announced_once() {
        let mut fx = fixture(5, None);
        fx.take_events();

        assert!(fx.session.toggle_play_pause());
        assert!(!fx.session.play());
        assert!(fx.session.toggle_play_pause());

        assert_eq!(
            fx.take_events(),
            vec![
                DanceEvent::PlayStateChanged(true),
                DanceEvent::PlayStateChanged(false)
            ]
        );
    }

    #[test]
    fn audio_follows_seek_and_range_wraps() {
        let mut fx = fixture(30, Some(10.0));
        fx.session.set_play_range(10, 12, true).unwrap();
        assert!((fx.audio.time() - 1.0).abs() < 1e-6);

        fx.session.seek(12);
        assert!((fx.audio.time() - 1.2).abs() < 1e-6);

        assert!(fx.session.play_with_audio().unwrap());
        assert!(fx.audio.is_playing());
        fx.session.tick(FRAME);

        assert_eq!(fx.session.current_frame(), 10);
        assert!((fx.audio.time() - 1.0).abs() < 1e-6);

        fx.session.pause();
        assert!(!fx.audio.is_playing());
    }

    #[test]
    fn playback_stops_when_the_audio_ends() {
        let mut fx = fixture(30, Some(0.25));
        fx.session.set_play_range(0, 29, false).unwrap();
        fx.session.play_with_audio().unwrap();

        fx.session.tick(FRAME);
        fx.session.tick(FRAME);
        assert!(fx.session.is_playing());
        fx.session.tick(FRAME);

        assert!(!fx.session.is_playing());
        assert!(fx
            .take_events()
            .contains(&DanceEvent::PlayStateChanged(false)));
    }

    #[test]
    fn play_with_audio_needs_a_track() {
        let mut fx = fixture(5, None);
        assert!(matches!(
            fx.session.play_with_audio(),
            Err(DanceError::NotFound(_))
        ));
        assert!(!fx.session.is_playing());
    }

    #[test]
    fn edits_on_the_visible_frame_repose_immediately() {
        let mut fx = fixture(10, None);
        fx.session.seek(5);
        let before = fx.poses.lock().unwrap().len();

        fx.session
            .set_joint(5, "head", Vec3::new(9.0, 9.0, 9.0))
            .unwrap();
        assert_eq!(fx.poses.lock().unwrap().len(), before + 1);
        assert_eq!(fx.last_pose().get("head"), Some(Vec3::new(9.0, 9.0, 9.0)));

        fx.session.set_joint(2, "head", Vec3::ZERO).unwrap();
        assert_eq!(fx.poses.lock().unwrap().len(), before + 1);

        fx.session.reset_working_frame(5).unwrap();
        assert_eq!(fx.last_pose().get("head"), Some(Vec3::new(5.0, 5.0, 5.0)));
    }

    #[test]
    fn interpolation_hits_the_midpoint() {
        let mut fx = fixture(20, None);
        let hip = joint_index("hip").unwrap();

        fx.session
            .interpolate(hip, 0, Vec3::ZERO, 10, Vec3::new(10.0, 0.0, 0.0))
            .unwrap();

        assert_eq!(fx.session.scaled_positions(5).unwrap()[hip], Vec3::new(5.0, 0.0, 0.0));
        assert!(fx.session.interpolate(hip, 5, Vec3::ZERO, 25, Vec3::ZERO).is_err());
    }

    #[test]
    fn commit_range_spreads_endpoint_edits() {
        let mut fx = fixture(11, None);
        fx.session.seek(4);
        fx.session.set_joint(0, "neck", Vec3::ZERO).unwrap();
        fx.session.set_joint(10, "neck", Vec3::new(20.0, 0.0, 0.0)).unwrap();

        let touched = fx.session.commit_range(0, 10).unwrap();

        assert_eq!(touched, vec![joint_index("neck").unwrap()]);
        assert_eq!(fx.last_pose().get("neck"), Some(Vec3::new(8.0, 0.0, 0.0)));
    }

    #[test]
    fn scale_is_applied_when_posing() {
        let mut fx = fixture(4, None);
        fx.session.seek(2);
        fx.session.set_scale(Vec3::new(2.0, 1.0, 0.5));

        assert_eq!(fx.last_pose().get("hip"), Some(Vec3::new(4.0, 2.0, 1.0)));
    }

    #[test]
    fn stepping_ignores_the_range() {
        let mut fx = fixture(3, None);
        fx.session.set_play_range(1, 1, true).unwrap();
        fx.take_events();

        assert_eq!(fx.session.next_frame(), Some(2));
        assert_eq!(fx.session.next_frame(), Some(0));
        assert_eq!(fx.session.previous_frame(), Some(2));
        assert_eq!(fx.frames_changed(), vec![2, 0, 2]);
    }

    #[test]
    fn unload_disables_playback() {
        let mut fx = fixture(5, Some(1.0));
        fx.session.play();
        fx.session.unload();

        assert!(!fx.session.is_playing());
        assert_eq!(fx.session.total_frames(), 0);
        assert!(fx.session.dance_id().is_none());
        assert!(fx.session.audio_track().is_none());
        assert!(!fx.session.play());
    }

    #[tokio::test]
    async fn frame_clock_runs_until_paused() {
        let fx = fixture(1_000, None);
        let shared = fx.session.into_shared();
        lock_session(&shared).unwrap().set_frame_rate(100.0).unwrap();
        lock_session(&shared).unwrap().play();

        let clock = spawn_frame_clock(Arc::clone(&shared));
        tokio::time::sleep(Duration::from_millis(200)).await;
        lock_session(&shared).unwrap().pause();
        clock.await.unwrap();

        let stopped_at = lock_session(&shared).unwrap().current_frame();
        assert!(stopped_at > 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lock_session(&shared).unwrap().current_frame(), stopped_at);
    }

    #[tokio::test]
    async fn huge_frame_rates_leave_the_clock_usable() {
        let fx = fixture(1_000, None);
        let shared = fx.session.into_shared();
        {
            let mut session = lock_session(&shared).unwrap();
            assert!(session.set_frame_rate(1e10).is_err());
            assert!(!session.frame_period().is_zero());
            session.play();
        }

        let clock = spawn_frame_clock(Arc::clone(&shared));
        tokio::time::sleep(Duration::from_millis(100)).await;
        lock_session(&shared).unwrap().pause();
        clock.await.unwrap();
        assert!(lock_session(&shared).unwrap().current_frame() > 0);
    }
}
