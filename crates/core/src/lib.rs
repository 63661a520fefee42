//! Core library for the Dance Deck application.
//!
//! Dance Deck plays back and edits motion-capture dances: per-frame joint
//! positions of a fixed 24-joint skeleton, an accompanying audio track and
//! optional beat/loudness analysis. Each module owns one subsystem; the
//! [`session`] module composes them into a playable dance and
//! [`session::DanceController`] adds downloading and the frame clock.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod frames;
pub mod pose;
pub mod remote;
pub mod resolver;
pub mod session;
pub mod skeleton;
pub mod timeline;

pub use analysis::AnalysisData;
pub use assets::{ArtifactKind, DanceId, LocalStore};
pub use audio::{AudioOutput, AudioTrack, SoftwareAudio};
pub use config::{AppConfig, PlaybackConfig};
pub use editor::{FrameSpan, PoseEditor};
pub use error::{DanceError, DownloadFailure, Result};
pub use events::{Channel, DanceEvent, EventBus, SubscriberId};
pub use frames::{parse_pose_table, FrameStore, PoseTable};
pub use pose::{Pose, Poser, SkeletonRig};
pub use remote::{DanceSource, HttpDanceSource};
pub use resolver::{AssetResolver, DownloadState, LoadedDance};
pub use session::{
    lock_session, spawn_frame_clock, DanceController, DanceSession, RefreshSummary, SharedSession,
};
pub use skeleton::{joint_index, joint_name, Frame, Vec3, JOINT_COUNT, JOINT_NAMES};
pub use timeline::{FrameClock, PlaybackScheduler, PlaybackState};
