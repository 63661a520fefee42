//! Pose Editor: range and single-joint edits on the working copy.
//!
//! Edits never touch the canonical frames and do not depend on playback
//! state. Each successful edit reports the frames it wrote so the caller can
//! decide whether the frame on screen needs to be posed again.

use std::ops::RangeInclusive;

use tracing::debug;

use crate::frames::{frame_out_of_range, FrameStore};
use crate::skeleton::{joint_index, Vec3, JOINT_COUNT};
use crate::{DanceError, Result};

/// Inclusive span of frames written by an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpan(RangeInclusive<usize>);

impl FrameSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self(start..=end)
    }

    pub fn single(frame: usize) -> Self {
        Self(frame..=frame)
    }

    pub fn start(&self) -> usize {
        *self.0.start()
    }

    pub fn end(&self) -> usize {
        *self.0.end()
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.0.contains(&frame)
    }
}

pub struct PoseEditor<'a> {
    frames: &'a mut FrameStore,
}

impl<'a> PoseEditor<'a> {
    pub fn new(frames: &'a mut FrameStore) -> Self {
        Self { frames }
    }

    /// Linearly blends one joint from `start_value` at `start_frame` to
    /// `end_value` at `end_frame`, writing every frame in between.
    ///
    /// Nothing is written when the arguments are out of range.
    pub fn interpolate(
        &mut self,
        joint: usize,
        start_frame: usize,
        start_value: Vec3,
        end_frame: usize,
        end_value: Vec3,
    ) -> Result<FrameSpan> {
        check_joint(joint)?;
        self.check_range(start_frame, end_frame)?;

        let span = end_frame - start_frame;
        for frame in start_frame..=end_frame {
            let t = if span == 0 {
                0.0
            } else {
                (frame - start_frame) as f32 / span as f32
            };
            self.frames.working_frame_mut(frame)?[joint] = start_value.lerp(end_value, t);
        }

        debug!(joint, start_frame, end_frame, "interpolated joint");
        Ok(FrameSpan(start_frame..=end_frame))
    }

    /// Overwrites a single joint of a single frame.
    pub fn set_joint(&mut self, frame: usize, joint_name: &str, value: Vec3) -> Result<FrameSpan> {
        let joint = joint_index(joint_name)
            .ok_or_else(|| DanceError::not_found(format!("unknown joint `{joint_name}`")))?;
        self.frames.working_frame_mut(frame)?[joint] = value;
        Ok(FrameSpan::single(frame))
    }

    /// Spreads the edits made at the two ends of a range across it.
    ///
    /// Each joint whose working value at `start_frame` or `end_frame` differs
    /// from the canonical value is interpolated between its two working
    /// endpoint values. Returns the joints that were written.
    pub fn commit_range(&mut self, start_frame: usize, end_frame: usize) -> Result<Vec<usize>> {
        self.check_range(start_frame, end_frame)?;
        if start_frame == end_frame {
            return Err(DanceError::range(
                "start and end frame are the same, nothing to interpolate",
            ));
        }

        let mut touched = Vec::new();
        for joint in 0..JOINT_COUNT {
            let edited = self.frames.is_edited(start_frame, joint)?
                || self.frames.is_edited(end_frame, joint)?;
            if !edited {
                continue;
            }

            let from = self.working_joint(start_frame, joint)?;
            let to = self.working_joint(end_frame, joint)?;
            self.interpolate(joint, start_frame, from, end_frame, to)?;
            touched.push(joint);
        }

        Ok(touched)
    }

    fn working_joint(&self, frame: usize, joint: usize) -> Result<Vec3> {
        self.frames
            .working_frame(frame)
            .map(|positions| positions[joint])
            .ok_or_else(|| frame_out_of_range(frame, self.frames.total_frames()))
    }

    fn check_range(&self, start_frame: usize, end_frame: usize) -> Result<()> {
        let total = self.frames.total_frames();
        if start_frame > end_frame || end_frame >= total {
            return Err(DanceError::range(format!(
                "invalid frame range {start_frame}..={end_frame} for {total} frames"
            )));
        }
        Ok(())
    }
}

fn check_joint(joint: usize) -> Result<()> {
    if joint < JOINT_COUNT {
        Ok(())
    } else {
        Err(DanceError::range(format!(
            "joint {joint} is outside 0..{JOINT_COUNT}"
        )))
    }
}
