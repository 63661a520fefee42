//! Frame Store: canonical parsed frames plus an editable working copy.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::skeleton::{Frame, Vec3, AXES, JOINT_COUNT};
use crate::{DanceError, Result};

/// Number of numeric fields every pose table row carries.
pub const FIELDS_PER_ROW: usize = JOINT_COUNT * AXES;

/// Distance below which a working joint counts as unedited.
pub const EDIT_TOLERANCE: f32 = 0.001;

/// Output of [`parse_pose_table`]: accepted frames in row order plus the
/// rows that were rejected.
#[derive(Debug, Default)]
pub struct PoseTable {
    pub frames: Vec<Frame>,
    pub row_errors: Vec<DanceError>,
}

/// Parses a comma separated pose table.
///
/// Lines with zero or one token are treated as blank or trailer lines and
/// skipped silently. Any other line must hold exactly [`FIELDS_PER_ROW`]
/// numbers; rows that do not are logged, recorded in
/// [`PoseTable::row_errors`] and skipped without aborting the parse.
pub fn parse_pose_table(raw: &str) -> PoseTable {
    let mut table = PoseTable::default();

    for (index, line) in raw.split('\n').enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() <= 1 {
            continue;
        }

        match parse_row(&fields) {
            Ok(frame) => table.frames.push(frame),
            Err(reason) => {
                warn!(line = line_no, %reason, "skipping malformed pose row");
                table.row_errors.push(DanceError::Parse {
                    line: line_no,
                    reason,
                });
            }
        }
    }

    debug!(
        frames = table.frames.len(),
        rejected = table.row_errors.len(),
        "pose table parsed"
    );
    table
}

/// Byte-level entry point used for artifacts read from disk.
pub fn parse_pose_bytes(raw: &[u8]) -> Result<PoseTable> {
    let text = std::str::from_utf8(raw).map_err(|err| DanceError::Parse {
        line: 0,
        reason: format!("pose table is not valid UTF-8: {err}"),
    })?;
    Ok(parse_pose_table(text))
}

fn parse_row(fields: &[&str]) -> std::result::Result<Frame, String> {
    if fields.len() != FIELDS_PER_ROW {
        return Err(format!(
            "expected {FIELDS_PER_ROW} fields, found {}",
            fields.len()
        ));
    }

    let mut values = [0.0_f32; FIELDS_PER_ROW];
    for (slot, field) in values.iter_mut().zip(fields) {
        *slot = field
            .trim()
            .parse::<f32>()
            .map_err(|_| format!("`{}` is not a number", field.trim()))?;
    }

    let mut frame = [Vec3::ZERO; JOINT_COUNT];
    for (joint, xyz) in frame.iter_mut().zip(values.chunks_exact(AXES)) {
        *joint = Vec3::new(xyz[0], xyz[1], xyz[2]);
    }
    Ok(frame)
}

/// Holds the canonical frames of the loaded dance and the working copy that
/// edits are applied to. Both always have the same length.
#[derive(Debug, Clone)]
pub struct FrameStore {
    canonical: Arc<[Frame]>,
    working: Vec<Frame>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FrameStore {
    pub fn new(frames: Vec<Frame>) -> Self {
        let working = frames.clone();
        Self {
            canonical: frames.into(),
            working,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_table(table: PoseTable) -> Self {
        Self::new(table.frames)
    }

    pub fn total_frames(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn canonical_frame(&self, index: usize) -> Option<&Frame> {
        self.canonical.get(index)
    }

    pub fn working_frame(&self, index: usize) -> Option<&Frame> {
        self.working.get(index)
    }

    pub(crate) fn working_frame_mut(&mut self, index: usize) -> Result<&mut Frame> {
        let total = self.working.len();
        self.working
            .get_mut(index)
            .ok_or_else(|| frame_out_of_range(index, total))
    }

    /// Returns the working positions of a frame with each axis multiplied by
    /// the matching component of `scale`.
    pub fn scaled_positions(&self, index: usize, scale: Vec3) -> Result<Frame> {
        let frame = self
            .working
            .get(index)
            .ok_or_else(|| frame_out_of_range(index, self.working.len()))?;
        Ok(frame.map(|position| position.scale_by(scale)))
    }

    /// Discards every edit made to one frame.
    pub fn reset_working_frame(&mut self, index: usize) -> Result<()> {
        let original = *self
            .canonical
            .get(index)
            .ok_or_else(|| frame_out_of_range(index, self.canonical.len()))?;
        self.working[index] = original;
        Ok(())
    }

    pub fn reset_all_working(&mut self) {
        self.working = self.canonical.to_vec();
    }

    /// True when the working value of a joint has drifted from the canonical
    /// one by more than [`EDIT_TOLERANCE`].
    pub fn is_edited(&self, frame: usize, joint: usize) -> Result<bool> {
        if joint >= JOINT_COUNT {
            return Err(DanceError::range(format!(
                "joint {joint} is outside 0..{JOINT_COUNT}"
            )));
        }
        let original = self
            .canonical
            .get(frame)
            .ok_or_else(|| frame_out_of_range(frame, self.canonical.len()))?;
        Ok(self.working[frame][joint].distance(original[joint]) > EDIT_TOLERANCE)
    }
}

pub(crate) fn frame_out_of_range(index: usize, total: usize) -> DanceError {
    DanceError::range(format!("frame {index} is outside 0..{total}"))
}

/// Pose table with `rows` valid rows; every coordinate of row `i` is `i`.
#[cfg(test)]
pub(crate) fn sample_table(rows: usize) -> String {
    (0..rows)
        .map(|i| vec![i.to_string(); FIELDS_PER_ROW].join(","))
        .collect::<Vec<_>>()
        .join("\n")
}
