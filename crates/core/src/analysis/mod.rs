use serde::{Deserialize, Serialize};

use crate::Result;

/// Beat and loudness data produced offline for a dance's audio track.
///
/// Both series are optional: a dance whose side-car file is missing or
/// unreadable carries an empty value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisData {
    /// Beat timestamps in seconds, ascending.
    #[serde(default)]
    pub beat_times: Vec<f32>,
    /// RMS samples spaced evenly across the whole track.
    #[serde(default)]
    pub rms_values: Vec<f32>,
}

impl AnalysisData {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut data: AnalysisData = serde_json::from_slice(bytes)?;
        data.beat_times
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(data)
    }

    pub fn is_empty(&self) -> bool {
        self.beat_times.is_empty() && self.rms_values.is_empty()
    }

    /// Frame index each beat falls on at the given frame rate.
    pub fn beat_frames(&self, frame_rate: f32) -> Vec<usize> {
        if frame_rate <= 0.0 {
            return Vec::new();
        }
        self.beat_times
            .iter()
            .filter(|time| **time >= 0.0)
            .map(|time| (time * frame_rate).round() as usize)
            .collect()
    }

    /// Beat times as a fraction of the track duration, for timeline markers.
    pub fn beat_positions(&self, duration: f32) -> Vec<f32> {
        if duration <= 0.0 {
            return Vec::new();
        }
        self.beat_times.iter().map(|time| time / duration).collect()
    }

    /// RMS series divided by its peak. All zeros when the peak is zero.
    pub fn normalized_rms(&self) -> Vec<f32> {
        let peak = self.rms_values.iter().copied().fold(0.0_f32, f32::max);
        if peak <= 0.0 {
            return vec![0.0; self.rms_values.len()];
        }
        self.rms_values.iter().map(|value| value / peak).collect()
    }

    /// RMS sample covering `time` for a track of `duration` seconds.
    pub fn rms_at(&self, time: f32, duration: f32) -> Option<f32> {
        if self.rms_values.is_empty() || duration <= 0.0 || time < 0.0 || time > duration {
            return None;
        }
        let slot = (time / duration * self.rms_values.len() as f32) as usize;
        self.rms_values
            .get(slot.min(self.rms_values.len() - 1))
            .copied()
    }

    /// First beat at or after `time`.
    pub fn next_beat(&self, time: f32) -> Option<f32> {
        let index = self.beat_times.partition_point(|beat| *beat < time);
        self.beat_times.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_side_car_json_with_missing_fields() {
        let data = AnalysisData::from_json(br#"{"beat_times": [1.0, 0.5]}"#).unwrap();
        assert_eq!(data.beat_times, vec![0.5, 1.0]);
        assert!(data.rms_values.is_empty());
        assert!(!data.is_empty());

        assert!(AnalysisData::from_json(b"not json").is_err());
    }

    #[test]
    fn maps_beats_to_frames_and_positions() {
        let data = AnalysisData {
            beat_times: vec![0.5, 1.0, 2.0],
            rms_values: Vec::new(),
        };
        assert_eq!(data.beat_frames(60.0), vec![30, 60, 120]);
        assert_eq!(data.beat_positions(4.0), vec![0.125, 0.25, 0.5]);
        assert_eq!(data.next_beat(0.7), Some(1.0));
        assert_eq!(data.next_beat(2.5), None);
    }

    #[test]
    fn samples_rms_evenly_across_the_track() {
        let data = AnalysisData {
            beat_times: Vec::new(),
            rms_values: vec![0.0, 2.0, 4.0, 1.0],
        };
        assert_eq!(data.rms_at(0.0, 8.0), Some(0.0));
        assert_eq!(data.rms_at(2.5, 8.0), Some(2.0));
        assert_eq!(data.rms_at(8.0, 8.0), Some(1.0));
        assert_eq!(data.rms_at(9.0, 8.0), None);
        assert_eq!(data.normalized_rms(), vec![0.0, 0.5, 1.0, 0.25]);
    }

    #[test]
    fn silent_tracks_normalize_to_zero() {
        let data = AnalysisData {
            beat_times: Vec::new(),
            rms_values: vec![0.0; 3],
        };
        assert_eq!(data.normalized_rms(), vec![0.0; 3]);
    }
}
