use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;

use crate::{DanceError, Result};

/// Decoded metadata for a dance's audio artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub duration: f32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioTrack {
    /// Reads the WAV header of a file on disk.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|err| DanceError::Audio(format!("{}: {err}", path.display())))?;
        Ok(Self::from_reader(&reader))
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|err| DanceError::Audio(err.to_string()))?;
        Ok(Self::from_reader(&reader))
    }

    fn from_reader<R: Read>(reader: &hound::WavReader<R>) -> Self {
        let spec = reader.spec();
        let duration = if spec.sample_rate == 0 {
            0.0
        } else {
            reader.duration() as f32 / spec.sample_rate as f32
        };
        Self {
            duration,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        }
    }
}

/// The device or engine that actually outputs sound.
///
/// Playback only needs a settable time cursor, start/stop and a liveness
/// flag; a clip that reaches its end reports `is_playing() == false`.
pub trait AudioOutput: Send {
    fn load(&mut self, track: &AudioTrack);
    fn unload(&mut self);
    fn set_time(&mut self, seconds: f32);
    fn time(&self) -> f32;
    fn play(&mut self);
    fn pause(&mut self);
    fn is_playing(&self) -> bool;

    /// Called with the elapsed time of every playback tick. Hardware outputs
    /// advance on their own and can ignore it.
    fn advance(&mut self, _elapsed: Duration) {}
}

/// Audio output with a virtual cursor, used for headless playback.
#[derive(Debug, Default, Clone)]
pub struct SoftwareAudio {
    clip_length: Option<f32>,
    cursor: f32,
    playing: bool,
}

impl SoftwareAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clip_length(&self) -> Option<f32> {
        self.clip_length
    }
}

impl AudioOutput for SoftwareAudio {
    fn load(&mut self, track: &AudioTrack) {
        self.clip_length = Some(track.duration);
        self.cursor = 0.0;
        self.playing = false;
    }

    fn unload(&mut self) {
        *self = Self::default();
    }

    fn set_time(&mut self, seconds: f32) {
        let end = self.clip_length.unwrap_or(0.0);
        self.cursor = seconds.clamp(0.0, end);
    }

    fn time(&self) -> f32 {
        self.cursor
    }

    fn play(&mut self) {
        if let Some(length) = self.clip_length {
            self.playing = self.cursor < length;
        }
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn advance(&mut self, elapsed: Duration) {
        if !self.playing {
            return;
        }
        let end = self.clip_length.unwrap_or(0.0);
        self.cursor += elapsed.as_secs_f32();
        if self.cursor >= end {
            self.cursor = end;
            self.playing = false;
        }
    }
}

/// Encodes a silent 16-bit mono WAV of the given length.
#[cfg(test)]
pub(crate) fn silent_wav(seconds: f32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..(seconds * sample_rate as f32) as usize {
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_duration_from_wav_header() {
        let track = AudioTrack::from_wav_bytes(&silent_wav(2.0, 8_000)).unwrap();
        assert_eq!(track.sample_rate, 8_000);
        assert_eq!(track.channels, 1);
        assert!((track.duration - 2.0).abs() < 1e-3);
    }

    #[test]
    fn opens_wav_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music.wav");
        std::fs::write(&path, silent_wav(0.5, 4_000)).unwrap();

        let track = AudioTrack::open(&path).unwrap();
        assert!((track.duration - 0.5).abs() < 1e-3);

        std::fs::write(&path, b"RIFF garbage").unwrap();
        assert!(matches!(AudioTrack::open(&path), Err(DanceError::Audio(_))));
    }

    #[test]
    fn software_audio_stops_at_clip_end() {
        let mut audio = SoftwareAudio::new();
        audio.load(&AudioTrack {
            duration: 1.0,
            sample_rate: 44_100,
            channels: 2,
        });

        audio.set_time(0.5);
        audio.play();
        audio.advance(Duration::from_millis(250));
        assert!(audio.is_playing());
        assert!((audio.time() - 0.75).abs() < 1e-6);

        audio.advance(Duration::from_millis(500));
        assert!(!audio.is_playing());
        assert_eq!(audio.time(), 1.0);
    }

    #[test]
    fn software_audio_without_a_clip_never_plays() {
        let mut audio = SoftwareAudio::new();
        audio.play();
        assert!(!audio.is_playing());
        audio.set_time(3.0);
        assert_eq!(audio.time(), 0.0);
    }
}
