use crate::model::mappings::{DRUM_CHANNEL, Instrument};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 500.0;

/// Shortest note the encoder will produce, in seconds.
pub const MIN_NOTE_DURATION: f64 = 0.01;
pub const DEFAULT_VELOCITY: f64 = 0.5;

pub const VALID_DENOMINATORS: [u8; 6] = [1, 2, 4, 8, 16, 32];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub pitch: u8,
    /// Onset in seconds from the start of the piece.
    pub time: f64,
    pub duration: f64,
    /// Normalized to `0.0..=1.0`.
    pub velocity: f64,
    /// General MIDI percussion key name, only set on drum-bucket notes.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub percussion: Option<&'static str>,
}

impl NoteEvent {
    /// Builds a note, clamping duration and velocity into their valid ranges.
    pub fn new(pitch: u8, time: f64, duration: f64, velocity: f64) -> Self {
        let duration = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            MIN_NOTE_DURATION
        };

        let velocity = if velocity.is_nan() {
            DEFAULT_VELOCITY
        } else {
            velocity.clamp(0.0, 1.0)
        };

        Self {
            pitch: pitch.min(127),
            time: time.max(0.0),
            duration,
            velocity,
            percussion: None,
        }
    }

    pub fn end(&self) -> f64 {
        self.time + self.duration
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    /// Returns `None` unless the numerator is positive and the denominator is a power of two up to 32.
    pub fn new(numerator: u32, denominator: u32) -> Option<Self> {
        let numerator = u8::try_from(numerator).ok().filter(|n| *n > 0)?;
        let denominator = u8::try_from(denominator)
            .ok()
            .filter(|d| VALID_DENOMINATORS.contains(d))?;

        Some(Self {
            numerator,
            denominator,
        })
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

/// Returns the tempo if it is finite and within `MIN_BPM..=MAX_BPM`.
pub fn validate_bpm(bpm: f64) -> Option<f64> {
    (bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&bpm)).then_some(bpm)
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub title: Option<String>,
    /// First tempo entry, `None` when the source never stated one.
    pub tempo_bpm: Option<f64>,
    /// First time signature entry, `None` when the source never stated a valid one.
    pub time_signature: Option<TimeSignature>,
}

impl Header {
    /// Tempo to use for playback and tick conversion.
    pub fn tempo(&self) -> f64 {
        self.tempo_bpm.and_then(validate_bpm).unwrap_or(DEFAULT_BPM)
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature.unwrap_or_default()
    }
}

/// One instrument track of a structured binary score.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub channel: u8,
    pub program: u8,
    pub notes: Vec<NoteEvent>,
}

impl Track {
    pub fn is_drum(&self) -> bool {
        self.channel == DRUM_CHANNEL
    }

    /// Consolidated identity this track sounds as.
    pub fn instrument(&self) -> Instrument {
        Instrument::classify(self.program, self.is_drum())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Score {
    pub header: Header,
    pub tracks: Vec<Track>,
}

impl Score {
    /// Latest note end over all tracks, in seconds.
    pub fn total_duration(&self) -> f64 {
        total_duration(self.tracks.iter().flat_map(|t| t.notes.iter()))
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

/// Notes of one consolidated instrument, sorted by onset then pitch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstrumentTrack {
    pub instrument: Instrument,
    pub notes: Vec<NoteEvent>,
}

pub fn total_duration<'a>(notes: impl IntoIterator<Item = &'a NoteEvent>) -> f64 {
    notes.into_iter().map(NoteEvent::end).fold(0.0, f64::max)
}
