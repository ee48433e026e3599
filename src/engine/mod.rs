use crate::model::mappings::Instrument;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod trace;
pub mod transport;
pub mod voices;

pub use trace::{TraceVoice, TraceVoiceLoader};
pub use transport::{Clock, ManualClock, SystemClock, TransportState, TriggerId};
pub use voices::VoiceBank;

/// The small palette of synthesis voices actually sounded during playback.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VoiceKind {
    Piano,
    Drums,
    Bass,
    Koto,
    Trombone,
    Violin,
}

impl VoiceKind {
    pub const ALL: [VoiceKind; 6] = [
        VoiceKind::Piano,
        VoiceKind::Drums,
        VoiceKind::Bass,
        VoiceKind::Koto,
        VoiceKind::Trombone,
        VoiceKind::Violin,
    ];

    /// Instruments without a dedicated voice sound on the piano.
    pub fn for_instrument(instrument: Instrument) -> VoiceKind {
        match instrument {
            Instrument::Drums => VoiceKind::Drums,
            Instrument::AcousticBass | Instrument::ElectricBass => VoiceKind::Bass,
            Instrument::Koto => VoiceKind::Koto,
            Instrument::Trombone => VoiceKind::Trombone,
            Instrument::Violin => VoiceKind::Violin,
            _ => VoiceKind::Piano,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            VoiceKind::Piano => "piano",
            VoiceKind::Drums => "drums",
            VoiceKind::Bass => "bass",
            VoiceKind::Koto => "koto",
            VoiceKind::Trombone => "trombone",
            VoiceKind::Violin => "violin",
        }
    }

    /// Gain in dB applied when nothing else was requested.
    pub const fn default_gain_db(self) -> f32 {
        match self {
            VoiceKind::Piano => 3.52,
            _ => 0.0,
        }
    }

    /// Release tail in seconds after a note's duration ends.
    pub const fn release_secs(self) -> f64 {
        match self {
            VoiceKind::Drums => 0.4,
            VoiceKind::Bass | VoiceKind::Koto => 0.8,
            _ => 1.0,
        }
    }

    /// Sample files backing this voice as `(root note, path under the samples directory)`.
    pub const fn samples(self) -> &'static [(&'static str, &'static str)] {
        match self {
            VoiceKind::Piano => &[("C5", "piano/c5.mp3")],
            VoiceKind::Drums => &[
                ("C2", "drum-kit/kick.mp3"),
                ("D2", "drum-kit/snare.mp3"),
                ("F#2", "drum-kit/closed-hat.mp3"),
                ("A#2", "drum-kit/open-hat.mp3"),
                ("C#3", "drum-kit/crash.mp3"),
            ],
            VoiceKind::Bass => &[("C3", "bass/c3.mp3")],
            VoiceKind::Koto => &[("C3", "koto/c3.mp3")],
            VoiceKind::Trombone => &[("C3", "trombone/c3.mp3")],
            VoiceKind::Violin => &[("C3", "violin/c3.mp3")],
        }
    }
}

impl fmt::Display for VoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait Voice: Send {
    /// Sound `pitch` for `duration` seconds; `at` is the transport time of the trigger.
    fn trigger(&mut self, pitch: u8, duration: f64, velocity: f64, at: f64);

    /// Cut every note that is still sounding.
    fn release_all(&mut self);

    fn set_gain(&mut self, db: f32);
}

/// Builds voices. Runs on a background thread, so it may block on I/O.
pub trait VoiceLoader: Send + Sync {
    fn load(&self, kind: VoiceKind) -> anyhow::Result<Box<dyn Voice>>;
}
