use super::{Voice, VoiceKind, VoiceLoader};
use crate::model::mappings::note_name_from_midi;
use anyhow::Context;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

/// Voice that renders its triggers to the log instead of an audio device.
#[derive(Debug)]
pub struct TraceVoice {
    kind: VoiceKind,
    verbose: bool,
    gain_db: f32,
    /// (pitch, transport time its release tail ends)
    sounding: Vec<(u8, f64)>,
}

impl TraceVoice {
    pub fn new(kind: VoiceKind, verbose: bool) -> Self {
        Self {
            kind,
            verbose,
            gain_db: kind.default_gain_db(),
            sounding: Vec::new(),
        }
    }
}

impl Voice for TraceVoice {
    fn trigger(&mut self, pitch: u8, duration: f64, velocity: f64, at: f64) {
        self.sounding.retain(|(_, until)| *until > at);
        self.sounding.push((pitch, at + duration + self.kind.release_secs()));

        let label = format!("{} {}", self.kind, note_name_from_midi(pitch));
        if self.verbose {
            info!(
                "{:16} | at {:>9.3}s | duration: {:>7.3}s | velocity: {:.2} | gain: {:+.2} dB",
                label, at, duration, velocity, self.gain_db
            );
        } else {
            debug!("{} at {:.3}s for {:.3}s", label, at, duration);
        }
    }

    fn release_all(&mut self) {
        if !self.sounding.is_empty() {
            debug!("Releasing {} sounding {} note(s)..!", self.sounding.len(), self.kind);
        }
        self.sounding.clear();
    }

    fn set_gain(&mut self, db: f32) {
        self.gain_db = db;
    }
}

/// Builds trace voices, reading each voice's sample files first when a directory is given.
#[derive(Debug, Clone, Default)]
pub struct TraceVoiceLoader {
    pub samples_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl VoiceLoader for TraceVoiceLoader {
    fn load(&self, kind: VoiceKind) -> anyhow::Result<Box<dyn Voice>> {
        let mut sample_bytes = 0;

        if let Some(dir) = self.samples_dir.as_ref() {
            for (root, file) in kind.samples() {
                let path = dir.join(file);
                let bytes = fs::read(&path)
                    .with_context(|| format!("Failed to read {} sample {}", kind, path.display()))?;

                debug!("Loaded {} sample {} for note {}", kind, path.display(), root);
                sample_bytes += bytes.len();
            }
        }

        if sample_bytes > 0 {
            debug!("{} voice holds {} bytes of samples", kind, sample_bytes);
        }

        Ok(Box::new(TraceVoice::new(kind, self.verbose)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn release_tail_tracking() {
        let mut voice = TraceVoice::new(VoiceKind::Drums, false);
        voice.trigger(36, 0.1, 1.0, 0.0);
        voice.trigger(38, 0.1, 1.0, 0.2);
        assert_eq!(voice.sounding.len(), 2);

        // both earlier tails are over by 1.0s
        voice.trigger(42, 0.1, 1.0, 1.0);
        assert_eq!(voice.sounding.len(), 1);

        voice.release_all();
        assert!(voice.sounding.is_empty());
    }

    #[test]
    fn missing_samples_fail_the_load() {
        let loader = TraceVoiceLoader {
            samples_dir: Some(PathBuf::from("/nonexistent/samples")),
            verbose: false,
        };
        assert!(loader.load(VoiceKind::Koto).is_err());
        assert!(TraceVoiceLoader::default().load(VoiceKind::Koto).is_ok());
    }
}
