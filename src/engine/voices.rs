use super::{Voice, VoiceKind, VoiceLoader};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

enum Slot {
    /// Load running on a background thread; checked with `try_recv`, never awaited.
    Loading(Receiver<anyhow::Result<Box<dyn Voice>>>),
    Ready(Box<dyn Voice>),
    Failed,
}

/// Holds one voice per kind and the gain each should sound at.
///
/// Gains outlive voices: a gain set before a voice finishes loading is applied when it lands.
pub struct VoiceBank {
    slots: HashMap<VoiceKind, Slot>,
    gains: HashMap<VoiceKind, f32>,
}

impl VoiceBank {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            gains: VoiceKind::ALL
                .into_iter()
                .map(|kind| (kind, kind.default_gain_db()))
                .collect(),
        }
    }

    /// Starts loading every voice that is neither loaded nor loading.
    pub fn load_all(&mut self, loader: Arc<dyn VoiceLoader>) {
        for kind in VoiceKind::ALL {
            if matches!(self.slots.get(&kind), Some(Slot::Ready(_) | Slot::Loading(_))) {
                continue;
            }

            let (tx, rx) = mpsc::channel();
            let loader = Arc::clone(&loader);
            thread::spawn(move || {
                let _ = tx.send(loader.load(kind));
            });

            debug!("Loading {} voice..!", kind);
            self.slots.insert(kind, Slot::Loading(rx));
        }
    }

    /// Moves every finished load into place without blocking.
    pub fn poll(&mut self) {
        for (kind, slot) in self.slots.iter_mut() {
            let next = match slot {
                Slot::Loading(rx) => match rx.try_recv() {
                    Ok(Ok(mut voice)) => {
                        let gain = self.gains.get(kind).copied().unwrap_or(kind.default_gain_db());
                        voice.set_gain(gain);
                        info!("{} voice loaded (gain {:.2} dB)..!", kind, gain);
                        Slot::Ready(voice)
                    }
                    Ok(Err(why)) => {
                        warn!("Failed to load {} voice: {:?}", kind, why);
                        Slot::Failed
                    }
                    Err(TryRecvError::Empty) => continue,
                    Err(TryRecvError::Disconnected) => {
                        warn!("Loader for {} voice exited without a result..!", kind);
                        Slot::Failed
                    }
                },
                _ => continue,
            };

            *slot = next;
        }
    }

    pub fn is_ready(&self, kind: VoiceKind) -> bool {
        matches!(self.slots.get(&kind), Some(Slot::Ready(_)))
    }

    /// True once no load is still in flight.
    pub fn settled(&self) -> bool {
        !self.slots.values().any(|slot| matches!(slot, Slot::Loading(_)))
    }

    pub fn voice_mut(&mut self, kind: VoiceKind) -> Option<&mut Box<dyn Voice>> {
        match self.slots.get_mut(&kind) {
            Some(Slot::Ready(voice)) => Some(voice),
            _ => None,
        }
    }

    pub fn gain(&self, kind: VoiceKind) -> f32 {
        self.gains.get(&kind).copied().unwrap_or(kind.default_gain_db())
    }

    pub fn set_gain(&mut self, kind: VoiceKind, db: f32) {
        self.gains.insert(kind, db);
        if let Some(voice) = self.voice_mut(kind) {
            voice.set_gain(db);
        }
    }

    pub fn release_all(&mut self) {
        for slot in self.slots.values_mut() {
            if let Slot::Ready(voice) = slot {
                voice.release_all();
            }
        }
    }
}

impl Default for VoiceBank {
    fn default() -> Self {
        Self::new()
    }
}
