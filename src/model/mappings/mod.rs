mod general_midi;
mod instruments;
mod pitch;

pub use general_midi::{GM_INSTRUMENT_NAMES, gm_instrument_name, percussion_name};
pub use instruments::{DRUM_CHANNEL, Instrument, reverse_program};
pub use pitch::{midi_from_note_name, note_name_from_midi};
