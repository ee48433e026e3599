mod codec;
mod engine;
mod error;
mod midi_exporter;
mod midi_importer;
mod model;
mod player;
mod util;

pub use codec::*;
pub use engine::*;
pub use error::*;
pub use midi_exporter::*;
pub use midi_importer::*;
pub use model::config::*;
pub use model::mappings::*;
pub use model::score::*;
pub use player::*;
pub use util::*;
