mod continuation;
mod decoder;
mod encoder;

pub use continuation::{duration_from_text, splice_continuation, title_from_text};
pub use decoder::{DecodedScore, decode_score};
pub use encoder::encode_text;
