use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The text held no instrument section with at least one usable note.
    #[error("No playable data: the text contains no instrument tracks with notes")]
    NoPlayableData,

    #[error("The continuation contains only header lines, no musical data")]
    EmptyContinuation,

    #[error("Failed to parse MIDI: {0}")]
    Midi(#[from] midly::Error),

    #[error("SMPTE timecode MIDI timing is not supported")]
    UnsupportedTiming,

    /// Playback was requested before the audio subsystem was initialized.
    #[error("Audio subsystem is not ready, call init() before play()")]
    NotReady,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
