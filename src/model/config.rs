use crate::engine::VoiceKind;
use crate::util::parse_gain;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "midi-scribe",
    about = "Turn MIDI files into readable note listings, and listings back into MIDI or sound!"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the note listing for a MIDI file.
    Decode {
        /// Path to the source MIDI file.
        midi: PathBuf,

        /// Title to print instead of the one embedded in the file.
        #[arg(short, long)]
        title: Option<String>,

        /// Print the decoded tracks as JSON instead of the listing.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Build a MIDI file from a note listing. Pass `-` to read the listing from stdin.
    Encode {
        /// Path to the listing, or `-`.
        text: PathBuf,

        /// Where to write the MIDI file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Append a generated continuation to a base listing, shifted past its end.
    Splice {
        /// The listing being continued.
        base: PathBuf,

        /// The generated continuation.
        generated: PathBuf,
    },

    /// Play a MIDI file or a note listing. Files ending in `.mid` or `.midi` are read as MIDI.
    Play {
        /// Path to the target file.
        file: PathBuf,

        /// Directory holding the voice sample files. Voices missing samples stay silent.
        #[arg(short, long)]
        samples: Option<PathBuf>,

        /// Per-voice gain in dB, e.g. `--gain piano=3.5`. May be repeated.
        #[arg(short, long = "gain", value_parser = parse_gain)]
        gains: Vec<(VoiceKind, f32)>,

        /// Prints every note as it sounds.
        #[arg(short, long)]
        verbose: bool,

        /// Delays the start of the performance by N seconds after the voices are loaded.
        #[arg(long = "delay-start", default_value_t = 0)]
        delay_start: u64,

        /// Seconds to wait for the voices to load before playing without the stragglers.
        #[arg(long = "load-timeout", default_value_t = 10)]
        load_timeout: u64,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn play_flags() {
        let args = Args::try_parse_from([
            "midi-scribe",
            "play",
            "song.txt",
            "--gain",
            "piano=-2",
            "-g",
            "drums=1.5",
            "--delay-start",
            "3",
        ])
        .unwrap();

        match args.command {
            Command::Play {
                file,
                samples,
                gains,
                verbose,
                delay_start,
                load_timeout,
            } => {
                assert_eq!(file, PathBuf::from("song.txt"));
                assert!(samples.is_none());
                assert_eq!(gains, vec![(VoiceKind::Piano, -2.0), (VoiceKind::Drums, 1.5)]);
                assert!(!verbose);
                assert_eq!(delay_start, 3);
                assert_eq!(load_timeout, 10);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn bad_gain_is_rejected() {
        assert!(Args::try_parse_from(["midi-scribe", "play", "x.mid", "--gain", "tuba=1"]).is_err());
        assert!(Args::try_parse_from(["midi-scribe", "play", "x.mid", "--gain", "piano"]).is_err());
    }

    #[test]
    fn decode_flags() {
        let args = Args::try_parse_from(["midi-scribe", "decode", "a.mid", "--json", "-t", "Name"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Decode { json: true, title: Some(ref t), .. } if t == "Name"
        ));
    }
}
