use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use midi_scribe::{
    Args, Command, PlaybackEngine, Score, SystemClock, TraceVoiceLoader,
    decode_score, encode_text, export_midi_file, import_midi_file, is_midi_path,
    splice_continuation,
};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Decode { midi, title, json } => {
            info!("Importing MIDI file: '{}'...", midi.display());
            let score = import_midi_file(&midi)?;
            let decoded = decode_score(&score, title.as_deref());

            debug!(
                "Decoded '{}' into {} instrument track(s) lasting {:.2}s..!",
                decoded.title,
                decoded.tracks.len(),
                decoded.total_duration
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&decoded)?);
            } else {
                println!("{}", decoded.text);
            }
        }
        Command::Encode { text, output } => {
            let text = read_text(&text)?;
            let score = encode_text(&text)?;

            export_midi_file(&score, &output)?;
            info!(
                "Wrote {} note(s) across {} track(s) to '{}'..!",
                score.note_count(),
                score.tracks.len(),
                output.display()
            );
        }
        Command::Splice { base, generated } => {
            let base = read_text(&base)?;
            let generated = read_text(&generated)?;

            println!("{}", splice_continuation(&base, &generated)?);
        }
        Command::Play {
            file,
            samples,
            gains,
            verbose,
            delay_start,
            load_timeout,
        } => {
            let score = load_score(&file)?;
            debug!(
                "Loaded '{}' with {} note(s)..!",
                score.header.title.as_deref().unwrap_or("<unknown>"),
                score.note_count()
            );

            let mut engine = PlaybackEngine::new(
                SystemClock::new(),
                TraceVoiceLoader {
                    samples_dir: samples,
                    verbose,
                },
            );
            for (kind, db) in gains {
                engine.set_gain(kind, db);
            }

            engine.init();
            if !engine.wait_for_voices(Duration::from_secs(load_timeout)) {
                warn!("Playing without the voices that have not loaded yet..!");
            }

            let stop = Arc::new(AtomicBool::new(false));
            let stop_for_handler = Arc::clone(&stop);

            ctrlc::set_handler(move || {
                warn!("Ctrl-C received, stopping playback..!");
                stop_for_handler.store(true, Ordering::SeqCst);
            })
            .context("Error setting Ctrl-C handler..!")?;

            if delay_start > 0 {
                info!("Starting playback in {} seconds..!", delay_start);
                spin_sleep::sleep(Duration::from_secs(delay_start));
            }

            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            let report = engine.play(&score)?;
            if report.scheduled == 0 {
                warn!("Nothing to play..!");
            }

            engine.run_until_idle(&stop);
            info!("Playback finished, exiting..!");
        }
    }

    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read from stdin")?;
        return Ok(text);
    }

    fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn load_score(path: &Path) -> Result<Score> {
    if is_midi_path(path) {
        info!("Importing MIDI file: '{}'...", path.display());
        return Ok(import_midi_file(path)?);
    }

    info!("Encoding note listing: '{}'...", path.display());
    Ok(encode_text(&read_text(path)?)?)
}
