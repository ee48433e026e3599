use crate::model::mappings::{Instrument, note_name_from_midi, percussion_name};
use crate::model::score::{InstrumentTrack, NoteEvent, Score, total_duration};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

const UNKNOWN_TITLE: &str = "Unknown";

/// Canonical text plus the same consolidated tracks in structured form.
#[derive(Serialize, Debug, Clone)]
pub struct DecodedScore {
    pub text: String,
    pub tracks: Vec<InstrumentTrack>,
    pub total_duration: f64,
    pub title: String,
}

/// Renders a structured score into the line-oriented text form.
///
/// Source tracks collapse into one bucket per consolidated instrument. Buckets are ordered with
/// drums first and the rest by display name, and each bucket's notes by onset then pitch. This
/// never fails: a score without notes still renders a valid header.
pub fn decode_score(score: &Score, title_override: Option<&str>) -> DecodedScore {
    let title = title_override
        .or(score.header.title.as_deref())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(UNKNOWN_TITLE)
        .to_string();

    let mut buckets: BTreeMap<Instrument, Vec<NoteEvent>> = BTreeMap::new();
    for track in &score.tracks {
        let instrument = track.instrument();
        debug!(
            "Track '{}' (channel {}, program {}) -> {}",
            track.name, track.channel, track.program, instrument
        );

        let notes = buckets.entry(instrument).or_default();
        notes.extend(track.notes.iter().cloned().map(|mut note| {
            if instrument == Instrument::Drums {
                note.percussion = percussion_name(note.pitch);
            }
            note
        }));
    }

    let mut ordered: Vec<(Instrument, Vec<NoteEvent>)> = buckets.into_iter().collect();
    ordered.sort_by(|(a, _), (b, _)| {
        (*a != Instrument::Drums)
            .cmp(&(*b != Instrument::Drums))
            .then_with(|| a.name().cmp(b.name()))
    });

    let mut text = String::new();
    let _ = writeln!(text, "MIDI File: {}", title);
    match score.header.tempo_bpm {
        Some(bpm) => {
            let _ = writeln!(text, "Tempo: {:.0} BPM", bpm);
        }
        None => text.push_str("Tempo: 120 BPM (Default)\n"),
    }
    match score.header.time_signature {
        Some(ts) => {
            let _ = writeln!(text, "Time Signature: {}/{}", ts.numerator, ts.denominator);
        }
        None => text.push_str("Time Signature: 4/4 (Default)\n"),
    }
    let _ = writeln!(text, "Total Tracks (in source MIDI): {}", score.tracks.len());
    let _ = writeln!(text, "Consolidated Instrument Tracks: {}\n", ordered.len());

    let mut tracks = Vec::with_capacity(ordered.len());
    for (instrument, mut notes) in ordered {
        notes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.pitch.cmp(&b.pitch)));

        let _ = writeln!(text, "Instrument: {}", instrument);
        if notes.is_empty() {
            text.push_str("  (No notes for this instrument)\n");
        }
        for note in &notes {
            render_note(&mut text, note);
        }
        text.push('\n');

        if !notes.is_empty() {
            tracks.push(InstrumentTrack { instrument, notes });
        }
    }

    let total_duration = total_duration(tracks.iter().flat_map(|t| t.notes.iter()));

    DecodedScore {
        text: text.trim().to_string(),
        tracks,
        total_duration,
        title,
    }
}

fn render_note(out: &mut String, note: &NoteEvent) {
    let mut name = note_name_from_midi(note.pitch);
    if let Some(label) = note.percussion {
        let _ = write!(name, " ({})", label);
    }

    let _ = writeln!(
        out,
        "  Note: {}, Time: {:.2}s, Duration: {:.2}s, Velocity: {:.2}",
        name, note.time, note.duration, note.velocity
    );
}
