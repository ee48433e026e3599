use crate::error::{Error, Result};
use crate::model::mappings::{DRUM_CHANNEL, Instrument, midi_from_note_name, reverse_program};
use crate::model::score::*;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

const DEFAULT_TITLE: &str = "Converted MIDI";
const INSTRUMENT_PREFIX: &str = "Instrument:";
const NOTE_PREFIX: &str = "Note:";

static TITLE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)MIDI File:\s*(.+)").expect("title pattern is valid"));
static TEMPO_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Tempo:\s*([\d.]+)\s*BPM").expect("tempo pattern is valid"));
static TIME_SIGNATURE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Time Signature:\s*(\d+)/(\d+)").expect("time signature pattern is valid"));
static NOTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Note:\s*(.+?),\s*Time:\s*([^,]*?)\s*s,\s*Duration:\s*([^,]*?)\s*s,\s*Velocity:\s*(\S*)")
        .expect("note pattern is valid")
});
static NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("number pattern is valid")
});

/// Notes collected under one `Instrument:` line, label kept verbatim.
struct OpenInstrument {
    label: String,
    notes: Vec<NoteEvent>,
}

/// Parses text that may have been written or mangled by a generative process into a score.
///
/// Every malformed field is recovered on its own (dropped note, clamped value, default header
/// entry) and reported through the log. The only failure is a text with no instrument that
/// keeps at least one note, reported as [`Error::NoPlayableData`].
pub fn encode_text(text: &str) -> Result<Score> {
    let lines: Vec<&str> = text.trim().lines().map(str::trim).collect();

    let (header, body_start) = parse_header(&lines);
    let tracks = parse_body(&lines[body_start..]);

    if tracks.is_empty() {
        warn!("No tracks with notes were created from the text..!");
        return Err(Error::NoPlayableData);
    }

    debug!(
        "Encoded '{}' with {} track(s) and {} note(s)..!",
        header.title.as_deref().unwrap_or_default(),
        tracks.len(),
        tracks.iter().map(|t| t.notes.len()).sum::<usize>()
    );

    Ok(Score { header, tracks })
}

/// First pass over the lines ahead of the first `Instrument:` line.
fn parse_header(lines: &[&str]) -> (Header, usize) {
    let mut title: Option<String> = None;
    let mut tempo_resolved = false;
    let mut tempo_bpm: Option<f64> = None;
    let mut ts_resolved = false;
    let mut time_signature: Option<TimeSignature> = None;

    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];
        if line.starts_with(INSTRUMENT_PREFIX) {
            break;
        }
        index += 1;

        if line.is_empty() {
            continue;
        }

        if let Some(caps) = TITLE_LINE.captures(line) {
            if title.is_none() {
                title = Some(caps[1].trim().to_string());
                continue;
            }
        }

        if !tempo_resolved {
            if let Some(caps) = TEMPO_LINE.captures(line) {
                // the first tempo line settles the tempo, even when it is unusable
                tempo_resolved = true;
                match leading_number(&caps[1]).and_then(validate_bpm) {
                    Some(bpm) => {
                        info!("Parsed tempo: {} BPM", bpm);
                        tempo_bpm = Some(bpm);
                    }
                    None => warn!(
                        "Tempo '{}' is invalid or outside {}..={} BPM, using {} BPM..!",
                        &caps[1], MIN_BPM, MAX_BPM, DEFAULT_BPM
                    ),
                }
                continue;
            }
        }

        if let Some(caps) = TIME_SIGNATURE_LINE.captures(line) {
            if !ts_resolved {
                ts_resolved = true;
                let parsed = match (caps[1].parse::<u32>(), caps[2].parse::<u32>()) {
                    (Ok(num), Ok(den)) => TimeSignature::new(num, den),
                    _ => None,
                };

                if parsed.is_none() {
                    warn!("Invalid time signature '{}', using 4/4..!", &caps[0]);
                }
                time_signature = parsed;
            }
            continue;
        }

        debug!("Skipping unrecognized header line: '{}'", line);
    }

    let header = Header {
        title: Some(title.unwrap_or_else(|| DEFAULT_TITLE.to_string())),
        tempo_bpm,
        time_signature,
    };

    (header, index)
}

/// Second pass: instrument sections and their note lines.
fn parse_body(lines: &[&str]) -> Vec<Track> {
    let mut tracks: Vec<Track> = Vec::new();
    let mut current: Option<OpenInstrument> = None;

    for line in lines.iter().copied() {
        if let Some(label) = line.strip_prefix(INSTRUMENT_PREFIX) {
            flush(current.take(), &mut tracks);
            current = Some(OpenInstrument {
                label: label.trim().to_string(),
                notes: Vec::new(),
            });
        } else if line.starts_with(NOTE_PREFIX) {
            match current.as_mut() {
                Some(open) => {
                    if let Some(note) = parse_note_line(line) {
                        open.notes.push(note);
                    }
                }
                None => debug!("Ignoring note line outside an instrument section: '{}'", line),
            }
        } else if line.is_empty() {
            flush(current.take(), &mut tracks);
        } else {
            debug!("Skipping unrecognized line: '{}'", line);
        }
    }

    flush(current.take(), &mut tracks);
    tracks
}

fn flush(open: Option<OpenInstrument>, tracks: &mut Vec<Track>) {
    let Some(open) = open else {
        return;
    };

    if open.notes.is_empty() {
        debug!("Instrument '{}' has no usable notes, dropping it..!", open.label);
        return;
    }

    let channel = if open.label == Instrument::Drums.name() {
        DRUM_CHANNEL
    } else {
        0
    };

    tracks.push(Track {
        program: reverse_program(&open.label),
        channel,
        name: open.label,
        notes: open.notes,
    });
}

fn parse_note_line(line: &str) -> Option<NoteEvent> {
    let Some(caps) = NOTE_LINE.captures(line) else {
        warn!("Could not parse note line: '{}'", line);
        return None;
    };

    // "C2 (Bass Drum 1)" resolves through its first token
    let name = caps[1].split_whitespace().next().unwrap_or_default();
    let pitch = match midi_from_note_name(name) {
        Some(pitch) => pitch,
        None => {
            warn!("Note line '{}' has an unresolvable pitch '{}', skipping note..!", line, name);
            return None;
        }
    };

    let time = match leading_number(&caps[2]) {
        Some(time) if time >= 0.0 => time,
        _ => {
            warn!("Note line '{}' has invalid time '{}', skipping note..!", line, &caps[2]);
            return None;
        }
    };

    let duration = match leading_number(&caps[3]) {
        Some(duration) if duration > 0.0 => duration,
        _ => {
            warn!(
                "Note line '{}' has non-positive or invalid duration '{}', using {}s..!",
                line, &caps[3], MIN_NOTE_DURATION
            );
            MIN_NOTE_DURATION
        }
    };

    let velocity = match leading_number(&caps[4]) {
        Some(velocity) if (0.0..=1.0).contains(&velocity) => velocity,
        Some(velocity) => {
            warn!("Note line '{}' has out-of-range velocity {}, clamping..!", line, velocity);
            velocity.clamp(0.0, 1.0)
        }
        None => {
            warn!(
                "Note line '{}' has invalid velocity '{}', using {}..!",
                line, &caps[4], DEFAULT_VELOCITY
            );
            DEFAULT_VELOCITY
        }
    };

    Some(NoteEvent::new(pitch, time, duration, velocity))
}

/// Reads the leading decimal number of a field, ignoring trailing characters.
pub(crate) fn leading_number(field: &str) -> Option<f64> {
    NUMBER_PREFIX
        .find(field.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}
