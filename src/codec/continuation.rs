use super::encoder::leading_number;
use crate::error::{Error, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

const HEADER_PREFIXES: [&str; 5] = [
    "MIDI File:",
    "Tempo:",
    "Time Signature:",
    "Total Tracks (in source MIDI):",
    "Consolidated Instrument Tracks:",
];

static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)MIDI File:\s*(.+)").expect("title pattern is valid"));
static NOTE_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Time:\s*([\d.]+?)s,\s*Duration:\s*([\d.]+?)s").expect("timing pattern is valid")
});
static NOTE_FIELDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Note:\s*(.+?),\s*Time:\s*([\d.]+?)s,\s*Duration:\s*([\d.]+?)s,\s*Velocity:\s*([\d.]+)")
        .expect("note pattern is valid")
});

/// Title from a `MIDI File:` entry on the first line.
pub fn title_from_text(text: &str) -> Option<String> {
    let first = text.lines().next()?;
    TITLE
        .captures(first)
        .map(|caps| caps[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Latest note end in seconds over the note lines of a text score.
pub fn duration_from_text(text: &str) -> f64 {
    let mut max_end = 0.0f64;
    let mut in_instrument = false;

    for line in text.lines().map(str::trim) {
        if line.starts_with("Instrument:") {
            in_instrument = true;
            continue;
        }

        if !line.starts_with("Note:") {
            continue;
        }
        if !in_instrument {
            debug!("Counting a note line outside any instrument section: '{}'", line);
        }

        let Some(caps) = NOTE_TIMING.captures(line) else {
            continue;
        };

        match (leading_number(&caps[1]), leading_number(&caps[2])) {
            (Some(time), Some(duration)) => max_end = max_end.max(time + duration),
            _ => warn!("Failed to parse time/duration for line: '{}'", line),
        }
    }

    max_end
}

/// Appends generated continuation text after an existing score.
///
/// Header-like lines are removed from the generated text and its notes are shifted to start
/// where the base score ends. With an empty base the cleaned text is returned unshifted.
pub fn splice_continuation(base: &str, generated: &str) -> Result<String> {
    let cleaned = generated
        .trim()
        .lines()
        .filter(|line| {
            let line = line.trim();
            !HEADER_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
        })
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(Error::EmptyContinuation);
    }

    if base.trim().is_empty() {
        return Ok(cleaned.to_string());
    }

    let offset = duration_from_text(base);
    debug!("Shifting continuation notes by {:.2}s..!", offset);

    let shifted = cleaned
        .lines()
        .map(|line| shift_note_line(line, offset).unwrap_or_else(|| line.to_string()))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!("{}\n\n{}", base.trim(), shifted))
}

fn shift_note_line(line: &str, offset: f64) -> Option<String> {
    let caps = NOTE_FIELDS.captures(line.trim())?;
    let time = leading_number(&caps[2])? + offset;

    Some(format!(
        "  Note: {}, Time: {:.2}s, Duration: {}s, Velocity: {}",
        caps[1].trim(),
        time,
        &caps[3],
        &caps[4]
    ))
}
