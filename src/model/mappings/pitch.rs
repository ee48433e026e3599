use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

static NOTE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-G])([#b]?)(-?\d+)$").expect("note name pattern is valid"));
static RAW_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^MIDI#(-?\d+)$").expect("raw number pattern is valid"));

/// Renders a note number as `<name><octave>` with sharps, where 60 is `C4`.
pub fn note_name_from_midi(midi: u8) -> String {
    if midi > 127 {
        return format!("MIDI#{}", midi);
    }

    let octave = (midi / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave)
}

/// Resolves a pitch name such as `C4`, `F#-1`, `Bb3` or `MIDI#61` to a note number.
///
/// Returns `None` when the name does not follow the grammar or lands outside `0..=127`.
pub fn midi_from_note_name(name: &str) -> Option<u8> {
    let number = if let Some(caps) = NOTE_NAME.captures(name) {
        let base = match &caps[1] {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            _ => 11,
        };
        let accidental = match &caps[2] {
            "#" => 1,
            "b" => -1,
            _ => 0,
        };
        let octave: i64 = caps[3].parse().ok()?;

        (octave + 1)
            .checked_mul(12)?
            .checked_add(base + accidental)?
    } else if let Some(caps) = RAW_NUMBER.captures(name) {
        caps[1].parse::<i64>().ok()?
    } else {
        warn!("Could not parse note name '{}'..!", name);
        return None;
    };

    match u8::try_from(number) {
        Ok(midi) if midi <= 127 => Some(midi),
        _ => {
            warn!("Note '{}' resolves to {}, outside 0..=127..!", name, number);
            None
        }
    }
}
