use super::general_midi::{GM_INSTRUMENT_NAMES, gm_instrument_name};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel reserved for percussion (channel 10 in one-based numbering).
pub const DRUM_CHANNEL: u8 = 9;

/// The fixed set of instrument categories every General MIDI program collapses into.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instrument {
    Piano,
    Violin,
    StringEnsemble,
    LowStrings,
    HighGuitar,
    AcousticBass,
    ElectricBass,
    Flute,
    Clarinet,
    Drums,
    Koto,
    Trombone,
    Other,
}

impl Instrument {
    pub const ALL: [Instrument; 13] = [
        Instrument::Piano,
        Instrument::Violin,
        Instrument::StringEnsemble,
        Instrument::LowStrings,
        Instrument::HighGuitar,
        Instrument::AcousticBass,
        Instrument::ElectricBass,
        Instrument::Flute,
        Instrument::Clarinet,
        Instrument::Drums,
        Instrument::Koto,
        Instrument::Trombone,
        Instrument::Other,
    ];

    /// Label used for `Instrument:` sections in the text form.
    pub const fn name(self) -> &'static str {
        match self {
            Instrument::Piano => "Piano (Consolidated)",
            Instrument::Violin => "Violin (Consolidated)",
            Instrument::StringEnsemble => "String Ensemble (Consolidated)",
            Instrument::LowStrings => "Low Strings (Cello, Contrabass, etc.)",
            Instrument::HighGuitar => "High Guitar (Acoustic Steel, Electric Lead)",
            Instrument::AcousticBass => "Acoustic Bass",
            Instrument::ElectricBass => "Electric Bass",
            Instrument::Flute => "Flute Family",
            Instrument::Clarinet => "Clarinet Family",
            Instrument::Drums => "Drum Kit / Percussion",
            Instrument::Koto => "Koto",
            Instrument::Trombone => "Trombone",
            Instrument::Other => "Other Instrument",
        }
    }

    /// Representative program number. Drums sound through the drum channel, not a program.
    pub const fn program(self) -> u8 {
        match self {
            Instrument::Piano => 0,
            Instrument::Violin => 40,
            Instrument::StringEnsemble => 48,
            Instrument::LowStrings => 42,
            Instrument::HighGuitar => 25,
            Instrument::AcousticBass => 32,
            Instrument::ElectricBass => 33,
            Instrument::Flute => 73,
            Instrument::Clarinet => 71,
            Instrument::Drums => 0,
            Instrument::Koto => 107,
            Instrument::Trombone => 57,
            Instrument::Other => 46,
        }
    }

    pub const fn channel(self) -> u8 {
        match self {
            Instrument::Drums => DRUM_CHANNEL,
            _ => 0,
        }
    }

    pub fn from_name(label: &str) -> Option<Instrument> {
        Self::ALL.into_iter().find(|i| i.name() == label)
    }

    /// Maps a program number (and the drum-channel flag) to its consolidated identity.
    pub fn classify(program: u8, is_drum: bool) -> Instrument {
        if is_drum {
            return Instrument::Drums;
        }

        if let Some(instrument) = direct_lookup(program) {
            return instrument;
        }

        gm_instrument_name(program)
            .and_then(classify_by_keyword)
            .unwrap_or(Instrument::Other)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn direct_lookup(program: u8) -> Option<Instrument> {
    use Instrument::*;

    Some(match program {
        0..=7 => Piano,
        24..=31 => HighGuitar,
        32 => AcousticBass,
        33..=39 => ElectricBass,
        40 | 41 | 110 => Violin,
        42 | 43 | 49 => LowStrings,
        44 | 45 | 48 | 50 | 51 => StringEnsemble,
        57 => Trombone,
        71 => Clarinet,
        72..=75 => Flute,
        107 => Koto,
        47 | 113..=119 => Drums,
        _ => return None,
    })
}

fn classify_by_keyword(gm_name: &str) -> Option<Instrument> {
    use Instrument::*;

    let name = gm_name.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| name.contains(k));

    let instrument = if has(&["piano"]) {
        Piano
    } else if has(&["violin", "fiddle", "viola"]) {
        Violin
    } else if has(&["cello", "contrabass"]) {
        LowStrings
    } else if has(&["string ensemble", "synthstrings", "tremolo strings", "pizzicato strings"]) {
        StringEnsemble
    } else if has(&["guitar"]) && !has(&["bass"]) {
        HighGuitar
    } else if has(&["bass"]) && has(&["acoustic"]) {
        AcousticBass
    } else if has(&["bass"]) {
        ElectricBass
    } else if has(&["flute", "piccolo", "recorder"]) {
        Flute
    } else if has(&["clarinet"]) {
        Clarinet
    } else if has(&["koto"]) {
        Koto
    } else if has(&["trombone"]) {
        Trombone
    } else if has(&["drum", "percussion", "tom", "cymbal", "snare"]) {
        Drums
    } else {
        return None;
    };

    Some(instrument)
}

/// Resolves a free-form track label (usually a consolidated name) to a program number.
pub fn reverse_program(label: &str) -> u8 {
    if let Some(instrument) = Instrument::from_name(label) {
        return instrument.program();
    }

    if let Some(index) = GM_INSTRUMENT_NAMES.iter().position(|n| *n == label) {
        return index as u8;
    }

    let lower = label.to_lowercase();
    if lower.contains("piano") || lower.contains("drum") {
        return 0;
    }

    warn!("Unmapped instrument name '{}', defaulting to program 0 (piano)..!", label);
    0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drum_flag_wins() {
        assert_eq!(Instrument::classify(0, true), Instrument::Drums);
        assert_eq!(Instrument::classify(40, true), Instrument::Drums);
    }

    #[test]
    fn direct_table() {
        assert_eq!(Instrument::classify(3, false), Instrument::Piano);
        assert_eq!(Instrument::classify(41, false), Instrument::Violin);
        assert_eq!(Instrument::classify(49, false), Instrument::LowStrings);
        assert_eq!(Instrument::classify(110, false), Instrument::Violin);
        assert_eq!(Instrument::classify(118, false), Instrument::Drums);
    }

    #[test]
    fn keyword_fallback() {
        // "Lead 8 (bass + lead)" only matches through its name.
        assert_eq!(Instrument::classify(87, false), Instrument::ElectricBass);
        assert_eq!(Instrument::classify(46, false), Instrument::Other);
        assert_eq!(Instrument::classify(56, false), Instrument::Other);
        assert_eq!(Instrument::classify(0x7f, false), Instrument::Other);
    }

    #[test]
    fn reverse_lookup_is_left_inverse() {
        for instrument in Instrument::ALL {
            let program = reverse_program(instrument.name());
            let is_drum = instrument.channel() == DRUM_CHANNEL;
            assert_eq!(Instrument::classify(program, is_drum), instrument, "{}", instrument);
        }
    }

    #[test]
    fn reverse_lookup_fallbacks() {
        assert_eq!(reverse_program("Marimba"), 12);
        assert_eq!(reverse_program("Honky Piano Thing"), 0);
        assert_eq!(reverse_program("Big drums"), 0);
        assert_eq!(reverse_program("Kazoo"), 0);
    }
}
