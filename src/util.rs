use crate::engine::VoiceKind;
use log::info;
use std::path::Path;

pub fn parse_voice_kind(s: &str) -> Option<VoiceKind> {
    match s.trim().to_lowercase().as_str() {
        "p" | "piano" => Some(VoiceKind::Piano),
        "d" | "drums" | "drum" | "percussion" => Some(VoiceKind::Drums),
        "b" | "bass" => Some(VoiceKind::Bass),
        "k" | "koto" => Some(VoiceKind::Koto),
        "t" | "trombone" => Some(VoiceKind::Trombone),
        "v" | "violin" | "strings" => Some(VoiceKind::Violin),
        other => {
            info!("Unknown voice '{}'..!", other);
            None
        }
    }
}

/// Parses `VOICE=DB`, e.g. `piano=3.5`.
pub fn parse_gain(s: &str) -> Result<(VoiceKind, f32), String> {
    let (voice, db) = s
        .split_once('=')
        .ok_or_else(|| format!("expected VOICE=DB, got '{}'", s))?;

    let kind = parse_voice_kind(voice).ok_or_else(|| {
        let known: Vec<&str> = VoiceKind::ALL.iter().map(|k| k.name()).collect();
        format!("unknown voice '{}', expected one of {}", voice, known.join("|"))
    })?;
    let db: f32 = db
        .trim()
        .parse()
        .map_err(|_| format!("invalid gain '{}'", db))?;

    if !db.is_finite() {
        return Err(format!("invalid gain '{}'", db));
    }

    Ok((kind, db))
}

/// True for paths ending in `.mid` or `.midi`, in any case.
pub fn is_midi_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn voice_aliases() {
        assert_eq!(parse_voice_kind("Piano"), Some(VoiceKind::Piano));
        assert_eq!(parse_voice_kind(" v "), Some(VoiceKind::Violin));
        assert_eq!(parse_voice_kind("percussion"), Some(VoiceKind::Drums));
        assert_eq!(parse_voice_kind("tuba"), None);

        for kind in VoiceKind::ALL {
            assert_eq!(parse_voice_kind(kind.name()), Some(kind));
        }
    }

    #[test]
    fn gains() {
        assert_eq!(parse_gain("piano=3.5"), Ok((VoiceKind::Piano, 3.5)));
        assert_eq!(parse_gain("bass= -6"), Ok((VoiceKind::Bass, -6.0)));
        assert!(parse_gain("piano").is_err());
        assert!(parse_gain("piano=loud").is_err());
        assert!(parse_gain("piano=inf").is_err());
        assert!(parse_gain("tuba=1").is_err());
    }

    #[test]
    fn midi_paths() {
        assert!(is_midi_path("song.mid"));
        assert!(is_midi_path("dir/Song.MIDI"));
        assert!(!is_midi_path("song.txt"));
        assert!(!is_midi_path("mid"));
    }
}
