use crate::error::Result;
use crate::model::score::{NoteEvent, Score};
use log::debug;
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;

pub const TICKS_PER_QUARTER: u16 = 480;

const MAX_DELTA: u64 = 0x0FFF_FFFF;
const MAX_MPQN: u32 = 0x00FF_FFFF;

pub fn export_midi_file<P: AsRef<Path>>(score: &Score, path: P) -> Result<()> {
    let bytes = export_midi_bytes(score)?;
    fs::write(path.as_ref(), bytes)?;
    debug!("Wrote MIDI file {}..!", path.as_ref().display());

    Ok(())
}

/// Serializes a score as a format 1 standard MIDI file.
///
/// Track 0 carries the title, tempo and time signature; each score track follows with its
/// name, a program change and its note on/off pairs. Seconds map to ticks at the header tempo.
pub fn export_midi_bytes(score: &Score) -> Result<Vec<u8>> {
    let bpm = score.header.tempo();
    let ticks_per_sec = bpm / 60.0 * TICKS_PER_QUARTER as f64;
    let to_tick = |secs: f64| -> u64 { (secs.max(0.0) * ticks_per_sec).round() as u64 };

    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let mut conductor: Track = Vec::new();
    if let Some(title) = score.header.title.as_deref() {
        conductor.push(meta(MetaMessage::TrackName(title.as_bytes())));
    }
    if score.header.tempo_bpm.is_some() {
        let mpqn = ((60_000_000.0 / bpm).round() as u32).min(MAX_MPQN);
        conductor.push(meta(MetaMessage::Tempo(u24::new(mpqn))));
    }
    if let Some(ts) = score.header.time_signature {
        let pow = ts.denominator.trailing_zeros() as u8;
        conductor.push(meta(MetaMessage::TimeSignature(ts.numerator, pow, 24, 8)));
    }
    conductor.push(meta(MetaMessage::EndOfTrack));
    smf.tracks.push(conductor);

    for track in &score.tracks {
        let channel = u4::new(track.channel.min(15));
        let mut events: Track = vec![
            meta(MetaMessage::TrackName(track.name.as_bytes())),
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(track.program.min(127)),
                    },
                },
            },
        ];

        // (tick, is_on, key, velocity); offs sort ahead of ons on the same tick
        let mut timeline: Vec<(u64, bool, u8, u8)> = Vec::with_capacity(track.notes.len() * 2);
        for note in &track.notes {
            let start = to_tick(note.time);
            let end = to_tick(note.end()).max(start + 1);
            let vel = midi_velocity(note);

            timeline.push((start, true, note.pitch.min(127), vel));
            timeline.push((end, false, note.pitch.min(127), 0));
        }
        timeline.sort_by_key(|(tick, is_on, key, _)| (*tick, *is_on, *key));

        let mut last_tick = 0u64;
        for (tick, is_on, key, vel) in timeline {
            let delta = (tick - last_tick).min(MAX_DELTA) as u32;
            last_tick = tick;

            let key = u7::new(key);
            let message = if is_on {
                MidiMessage::NoteOn { key, vel: u7::new(vel) }
            } else {
                MidiMessage::NoteOff { key, vel: u7::new(0) }
            };

            events.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi { channel, message },
            });
        }

        events.push(meta(MetaMessage::EndOfTrack));
        smf.tracks.push(events);
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;

    debug!(
        "Serialized {} track(s), {} note(s) into {} bytes..!",
        score.tracks.len(),
        score.note_count(),
        bytes.len()
    );

    Ok(bytes)
}

fn meta(message: MetaMessage<'_>) -> TrackEvent<'_> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(message),
    }
}

// NoteOn with velocity 0 reads back as a NoteOff, so sounding notes keep at least 1.
fn midi_velocity(note: &NoteEvent) -> u8 {
    ((note.velocity * 127.0).round() as u8).clamp(1, 127)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::midi_importer::import_midi_bytes;
    use crate::model::score::{Header, TimeSignature, Track};

    fn approx_eq(a: f64, b: f64) -> bool {
        // one tick at 90 BPM is ~1.4ms, velocity quantizes to 1/127
        (a - b).abs() <= 0.005
    }

    #[test]
    fn export_then_import_preserves_notes() {
        env_logger::try_init().unwrap_or(());

        let score = Score {
            header: Header {
                title: Some("Export".into()),
                tempo_bpm: Some(90.0),
                time_signature: TimeSignature::new(6, 8),
            },
            tracks: vec![
                Track {
                    name: "Drum Kit / Percussion".into(),
                    channel: 9,
                    program: 0,
                    notes: vec![NoteEvent::new(36, 0.0, 0.25, 0.9), NoteEvent::new(42, 0.5, 0.25, 0.4)],
                },
                Track {
                    name: "Koto".into(),
                    channel: 0,
                    program: 107,
                    notes: vec![NoteEvent::new(62, 1.0, 1.5, 0.6)],
                },
            ],
        };

        let bytes = export_midi_bytes(&score).unwrap();
        let back = import_midi_bytes(&bytes).unwrap();

        assert_eq!(back.header.title.as_deref(), Some("Export"));
        assert!(approx_eq(back.header.tempo_bpm.unwrap(), 90.0));
        assert_eq!(back.header.time_signature, TimeSignature::new(6, 8));

        // the conductor track is not read back as an instrument
        assert_eq!(back.tracks.len(), 2);
        let drums = &back.tracks[0];
        assert_eq!(drums.channel, 9);
        assert_eq!(drums.name, "Drum Kit / Percussion");
        assert_eq!(drums.notes.len(), 2);
        assert!(approx_eq(drums.notes[1].time, 0.5));
        assert!(approx_eq(drums.notes[1].velocity, 0.4));

        let koto = &back.tracks[1];
        assert_eq!(koto.program, 107);
        assert!(approx_eq(koto.notes[0].time, 1.0));
        assert!(approx_eq(koto.notes[0].duration, 1.5));
    }

    #[test]
    fn default_markers_survive_export() {
        let score = Score {
            header: Header::default(),
            tracks: vec![Track {
                name: String::new(),
                channel: 0,
                program: 0,
                notes: vec![NoteEvent::new(60, 0.0, 0.5, 0.0)],
            }],
        };

        let back = import_midi_bytes(&export_midi_bytes(&score).unwrap()).unwrap();
        assert_eq!(back.header.tempo_bpm, None);
        assert_eq!(back.header.time_signature, None);
        // silent velocity is lifted so the note is not read back as a NoteOff
        assert_eq!(back.tracks.len(), 1);
        assert_eq!(back.tracks[0].notes.len(), 1);
    }
}
