use crate::error::{Error, Result};
use crate::model::score::*;
use log::{debug, warn};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_MPQN: u32 = 500_000;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

struct NoteInterval {
    pub midi: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub velocity: u8,
}

#[derive(Default)]
struct TrackScan {
    name: Option<String>,
    channel: Option<u8>,
    program: Option<u8>,
    intervals: Vec<NoteInterval>,
}

#[derive(Debug, Clone)]
struct TempoSegment {
    pub mpqn: u32,
    pub start_tick: u64,
    pub secs_at_start: f64,
}

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<Score> {
    let bytes = fs::read(path.as_ref())?;
    let mut score = import_midi_bytes(&bytes)?;

    if score.header.title.is_none() {
        score.header.title = path
            .as_ref()
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string());
    }

    Ok(score)
}

/// Parses a standard MIDI byte stream into a structured score, one `Track` per source track.
pub fn import_midi_bytes(bytes: &[u8]) -> Result<Score> {
    let smf = Smf::parse(bytes)?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => return Err(Error::UnsupportedTiming),
    };

    debug!("Ticks per quarter note: {}", ticks_per_quarter);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    let mut time_signature: Option<(u64, TimeSignature)> = None;
    let mut scans: Vec<TrackScan> = Vec::with_capacity(smf.tracks.len());
    let mut last_tick: u64 = 0;

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut scan = TrackScan::default();
        let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
        let mut abs_tick: u64 = 0;

        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(micro) => {
                        let mpqn: u32 = micro.as_int();
                        tempo_changes.push((abs_tick, mpqn));
                        debug!(
                            "Tempo change at tick {} -> {} us/qn (track {})",
                            abs_tick, mpqn, track_idx
                        );
                    }
                    MetaMessage::TimeSignature(numerator, denominator_pow, _, _) => {
                        let parsed = 1u32
                            .checked_shl(*denominator_pow as u32)
                            .and_then(|den| TimeSignature::new(*numerator as u32, den));

                        match parsed {
                            Some(ts) if time_signature.is_none_or(|(tick, _)| abs_tick < tick) => {
                                time_signature = Some((abs_tick, ts));
                            }
                            Some(_) => {}
                            None => warn!(
                                "Ignoring invalid time signature {}/2^{} at tick {}..!",
                                numerator, denominator_pow, abs_tick
                            ),
                        }
                    }
                    MetaMessage::TrackName(bytes) => {
                        if scan.name.is_none() {
                            let name = String::from_utf8_lossy(bytes).trim().to_string();
                            debug!("Track {} name: {}", track_idx, name);
                            scan.name = Some(name);
                        }
                    }
                    _ => {}
                },
                TrackEventKind::Midi { channel, message } => {
                    let ch: u8 = channel.as_int();
                    if scan.channel.is_none() {
                        scan.channel = Some(ch);
                    }

                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            let velocity: u8 = vel.as_int();

                            if velocity == 0 {
                                close_note(&mut open_notes, &mut scan.intervals, ch, key.as_int(), abs_tick);
                            } else {
                                open_notes
                                    .entry((ch, key.as_int()))
                                    .or_default()
                                    .push((abs_tick, velocity));
                            }
                        }
                        MidiMessage::NoteOff { key, vel: _ } => {
                            close_note(&mut open_notes, &mut scan.intervals, ch, key.as_int(), abs_tick);
                        }
                        MidiMessage::ProgramChange { program } => {
                            if scan.program.is_none() {
                                scan.program = Some(program.as_int());
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        last_tick = last_tick.max(abs_tick);

        for ((ch, key), stack) in open_notes.into_iter() {
            for (start_tick, start_vel) in stack {
                let end_tick = if abs_tick > start_tick {
                    abs_tick
                } else {
                    start_tick + ticks_per_quarter
                };

                scan.intervals.push(NoteInterval {
                    midi: key,
                    start_tick,
                    end_tick,
                    velocity: start_vel,
                });

                warn!(
                    "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                    key, ch, start_tick, end_tick
                );
            }
        }

        scans.push(scan);
    }

    debug!("Last tick across all tracks: {}", last_tick);

    tempo_changes.sort_by_key(|(tick, _)| *tick);
    let tempo_bpm = tempo_changes.first().and_then(|(_, mpqn)| {
        let bpm = MICROSECONDS_PER_MINUTE / (*mpqn as f64);
        let valid = validate_bpm(bpm);
        if valid.is_none() {
            warn!("Tempo {:.2} BPM is outside {}..={} BPM, using {} BPM..!", bpm, MIN_BPM, MAX_BPM, DEFAULT_BPM);
        }
        valid
    });

    let segments = tempo_segments(&tempo_changes, ticks_per_quarter);
    let ticks_to_secs = |tick: u64| -> f64 {
        let segment = segments
            .iter()
            .rfind(|seg| seg.start_tick <= tick)
            .unwrap_or(&segments[0]);

        let delta_ticks = (tick - segment.start_tick) as f64;
        segment.secs_at_start
            + delta_ticks * (segment.mpqn as f64) / (ticks_per_quarter as f64) / 1_000_000.0
    };

    let title = scans.first().and_then(|s| s.name.clone()).filter(|n| !n.is_empty());

    // a format 1 conductor track without notes only carries the header metas
    if smf.header.format == Format::Parallel
        && scans.len() > 1
        && scans.first().is_some_and(|s| s.intervals.is_empty())
    {
        debug!("Dropping note-free conductor track..!");
        scans.remove(0);
    }

    let tracks = scans
        .into_iter()
        .map(|scan| {
            let mut notes: Vec<NoteEvent> = scan
                .intervals
                .into_iter()
                .map(|interval| {
                    let start = ticks_to_secs(interval.start_tick);
                    let end = ticks_to_secs(interval.end_tick);

                    if end <= start {
                        debug!(
                            "Zero-length note {} at {:.3}s, clamping to the minimum duration..!",
                            interval.midi, start
                        );
                    }

                    NoteEvent::new(
                        interval.midi,
                        start,
                        end - start,
                        interval.velocity as f64 / 127.0,
                    )
                })
                .collect();

            notes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.pitch.cmp(&b.pitch)));

            Track {
                name: scan.name.unwrap_or_default(),
                channel: scan.channel.unwrap_or(0),
                program: scan.program.unwrap_or(0),
                notes,
            }
        })
        .collect();

    Ok(Score {
        header: Header {
            title,
            tempo_bpm,
            time_signature: time_signature.map(|(_, ts)| ts),
        },
        tracks,
    })
}

/// Builds the tempo map, starting at the default tempo until the first tempo change.
fn tempo_segments(tempo_changes: &[(u64, u32)], ticks_per_quarter: u64) -> Vec<TempoSegment> {
    let mut segments = vec![TempoSegment {
        mpqn: DEFAULT_MPQN,
        start_tick: 0,
        secs_at_start: 0.0,
    }];

    for &(tick, mpqn) in tempo_changes {
        let Some(last) = segments.last() else {
            continue;
        };

        let delta_ticks = (tick - last.start_tick) as f64;
        let secs_at_start =
            last.secs_at_start + delta_ticks * (last.mpqn as f64) / (ticks_per_quarter as f64) / 1_000_000.0;

        if tick == last.start_tick {
            segments.pop();
        }

        segments.push(TempoSegment {
            mpqn,
            start_tick: tick,
            secs_at_start,
        });
    }

    segments
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    ch: u8,
    midi_num: u8,
    abs_tick: u64,
) {
    if let Some((start_tick, start_vel)) = open_notes.get_mut(&(ch, midi_num)).and_then(|s| s.pop()) {
        intervals.push(NoteInterval {
            midi: midi_num,
            start_tick,
            end_tick: abs_tick,
            velocity: start_vel,
        });
    } else {
        debug!(
            "Orphaned NoteOff for {} ch{} at tick {}..!",
            midi_num, ch, abs_tick
        );
    }
}
