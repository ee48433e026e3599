use crate::engine::transport::{Clock, Transport, TriggerId};
use crate::engine::voices::VoiceBank;
use crate::engine::{VoiceKind, VoiceLoader};
use crate::error::{Error, Result};
use crate::model::score::Score;
use log::{debug, info, warn};
use serde::Serialize;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Silence kept after the last note before playback reports itself finished.
pub const END_MARGIN_SECS: f64 = 0.5;

const MAX_SLEEP_CHUNK_S: f64 = 0.010;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Note {
        voice: VoiceKind,
        pitch: u8,
        duration: f64,
        velocity: f64,
    },
    End,
}

/// Triggers registered by one `play` call. Invalid as soon as the next one starts.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    handles: Vec<TriggerId>,
    total_duration: f64,
}

impl PlaybackSession {
    pub fn handles(&self) -> &[TriggerId] {
        &self.handles
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct PlaybackReport {
    /// Note triggers registered, not counting the end marker.
    pub scheduled: usize,
    /// Notes skipped because their voice was not ready.
    pub dropped: usize,
    pub total_duration: f64,
}

type StateListener = Box<dyn FnMut(PlaybackState)>;

/// Schedules every note of a score against one transport and fires them through the voice bank.
///
/// All state lives in the engine; nothing is shared between instances. Every method returns
/// without blocking except [`PlaybackEngine::wait_for_voices`] and
/// [`PlaybackEngine::run_until_idle`].
pub struct PlaybackEngine {
    transport: Transport<Trigger>,
    voices: VoiceBank,
    loader: Arc<dyn VoiceLoader>,
    state: PlaybackState,
    session: Option<PlaybackSession>,
    listener: Option<StateListener>,
    initialized: bool,
}

impl PlaybackEngine {
    pub fn new<C, L>(clock: C, loader: L) -> Self
    where
        C: Clock + 'static,
        L: VoiceLoader + 'static,
    {
        Self {
            transport: Transport::new(Box::new(clock)),
            voices: VoiceBank::new(),
            loader: Arc::new(loader),
            state: PlaybackState::Idle,
            session: None,
            listener: None,
            initialized: false,
        }
    }

    /// Brings up the audio side: starts loading every voice in the background.
    pub fn init(&mut self) {
        if self.initialized {
            self.voices.poll();
            return;
        }

        self.voices.load_all(Arc::clone(&self.loader));
        self.initialized = true;
        debug!("Playback engine initialized..!");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Blocks until no voice is still loading, or the timeout passes. Returns whether all settled.
    pub fn wait_for_voices(&mut self, timeout: Duration) -> bool {
        let start = Instant::now();

        loop {
            self.voices.poll();
            if self.voices.settled() {
                return true;
            }
            if start.elapsed() >= timeout {
                warn!("Voices still loading after {:?}..!", timeout);
                return false;
            }

            spin_sleep::sleep(Duration::from_millis(5));
        }
    }

    pub fn poll_voices(&mut self) {
        self.voices.poll();
    }

    pub fn voice_ready(&self, kind: VoiceKind) -> bool {
        self.voices.is_ready(kind)
    }

    /// Replaces the listener told about every state transition.
    pub fn on_state_change<F>(&mut self, listener: F)
    where
        F: FnMut(PlaybackState) + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn pending_triggers(&self) -> usize {
        self.transport.pending()
    }

    pub fn tempo(&self) -> f64 {
        self.transport.bpm()
    }

    /// Replaces whatever was playing with `score`, scheduling every note up front.
    ///
    /// Notes whose voice has not finished loading are dropped for this pass, never deferred.
    pub fn play(&mut self, score: &Score) -> Result<PlaybackReport> {
        if !self.initialized {
            return Err(Error::NotReady);
        }

        self.voices.poll();
        // the previous session must be gone before anything new is registered
        self.cancel_session();

        let bpm = score.header.tempo();
        self.transport.set_bpm(bpm);
        debug!("Transport tempo set to {} BPM", bpm);

        let mut handles = Vec::with_capacity(score.note_count() + 1);
        let mut dropped = 0;

        for (index, track) in score.tracks.iter().enumerate() {
            let instrument = track.instrument();
            let voice = VoiceKind::for_instrument(instrument);

            if !self.voices.is_ready(voice) {
                warn!(
                    "{} voice not ready for track {} '{}' ({}), skipping {} note(s)..!",
                    voice,
                    index,
                    track.name,
                    instrument,
                    track.notes.len()
                );
                dropped += track.notes.len();
                continue;
            }

            debug!(
                "Track {} '{}' (program {}, channel {}) using the {} voice",
                index, track.name, track.program, track.channel, voice
            );

            for note in &track.notes {
                let trigger = Trigger::Note {
                    voice,
                    pitch: note.pitch,
                    duration: note.duration,
                    velocity: note.velocity,
                };
                handles.push(self.transport.schedule_once(note.time, trigger));
            }
        }

        let scheduled = handles.len();
        let total_duration = score.total_duration();
        handles.push(
            self.transport
                .schedule_once(total_duration + END_MARGIN_SECS, Trigger::End),
        );

        self.session = Some(PlaybackSession {
            handles,
            total_duration,
        });
        self.transport.start();
        self.set_state(PlaybackState::Playing);

        info!(
            "Playback started: {} note(s) scheduled, {} dropped, total duration {:.2}s..!",
            scheduled, dropped, total_duration
        );

        Ok(PlaybackReport {
            scheduled,
            dropped,
            total_duration,
        })
    }

    /// Holds the transport; pending triggers keep their absolute times.
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.transport.pause();
            self.set_state(PlaybackState::Paused);
            info!("Playback paused at {:.3}s..!", self.transport.position());
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.transport.start();
            self.set_state(PlaybackState::Playing);
            info!("Playback resumed at {:.3}s..!", self.transport.position());
        }
    }

    pub fn stop(&mut self) {
        self.cancel_session();
        self.set_state(PlaybackState::Idle);
    }

    /// Transport position while playing or paused, 0 otherwise.
    pub fn current_time(&self) -> f64 {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => self.transport.position(),
            PlaybackState::Idle => 0.0,
        }
    }

    pub fn gain(&self, kind: VoiceKind) -> f32 {
        self.voices.gain(kind)
    }

    /// Applies now if the voice exists, otherwise when it finishes loading.
    pub fn set_gain(&mut self, kind: VoiceKind, db: f32) {
        self.voices.set_gain(kind, db);
    }

    /// Fires every trigger that is due. Returns how many notes were sounded.
    pub fn pump(&mut self) -> usize {
        self.voices.poll();

        if self.state != PlaybackState::Playing {
            return 0;
        }

        let mut fired = 0;
        while let Some((at, trigger)) = self.transport.pop_due() {
            match trigger {
                Trigger::Note {
                    voice,
                    pitch,
                    duration,
                    velocity,
                } => {
                    if let Some(v) = self.voices.voice_mut(voice) {
                        v.trigger(pitch, duration, velocity, at);
                        fired += 1;
                    }
                }
                Trigger::End => {
                    info!("Playback finished..!");
                    self.transport.stop();
                    self.transport.cancel_all();
                    self.session = None;
                    self.set_state(PlaybackState::Idle);
                    break;
                }
            }
        }

        fired
    }

    /// Drives [`PlaybackEngine::pump`] until playback ends or `stop` is raised.
    pub fn run_until_idle(&mut self, stop: &AtomicBool) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        while self.state != PlaybackState::Idle {
            if stop.load(Ordering::SeqCst) {
                self.stop();
                warn!("Playback stopped via control flag..!");
                return;
            }

            self.pump();

            let chunk = self
                .transport
                .next_due_in()
                .unwrap_or(MAX_SLEEP_CHUNK_S)
                .min(MAX_SLEEP_CHUNK_S);

            if chunk > 0.0 {
                sleeper.sleep(Duration::from_secs_f64(chunk));
            }
        }
    }

    fn cancel_session(&mut self) {
        self.transport.stop();
        let cancelled = self.transport.cancel_all();
        self.voices.release_all();

        if self.session.take().is_some() {
            debug!("Cancelled {} pending trigger(s)..!", cancelled);
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }

        self.state = state;
        if let Some(listener) = self.listener.as_mut() {
            listener(state);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::encode_text;
    use crate::engine::Voice;
    use crate::engine::transport::ManualClock;
    use crate::model::score::{Header, NoteEvent, Track};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;

    type Triggers = Arc<Mutex<Vec<(VoiceKind, u8, f64)>>>;
    type Gains = Arc<Mutex<Vec<(VoiceKind, f32)>>>;

    struct RecordingVoice {
        kind: VoiceKind,
        triggers: Triggers,
        gains: Gains,
        releases: Arc<Mutex<usize>>,
    }

    impl Voice for RecordingVoice {
        fn trigger(&mut self, pitch: u8, _duration: f64, _velocity: f64, at: f64) {
            self.triggers.lock().unwrap().push((self.kind, pitch, at));
        }

        fn release_all(&mut self) {
            *self.releases.lock().unwrap() += 1;
        }

        fn set_gain(&mut self, db: f32) {
            self.gains.lock().unwrap().push((self.kind, db));
        }
    }

    #[derive(Default)]
    struct RecordingLoader {
        triggers: Triggers,
        gains: Gains,
        releases: Arc<Mutex<usize>>,
        broken: Vec<VoiceKind>,
        /// Kinds whose load blocks until the gate opens.
        gated: Vec<VoiceKind>,
        gate: Option<Mutex<Receiver<()>>>,
    }

    impl VoiceLoader for RecordingLoader {
        fn load(&self, kind: VoiceKind) -> anyhow::Result<Box<dyn Voice>> {
            if self.broken.contains(&kind) {
                anyhow::bail!("no samples for {}", kind);
            }
            if self.gated.contains(&kind) {
                if let Some(gate) = self.gate.as_ref() {
                    let _ = gate.lock().unwrap().recv();
                }
            }

            Ok(Box::new(RecordingVoice {
                kind,
                triggers: Arc::clone(&self.triggers),
                gains: Arc::clone(&self.gains),
                releases: Arc::clone(&self.releases),
            }))
        }
    }

    struct Rig {
        clock: ManualClock,
        engine: PlaybackEngine,
        triggers: Triggers,
        gains: Gains,
        releases: Arc<Mutex<usize>>,
    }

    fn rig_with(loader: RecordingLoader) -> Rig {
        env_logger::try_init().unwrap_or(());

        let clock = ManualClock::new();
        let triggers = Arc::clone(&loader.triggers);
        let gains = Arc::clone(&loader.gains);
        let releases = Arc::clone(&loader.releases);
        let engine = PlaybackEngine::new(clock.clone(), loader);

        Rig {
            clock,
            engine,
            triggers,
            gains,
            releases,
        }
    }

    fn ready_rig() -> Rig {
        let mut rig = rig_with(RecordingLoader::default());
        rig.engine.init();
        assert!(rig.engine.wait_for_voices(Duration::from_secs(10)));
        rig
    }

    fn gated_rig(gated: Vec<VoiceKind>) -> (Rig, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let mut rig = rig_with(RecordingLoader {
            gated,
            gate: Some(Mutex::new(rx)),
            ..Default::default()
        });
        rig.engine.init();

        let start = Instant::now();
        while !rig.engine.voice_ready(VoiceKind::Piano) && start.elapsed() < Duration::from_secs(10) {
            rig.engine.poll_voices();
            std::thread::yield_now();
        }
        (rig, tx)
    }

    fn track(program: u8, channel: u8, notes: &[(u8, f64)]) -> Track {
        Track {
            name: String::new(),
            channel,
            program,
            notes: notes.iter().map(|&(p, t)| NoteEvent::new(p, t, 0.5, 0.8)).collect(),
        }
    }

    fn score(tracks: Vec<Track>) -> Score {
        Score {
            header: Header::default(),
            tracks,
        }
    }

    fn step(rig: &mut Rig, secs: f64) -> usize {
        rig.clock.advance(secs);
        rig.engine.pump()
    }

    fn fired(rig: &Rig) -> Vec<(VoiceKind, u8, f64)> {
        rig.triggers.lock().unwrap().clone()
    }

    #[test]
    fn play_before_init_is_not_ready() {
        let mut rig = rig_with(RecordingLoader::default());
        let result = rig.engine.play(&score(vec![track(0, 0, &[(60, 0.0)])]));

        assert!(matches!(result, Err(Error::NotReady)));
        assert_eq!(rig.engine.state(), PlaybackState::Idle);
        assert_eq!(rig.engine.pending_triggers(), 0);
    }

    #[test]
    fn notes_fire_in_onset_order_at_absolute_times() {
        let mut rig = ready_rig();
        let report = rig
            .engine
            .play(&score(vec![
                track(0, 0, &[(60, 1.0), (64, 0.0)]),
                track(40, 0, &[(76, 0.5)]),
                track(0, 9, &[(36, 1.0)]),
            ]))
            .unwrap();

        assert_eq!(report.scheduled, 4);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.total_duration, 1.5);
        assert_eq!(rig.engine.pending_triggers(), 5);
        assert_eq!(rig.engine.session().unwrap().handles().len(), 5);

        assert_eq!(rig.engine.pump(), 1);
        assert_eq!(step(&mut rig, 0.25), 0);
        assert_eq!(step(&mut rig, 0.25), 1);
        assert_eq!(step(&mut rig, 1.0), 2);

        assert_eq!(
            fired(&rig),
            vec![
                (VoiceKind::Piano, 64, 0.0),
                (VoiceKind::Violin, 76, 0.5),
                (VoiceKind::Piano, 60, 1.0),
                (VoiceKind::Drums, 36, 1.0),
            ]
        );
    }

    #[test]
    fn replay_invalidates_previous_score() {
        let mut rig = ready_rig();
        let score_a = score(vec![track(0, 0, &[(50, 0.0), (51, 1.0), (52, 2.0)])]);
        let score_b = score(vec![track(0, 0, &[(70, 0.0), (71, 1.0)])]);

        rig.engine.play(&score_a).unwrap();
        rig.engine.play(&score_b).unwrap();
        assert_eq!(rig.engine.pending_triggers(), 3);

        for _ in 0..40 {
            step(&mut rig, 0.1);
        }

        let pitches: Vec<u8> = fired(&rig).iter().map(|(_, p, _)| *p).collect();
        assert_eq!(pitches, vec![70, 71]);
        assert_eq!(rig.engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn replay_mid_song_restarts_clock() {
        let mut rig = ready_rig();
        rig.engine
            .play(&score(vec![track(0, 0, &[(50, 0.0), (51, 1.0), (52, 2.0)])]))
            .unwrap();
        step(&mut rig, 1.2);
        assert_eq!(fired(&rig).len(), 2);

        rig.engine.play(&score(vec![track(57, 0, &[(40, 0.5)])])).unwrap();
        assert_eq!(rig.engine.current_time(), 0.0);
        step(&mut rig, 5.0);

        let fired = fired(&rig);
        assert_eq!(fired.len(), 3);
        assert_eq!(fired[2], (VoiceKind::Trombone, 40, 0.5));
        assert!(*rig.releases.lock().unwrap() > 0);
    }

    #[test]
    fn pause_keeps_pending_triggers() {
        let mut rig = ready_rig();
        rig.engine
            .play(&score(vec![track(0, 0, &[(60, 0.0), (62, 2.0)])]))
            .unwrap();

        step(&mut rig, 1.0);
        rig.engine.pause();
        assert_eq!(rig.engine.state(), PlaybackState::Paused);

        assert_eq!(step(&mut rig, 10.0), 0);
        assert_eq!(rig.engine.current_time(), 1.0);
        assert_eq!(rig.engine.pending_triggers(), 2);

        rig.engine.resume();
        assert_eq!(step(&mut rig, 0.5), 0);
        assert_eq!(step(&mut rig, 0.5), 1);
        assert_eq!(fired(&rig)[1], (VoiceKind::Piano, 62, 2.0));
    }

    #[test]
    fn end_marker_returns_to_idle() {
        let mut rig = ready_rig();
        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&states);
        rig.engine
            .on_state_change(move |state| sink.borrow_mut().push(state));

        rig.engine.play(&score(vec![track(0, 0, &[(60, 0.0)])])).unwrap();
        // last note ends at 0.5, the margin keeps playback alive until 1.0
        step(&mut rig, 0.9);
        assert_eq!(rig.engine.state(), PlaybackState::Playing);
        assert!(rig.engine.current_time() > 0.8);

        step(&mut rig, 0.1);
        assert_eq!(rig.engine.state(), PlaybackState::Idle);
        assert_eq!(rig.engine.current_time(), 0.0);
        assert!(rig.engine.session().is_none());
        assert_eq!(*states.borrow(), vec![PlaybackState::Playing, PlaybackState::Idle]);
    }

    #[test]
    fn stop_cancels_everything() {
        let mut rig = ready_rig();
        rig.engine
            .play(&score(vec![track(0, 0, &[(60, 0.5), (62, 1.0)])]))
            .unwrap();
        rig.engine.stop();

        assert_eq!(rig.engine.state(), PlaybackState::Idle);
        assert_eq!(rig.engine.pending_triggers(), 0);
        assert_eq!(rig.engine.current_time(), 0.0);
        assert!(*rig.releases.lock().unwrap() >= VoiceKind::ALL.len());

        step(&mut rig, 5.0);
        assert!(fired(&rig).is_empty());

        // stopping twice is harmless
        rig.engine.stop();
        rig.engine.pause();
        assert_eq!(rig.engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn unready_voice_drops_its_notes() {
        let (mut rig, gate) = gated_rig(vec![VoiceKind::Koto]);
        assert!(!rig.engine.voice_ready(VoiceKind::Koto));

        let report = rig
            .engine
            .play(&score(vec![
                track(107, 0, &[(62, 0.0), (64, 0.5)]),
                track(0, 0, &[(60, 0.5)]),
            ]))
            .unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.dropped, 2);

        // the late voice does not pick up notes that were already dropped
        let _ = gate.send(());
        assert!(rig.engine.wait_for_voices(Duration::from_secs(10)));
        step(&mut rig, 1.0);

        assert_eq!(fired(&rig), vec![(VoiceKind::Piano, 60, 0.5)]);
    }

    #[test]
    fn failed_voice_is_skipped() {
        let mut rig = rig_with(RecordingLoader {
            broken: vec![VoiceKind::Drums],
            ..Default::default()
        });
        rig.engine.init();
        assert!(rig.engine.wait_for_voices(Duration::from_secs(10)));
        assert!(!rig.engine.voice_ready(VoiceKind::Drums));

        let report = rig
            .engine
            .play(&score(vec![track(0, 9, &[(36, 0.0)]), track(33, 0, &[(40, 0.0)])]))
            .unwrap();
        assert_eq!(report.dropped, 1);

        rig.engine.pump();
        assert_eq!(fired(&rig), vec![(VoiceKind::Bass, 40, 0.0)]);
    }

    #[test]
    fn gains_persist_and_apply_on_load() {
        let (mut rig, gate) = gated_rig(vec![VoiceKind::Violin]);

        rig.engine.set_gain(VoiceKind::Violin, -6.0);
        rig.engine.set_gain(VoiceKind::Piano, -3.0);
        assert_eq!(rig.engine.gain(VoiceKind::Violin), -6.0);
        assert_eq!(rig.engine.gain(VoiceKind::Koto), 0.0);

        let _ = gate.send(());
        assert!(rig.engine.wait_for_voices(Duration::from_secs(10)));

        let gains = rig.gains.lock().unwrap().clone();
        assert!(gains.contains(&(VoiceKind::Piano, VoiceKind::Piano.default_gain_db())));
        assert!(gains.contains(&(VoiceKind::Violin, -6.0)));
        assert!(!gains.contains(&(VoiceKind::Violin, 0.0)));
        assert!(gains.contains(&(VoiceKind::Piano, -3.0)));

        rig.engine.play(&score(vec![track(40, 0, &[(76, 0.0)])])).unwrap();
        rig.engine.stop();
        rig.engine.play(&score(vec![track(40, 0, &[(76, 0.0)])])).unwrap();
        assert_eq!(rig.engine.gain(VoiceKind::Violin), -6.0);
        assert_eq!(rig.engine.gain(VoiceKind::Piano), -3.0);
    }

    #[test]
    fn plays_encoded_text() {
        let mut rig = ready_rig();
        let text = "MIDI File: t\nTempo: 90 BPM\n\nInstrument: Piano (Consolidated)\n  Note: C4, Time: 0.00s, Duration: 1.00s, Velocity: 0.80";
        let report = rig.engine.play(&encode_text(text).unwrap()).unwrap();

        assert_eq!(report.scheduled, 1);
        assert_eq!(rig.engine.tempo(), 90.0);
        rig.engine.pump();
        assert_eq!(fired(&rig), vec![(VoiceKind::Piano, 60, 0.0)]);
    }

    #[test]
    fn run_until_idle_honours_stop_flag() {
        let mut rig = ready_rig();
        rig.engine.play(&score(vec![track(0, 0, &[(60, 30.0)])])).unwrap();

        let stop = AtomicBool::new(true);
        rig.engine.run_until_idle(&stop);
        assert_eq!(rig.engine.state(), PlaybackState::Idle);
        assert!(fired(&rig).is_empty());
    }
}
