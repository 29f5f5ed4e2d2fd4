//! Passive wake-phrase listening on a dedicated recognizer instance.
//!
//! The wake listener runs continuously whenever the assistant is idle and
//! pauses itself while capture, processing, or playback hold the pipeline.
//! Recognizer runs are short-lived on most platforms, so the listener
//! restarts itself on every end or transient error with a small backoff.

use std::time::Instant;

use crate::capability::{CaptureEvent, CaptureOptions, SpeechToText};
use crate::config::VoiceTuning;
use crate::state::{AssistantState, StateStore, StateSubscription};
use crate::{log_debug, log_debug_content};

/// Built-in wake vocabulary. Loose variants are deliberate: recognizers
/// mangle short phrases often enough that near-misses should still wake.
pub const WAKE_PHRASES: &[&str] = &[
    "hey jarvis",
    "hi jarvis",
    "hello jarvis",
    "ok jarvis",
    "okay jarvis",
    "yo jarvis",
    "jarvis",
    "hi buddy",
    "hey buddy",
    "wake up",
    "wake up jarvis",
];

/// Substring match against every configured phrase. Substring rather than
/// word-boundary matching is intentional so "jarvis," and run-together
/// recognitions like "heyjarvis" still trigger.
pub fn match_wake_phrase<'a>(phrases: &'a [String], transcript: &str) -> Option<&'a str> {
    let lowered = transcript.to_lowercase();
    phrases
        .iter()
        .find(|phrase| lowered.contains(phrase.as_str()))
        .map(String::as_str)
}

pub struct WakeWordDetector {
    phrases: Vec<String>,
    tuning: VoiceTuning,
    enabled: bool,
    /// A recognizer run is currently live.
    active: bool,
    /// Cleared for the rest of the process on a permanent capability error.
    supported: bool,
    restart_at: Option<Instant>,
    states: StateSubscription,
}

impl WakeWordDetector {
    pub fn new(phrases: Vec<String>, tuning: VoiceTuning, states: StateSubscription) -> Self {
        Self {
            phrases,
            tuning,
            enabled: false,
            active: false,
            supported: true,
            restart_at: None,
            states,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pending_timers(&self) -> usize {
        usize::from(self.restart_at.is_some())
    }

    pub fn enable(&mut self, stt: &mut dyn SpeechToText, state: &StateStore, now: Instant) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        log_debug("wake listening enabled");
        self.try_start(stt, state, now);
    }

    pub fn disable(&mut self, stt: &mut dyn SpeechToText) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        log_debug("wake listening disabled");
        self.stop(stt);
    }

    /// Halt the current run without touching the enabled flag.
    pub fn stop(&mut self, stt: &mut dyn SpeechToText) {
        if self.active {
            stt.abort();
            self.active = false;
        }
        self.restart_at = None;
    }

    fn try_start(&mut self, stt: &mut dyn SpeechToText, state: &StateStore, now: Instant) {
        if !self.enabled || !self.supported || self.active {
            return;
        }
        // The active pipeline always wins over passive listening.
        if state.get() != AssistantState::Idle {
            return;
        }
        let opts = CaptureOptions {
            language: self.tuning.language.clone(),
            continuous: true,
            interim_results: true,
            max_alternatives: 3,
        };
        match stt.start(&opts) {
            Ok(()) => {
                self.active = true;
                self.restart_at = None;
            }
            Err(err) if err.is_permanent() => {
                log_debug(&format!("wake listening unavailable: {err}"));
                self.supported = false;
                self.restart_at = None;
            }
            Err(err) => {
                log_debug(&format!("wake listener start failed: {err}"));
                self.restart_at = Some(now + self.tuning.wake_error_restart_delay);
            }
        }
    }

    /// Feed one recognizer event in. Returns the matched phrase when a wake
    /// was detected; the caller opens the capture session.
    pub fn handle_event(
        &mut self,
        event: CaptureEvent,
        stt: &mut dyn SpeechToText,
        now: Instant,
    ) -> Option<String> {
        match event {
            CaptureEvent::Fragment { alternatives, .. } => {
                for candidate in &alternatives {
                    if let Some(phrase) = match_wake_phrase(&self.phrases, candidate) {
                        let phrase = phrase.to_string();
                        log_debug_content(&format!("wake phrase heard: {candidate}"));
                        log_debug(&format!("wake triggered by \"{phrase}\""));
                        // Free the recognizer before the capture session claims it.
                        self.active = false;
                        self.restart_at = None;
                        stt.abort();
                        return Some(phrase);
                    }
                }
                None
            }
            CaptureEvent::Ended => {
                self.active = false;
                if self.enabled && self.supported {
                    self.restart_at = Some(now + self.tuning.wake_restart_delay);
                }
                None
            }
            CaptureEvent::Error(kind) => {
                if !kind.is_benign() {
                    log_debug(&format!("wake listener error: {}", kind.label()));
                }
                self.active = false;
                if self.enabled && self.supported {
                    self.restart_at = Some(now + self.tuning.wake_error_restart_delay);
                }
                None
            }
        }
    }

    /// Drive pause/resume off state changes and fire any pending restart.
    pub fn tick(&mut self, stt: &mut dyn SpeechToText, state: &StateStore, now: Instant) {
        while let Some(change) = self.states.try_next() {
            if change.current.is_busy() {
                // Yield the microphone while the assistant works.
                if self.active {
                    stt.abort();
                    self.active = false;
                }
                self.restart_at = None;
            } else if change.current == AssistantState::Idle && self.enabled && self.supported {
                self.restart_at = Some(now + self.tuning.wake_resume_delay);
            }
        }
        if let Some(at) = self.restart_at {
            if now >= at {
                self.restart_at = None;
                self.try_start(stt, state, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityError, CaptureErrorKind};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeStt {
        started: bool,
        starts: usize,
        aborts: usize,
        fail_start: Option<CapabilityError>,
        last_opts: Option<CaptureOptions>,
    }

    impl SpeechToText for FakeStt {
        fn start(&mut self, opts: &CaptureOptions) -> Result<(), CapabilityError> {
            if let Some(err) = self.fail_start.clone() {
                return Err(err);
            }
            self.started = true;
            self.starts += 1;
            self.last_opts = Some(opts.clone());
            Ok(())
        }

        fn stop(&mut self) {
            self.started = false;
        }

        fn abort(&mut self) {
            self.aborts += 1;
            self.started = false;
        }

        fn poll_event(&mut self) -> Option<CaptureEvent> {
            None
        }
    }

    fn phrases() -> Vec<String> {
        WAKE_PHRASES.iter().map(|p| p.to_string()).collect()
    }

    fn detector(state: &mut StateStore) -> WakeWordDetector {
        WakeWordDetector::new(phrases(), VoiceTuning::default(), state.subscribe())
    }

    fn fragment(texts: &[&str]) -> CaptureEvent {
        CaptureEvent::Fragment {
            alternatives: texts.iter().map(|t| t.to_string()).collect(),
            is_final: false,
        }
    }

    #[test]
    fn enable_starts_a_continuous_multi_alternative_run() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        det.enable(&mut stt, &state, Instant::now());
        assert!(det.is_active());
        let opts = stt.last_opts.expect("start options");
        assert!(opts.continuous);
        assert_eq!(opts.max_alternatives, 3);
    }

    #[test]
    fn substring_matching_catches_mangled_recognitions() {
        let phrases = phrases();
        assert_eq!(match_wake_phrase(&phrases, "Hey Jarvis!"), Some("hey jarvis"));
        assert_eq!(match_wake_phrase(&phrases, "the jarvisaurus"), Some("jarvis"));
        assert_eq!(match_wake_phrase(&phrases, "time to WAKE UP now"), Some("wake up"));
        assert_eq!(match_wake_phrase(&phrases, "hello there"), None);
    }

    #[test]
    fn wake_fires_once_and_releases_the_recognizer() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);

        let hit = det.handle_event(fragment(&["harvest", "hey jarvis open up"]), &mut stt, t0);
        assert_eq!(hit.as_deref(), Some("hey jarvis"));
        assert!(!det.is_active());
        assert_eq!(stt.aborts, 1);
        assert_eq!(det.pending_timers(), 0);
    }

    #[test]
    fn non_matching_speech_is_ignored() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);
        assert!(det
            .handle_event(fragment(&["what a lovely morning"]), &mut stt, t0)
            .is_none());
        assert!(det.is_active());
    }

    #[test]
    fn run_end_schedules_a_restart() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);

        det.handle_event(CaptureEvent::Ended, &mut stt, t0);
        assert!(!det.is_active());
        det.tick(&mut stt, &state, t0 + Duration::from_millis(499));
        assert!(!det.is_active());
        det.tick(&mut stt, &state, t0 + Duration::from_millis(501));
        assert!(det.is_active());
        assert_eq!(stt.starts, 2);
    }

    #[test]
    fn errors_restart_with_a_longer_backoff() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);

        det.handle_event(
            CaptureEvent::Error(CaptureErrorKind::Other("network".into())),
            &mut stt,
            t0,
        );
        det.tick(&mut stt, &state, t0 + Duration::from_millis(600));
        assert!(!det.is_active());
        det.tick(&mut stt, &state, t0 + Duration::from_millis(1001));
        assert!(det.is_active());
    }

    #[test]
    fn pauses_while_busy_and_resumes_on_idle() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);
        assert!(det.is_active());

        state.set(AssistantState::Listening);
        det.tick(&mut stt, &state, t0);
        assert!(!det.is_active());
        assert_eq!(stt.aborts, 1);

        state.set(AssistantState::Idle);
        det.tick(&mut stt, &state, t0);
        assert!(!det.is_active());
        // Resume fires after the settle delay.
        det.tick(&mut stt, &state, t0 + Duration::from_millis(1501));
        assert!(det.is_active());
    }

    #[test]
    fn restart_is_dropped_when_state_is_no_longer_idle() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);
        det.handle_event(CaptureEvent::Ended, &mut stt, t0);

        state.set(AssistantState::Speaking);
        det.tick(&mut stt, &state, t0 + Duration::from_secs(2));
        assert!(!det.is_active());
        assert_eq!(det.pending_timers(), 0);
    }

    #[test]
    fn permanent_capability_errors_disable_for_good() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt {
            fail_start: Some(CapabilityError::Unsupported),
            ..FakeStt::default()
        };
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);
        assert!(!det.is_active());
        assert_eq!(det.pending_timers(), 0);

        // Later idle transitions schedule nothing that would start it.
        state.set(AssistantState::Listening);
        state.set(AssistantState::Idle);
        det.tick(&mut stt, &state, t0);
        det.tick(&mut stt, &state, t0 + Duration::from_secs(5));
        assert!(!det.is_active());
    }

    #[test]
    fn disable_aborts_the_live_run() {
        let mut state = StateStore::new();
        let mut det = detector(&mut state);
        let mut stt = FakeStt::default();
        let t0 = Instant::now();
        det.enable(&mut stt, &state, t0);
        det.disable(&mut stt);
        assert!(!det.is_enabled());
        assert!(!det.is_active());
        assert_eq!(stt.aborts, 1);
    }
}
