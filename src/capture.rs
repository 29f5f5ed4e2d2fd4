//! One microphone-capture attempt, from start to a single terminal outcome.
//!
//! A session accumulates transcript fragments, commits after a silence
//! window, or times out when nothing was heard. Several asynchronous paths
//! can end a session (silence commit, no-speech timeout, platform end,
//! platform error); a small phase machine guarantees exactly one outcome no
//! matter which of them fires first.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::capability::{
    CapabilityError, CaptureErrorKind, CaptureEvent, CaptureOptions, SpeechToText,
};
use crate::config::VoiceTuning;
use crate::state::{AssistantState, StateStore};
use crate::{log_debug, log_debug_content};

/// Terminal result of a capture attempt; exactly one per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Transcript(String),
    NoSpeech,
}

/// Why a capture session refused to start.
#[derive(Debug)]
pub enum CaptureStartError {
    /// Playback or processing holds the audio pipeline.
    Busy(AssistantState),
    Capability(CapabilityError),
}

/// Waiting: no speech observed yet, the no-speech timer may still fire.
/// Hearing: at least one fragment arrived, only the silence commit applies.
/// Closed: a terminal path ran; everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CapturePhase {
    Waiting,
    Hearing,
    Closed,
}

pub struct CaptureSession {
    interim: String,
    final_buf: String,
    phase: CapturePhase,
    silence_window: Duration,
    silence_deadline: Option<Instant>,
    no_speech_deadline: Option<Instant>,
}

impl CaptureSession {
    /// Start a capture attempt. Refused while the assistant is speaking or
    /// processing so capture and playback never overlap; the state is read
    /// here, immediately before acquiring the device, not earlier.
    pub fn start(
        stt: &mut dyn SpeechToText,
        state: &mut StateStore,
        tuning: &VoiceTuning,
        no_speech_timeout: Option<Duration>,
        now: Instant,
    ) -> Result<Self, CaptureStartError> {
        let current = state.get();
        if matches!(
            current,
            AssistantState::Speaking | AssistantState::Processing
        ) {
            log_debug(&format!("capture blocked: assistant is {}", current.label()));
            return Err(CaptureStartError::Busy(current));
        }

        let opts = CaptureOptions {
            language: tuning.language.clone(),
            continuous: false,
            interim_results: true,
            max_alternatives: 1,
        };
        stt.start(&opts).map_err(CaptureStartError::Capability)?;
        state.set(AssistantState::Listening);
        log_debug("capture started");

        Ok(Self {
            interim: String::new(),
            final_buf: String::new(),
            phase: CapturePhase::Waiting,
            silence_window: tuning.silence_commit,
            silence_deadline: None,
            no_speech_deadline: no_speech_timeout
                .filter(|t| !t.is_zero())
                .map(|t| now + t),
        })
    }

    /// Live view for the HUD: committed finals plus the current fragment.
    pub fn interim_text(&self) -> String {
        format!("{}{}", self.final_buf, self.interim)
    }

    pub fn is_closed(&self) -> bool {
        self.phase == CapturePhase::Closed
    }

    pub fn pending_timers(&self) -> usize {
        usize::from(self.silence_deadline.is_some()) + usize::from(self.no_speech_deadline.is_some())
    }

    /// Feed one platform event into the session.
    pub fn handle_event(
        &mut self,
        event: CaptureEvent,
        state: &mut StateStore,
        now: Instant,
    ) -> Option<CaptureOutcome> {
        if self.phase == CapturePhase::Closed {
            return None;
        }
        match event {
            CaptureEvent::Fragment {
                alternatives,
                is_final,
            } => {
                let text = alternatives.into_iter().next().unwrap_or_default();
                if self.phase == CapturePhase::Waiting && !text.is_empty() {
                    self.phase = CapturePhase::Hearing;
                    // First speech of any kind cancels the no-speech timer for good.
                    self.no_speech_deadline = None;
                }
                if is_final {
                    self.final_buf.push_str(&text);
                    self.interim.clear();
                } else {
                    self.interim = text;
                }
                self.silence_deadline = Some(now + self.silence_window);
                None
            }
            CaptureEvent::Ended => self.converge(state),
            CaptureEvent::Error(kind) => match kind {
                // Explicit caller stop; the caller decides what happens next.
                CaptureErrorKind::Aborted => {
                    self.close();
                    None
                }
                CaptureErrorKind::NoSpeech => self.converge(state),
                CaptureErrorKind::Other(msg) => {
                    log_debug(&format!("capture error: {msg}"));
                    self.converge(state)
                }
            },
        }
    }

    /// Drive the session timers; call once per pump iteration.
    pub fn tick(
        &mut self,
        stt: &mut dyn SpeechToText,
        state: &mut StateStore,
        now: Instant,
    ) -> Option<CaptureOutcome> {
        if self.phase == CapturePhase::Closed {
            return None;
        }
        if let Some(deadline) = self.no_speech_deadline {
            if now >= deadline && self.phase == CapturePhase::Waiting {
                log_debug("no speech before timeout; stopping capture");
                stt.abort();
                return self.converge(state);
            }
        }
        if let Some(deadline) = self.silence_deadline {
            if now >= deadline {
                self.silence_deadline = None;
                if !self.final_buf.trim().is_empty() {
                    stt.stop();
                    return self.converge(state);
                }
                // Interim-only speech: keep the session open for more
                // fragments or the platform's own end event.
            }
        }
        None
    }

    /// Idempotent teardown. Stop is always explicit caller intent, so it
    /// never produces an outcome itself.
    pub fn stop(&mut self, stt: &mut dyn SpeechToText) {
        if self.phase != CapturePhase::Closed {
            stt.abort();
        }
        self.close();
    }

    /// Single exit point for every termination path: the transcript when
    /// anything was committed, the timeout path otherwise.
    fn converge(&mut self, state: &mut StateStore) -> Option<CaptureOutcome> {
        if self.phase == CapturePhase::Closed {
            return None;
        }
        self.close();
        let text = sanitize_transcript(&self.final_buf);
        if text.is_empty() {
            state.set(AssistantState::Idle);
            Some(CaptureOutcome::NoSpeech)
        } else {
            log_debug_content(&format!("transcript committed: {text}"));
            Some(CaptureOutcome::Transcript(text))
        }
    }

    fn close(&mut self) {
        self.phase = CapturePhase::Closed;
        self.silence_deadline = None;
        self.no_speech_deadline = None;
        self.interim.clear();
    }
}

/// Strip bracketed non-speech markers some recognizers emit and collapse
/// whitespace so downstream consumers get clean text.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeStt {
        started: bool,
        stops: usize,
        aborts: usize,
        fail_start: Option<CapabilityError>,
        events: VecDeque<CaptureEvent>,
    }

    impl SpeechToText for FakeStt {
        fn start(&mut self, _opts: &CaptureOptions) -> Result<(), CapabilityError> {
            if let Some(err) = self.fail_start.clone() {
                return Err(err);
            }
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
            self.started = false;
        }

        fn abort(&mut self) {
            self.aborts += 1;
            self.started = false;
        }

        fn poll_event(&mut self) -> Option<CaptureEvent> {
            if self.started {
                self.events.pop_front()
            } else {
                None
            }
        }
    }

    fn fragment(text: &str, is_final: bool) -> CaptureEvent {
        CaptureEvent::Fragment {
            alternatives: vec![text.to_string()],
            is_final,
        }
    }

    fn start_session(
        stt: &mut FakeStt,
        state: &mut StateStore,
        no_speech: Option<Duration>,
        now: Instant,
    ) -> CaptureSession {
        CaptureSession::start(stt, state, &VoiceTuning::default(), no_speech, now)
            .expect("session starts")
    }

    #[test]
    fn start_sets_listening_state() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let now = Instant::now();
        let session = start_session(&mut stt, &mut state, None, now);
        assert_eq!(state.get(), AssistantState::Listening);
        assert!(!session.is_closed());
    }

    #[test]
    fn start_refused_while_speaking() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        state.set(AssistantState::Speaking);
        let result = CaptureSession::start(
            &mut stt,
            &mut state,
            &VoiceTuning::default(),
            None,
            Instant::now(),
        );
        assert!(matches!(
            result,
            Err(CaptureStartError::Busy(AssistantState::Speaking))
        ));
        assert!(!stt.started);
    }

    #[test]
    fn silence_commit_delivers_trimmed_transcript_once() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        assert!(session
            .handle_event(fragment("  open the lab ", true), &mut state, t0)
            .is_none());
        // Before the silence window nothing commits.
        assert!(session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(1999))
            .is_none());
        let outcome = session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(2001))
            .expect("silence commit");
        assert_eq!(outcome, CaptureOutcome::Transcript("open the lab".into()));
        assert_eq!(stt.stops, 1);
        // A racing platform end must not produce a second outcome.
        assert!(session
            .handle_event(CaptureEvent::Ended, &mut state, t0 + Duration::from_millis(2002))
            .is_none());
        assert_eq!(session.pending_timers(), 0);
    }

    #[test]
    fn fragments_reset_the_silence_window() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        session.handle_event(fragment("run ", true), &mut state, t0);
        let t1 = t0 + Duration::from_millis(1500);
        session.handle_event(fragment("diagnostics", true), &mut state, t1);
        // 2s after the first fragment but only 0.5s after the second.
        assert!(session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(2100))
            .is_none());
        let outcome = session
            .tick(&mut stt, &mut state, t1 + Duration::from_millis(2001))
            .expect("commit after second window");
        assert_eq!(outcome, CaptureOutcome::Transcript("run diagnostics".into()));
    }

    #[test]
    fn no_speech_timeout_fires_when_nothing_heard() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session =
            start_session(&mut stt, &mut state, Some(Duration::from_millis(5000)), t0);

        assert!(session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(4999))
            .is_none());
        let outcome = session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(5000))
            .expect("timeout");
        assert_eq!(outcome, CaptureOutcome::NoSpeech);
        assert_eq!(state.get(), AssistantState::Idle);
        assert_eq!(stt.aborts, 1);
    }

    #[test]
    fn first_speech_cancels_no_speech_timer_for_good() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session =
            start_session(&mut stt, &mut state, Some(Duration::from_millis(1000)), t0);

        // Interim counts as speech.
        session.handle_event(fragment("hel", false), &mut state, t0 + Duration::from_millis(500));
        assert!(session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(1500))
            .is_none());
        assert_eq!(session.interim_text(), "hel");
        assert_eq!(state.get(), AssistantState::Listening);
    }

    #[test]
    fn platform_end_with_buffered_speech_commits() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        session.handle_event(fragment("status report", true), &mut state, t0);
        let outcome = session
            .handle_event(CaptureEvent::Ended, &mut state, t0 + Duration::from_millis(100))
            .expect("end commits");
        assert_eq!(outcome, CaptureOutcome::Transcript("status report".into()));
        // The committed transcript path leaves the state transition to the caller.
        assert_eq!(state.get(), AssistantState::Listening);
    }

    #[test]
    fn platform_end_without_speech_routes_to_timeout_path() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        let outcome = session
            .handle_event(CaptureEvent::Ended, &mut state, t0)
            .expect("timeout outcome");
        assert_eq!(outcome, CaptureOutcome::NoSpeech);
        assert_eq!(state.get(), AssistantState::Idle);
    }

    #[test]
    fn interim_only_speech_ends_as_no_speech() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        session.handle_event(fragment("mumble", false), &mut state, t0);
        // Silence window passes with nothing final: no commit.
        assert!(session
            .tick(&mut stt, &mut state, t0 + Duration::from_millis(2500))
            .is_none());
        let outcome = session
            .handle_event(CaptureEvent::Ended, &mut state, t0 + Duration::from_millis(3000))
            .expect("end without finals");
        assert_eq!(outcome, CaptureOutcome::NoSpeech);
    }

    #[test]
    fn platform_error_converges_once() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        session.handle_event(fragment("lights on", true), &mut state, t0);
        let outcome = session
            .handle_event(
                CaptureEvent::Error(CaptureErrorKind::Other("audio-capture".into())),
                &mut state,
                t0,
            )
            .expect("error with buffer commits");
        assert_eq!(outcome, CaptureOutcome::Transcript("lights on".into()));
        // Timers may not fire again after the session closed.
        assert!(session
            .tick(&mut stt, &mut state, t0 + Duration::from_secs(10))
            .is_none());
    }

    #[test]
    fn no_speech_error_forces_idle() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        let outcome = session
            .handle_event(
                CaptureEvent::Error(CaptureErrorKind::NoSpeech),
                &mut state,
                t0,
            )
            .expect("no-speech outcome");
        assert_eq!(outcome, CaptureOutcome::NoSpeech);
        assert_eq!(state.get(), AssistantState::Idle);
    }

    #[test]
    fn aborted_error_produces_no_outcome() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session = start_session(&mut stt, &mut state, None, t0);

        session.handle_event(fragment("half a tho", true), &mut state, t0);
        assert!(session
            .handle_event(
                CaptureEvent::Error(CaptureErrorKind::Aborted),
                &mut state,
                t0
            )
            .is_none());
        assert!(session.is_closed());
    }

    #[test]
    fn stop_is_idempotent_and_silent() {
        let mut stt = FakeStt::default();
        let mut state = StateStore::new();
        let t0 = Instant::now();
        let mut session =
            start_session(&mut stt, &mut state, Some(Duration::from_secs(5)), t0);

        session.handle_event(fragment("pending words", true), &mut state, t0);
        session.stop(&mut stt);
        session.stop(&mut stt);
        assert_eq!(stt.aborts, 1);
        assert_eq!(session.pending_timers(), 0);
        assert_eq!(session.interim_text(), "pending words");
        // A platform event after stop must not resurrect the session.
        assert!(session
            .handle_event(CaptureEvent::Ended, &mut state, t0)
            .is_none());
    }

    #[test]
    fn sanitize_strips_non_speech_markers() {
        assert_eq!(sanitize_transcript("  hello   world "), "hello world");
        assert_eq!(sanitize_transcript("[noise] open [silence] bay doors"), "open bay doors");
        assert_eq!(sanitize_transcript("(laughter)"), "");
        assert_eq!(sanitize_transcript(""), "");
    }
}
