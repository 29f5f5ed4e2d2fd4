//! The conversation pump: one cooperative loop that drains capability
//! events, drives every component's timers, and owns the policy decisions
//! none of the components can make alone (when to reopen the microphone,
//! when a watchdog fires, who gets the audio pipeline).
//!
//! Everything runs on the caller's thread. `tick` takes the current instant
//! explicitly so tests can step simulated time without sleeping.

use std::time::Instant;

use crate::capability::{AssistantDispatch, SpeechToText, TextToSpeech};
use crate::capture::{CaptureOutcome, CaptureSession, CaptureStartError};
use crate::config::VoiceTuning;
use crate::speech::SpeechOutputQueue;
use crate::state::{AssistantState, StateStore, StateSubscription};
use crate::transcript::{Role, TranscriptLog};
use crate::wake::WakeWordDetector;
use crate::{log_debug, log_debug_content};

/// A microphone open scheduled for a short moment in the future. Follow-up
/// captures carry a no-speech timeout so an unanswered reopen ends the
/// conversation instead of listening forever.
#[derive(Debug, Clone, Copy)]
struct PendingCapture {
    at: Instant,
    follow_up: bool,
}

pub struct Orchestrator {
    capture_stt: Box<dyn SpeechToText>,
    wake_stt: Box<dyn SpeechToText>,
    tts: Box<dyn TextToSpeech>,
    dispatch: Box<dyn AssistantDispatch>,
    state: StateStore,
    states: StateSubscription,
    tuning: VoiceTuning,
    capture: Option<CaptureSession>,
    output: SpeechOutputQueue,
    wake: WakeWordDetector,
    transcript: TranscriptLog,
    /// While set, the microphone reopens after each spoken reply.
    conversation_mode: bool,
    pending_capture: Option<PendingCapture>,
    listening_deadline: Option<Instant>,
    processing_deadline: Option<Instant>,
    dispatch_sent_at: Option<Instant>,
}

impl Orchestrator {
    pub fn new(
        capture_stt: Box<dyn SpeechToText>,
        wake_stt: Box<dyn SpeechToText>,
        tts: Box<dyn TextToSpeech>,
        dispatch: Box<dyn AssistantDispatch>,
        output: SpeechOutputQueue,
        wake_phrases: Vec<String>,
        tuning: VoiceTuning,
    ) -> Self {
        let mut state = StateStore::new();
        let states = state.subscribe();
        let wake_states = state.subscribe();
        let wake = WakeWordDetector::new(wake_phrases, tuning.clone(), wake_states);
        Self {
            capture_stt,
            wake_stt,
            tts,
            dispatch,
            state,
            states,
            tuning,
            capture: None,
            output,
            wake,
            transcript: TranscriptLog::new(),
            conversation_mode: false,
            pending_capture: None,
            listening_deadline: None,
            processing_deadline: None,
            dispatch_sent_at: None,
        }
    }

    pub fn current_state(&self) -> AssistantState {
        self.state.get()
    }

    pub fn conversation_mode(&self) -> bool {
        self.conversation_mode
    }

    /// Live capture text for the HUD, empty when nothing is being captured.
    pub fn interim_text(&self) -> String {
        self.capture
            .as_ref()
            .map(CaptureSession::interim_text)
            .unwrap_or_default()
    }

    pub fn subscribe_states(&mut self) -> StateSubscription {
        self.state.subscribe()
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn wake_enabled(&self) -> bool {
        self.wake.is_enabled()
    }

    pub fn enable_wake(&mut self, now: Instant) {
        self.wake.enable(self.wake_stt.as_mut(), &self.state, now);
    }

    pub fn disable_wake(&mut self) {
        self.wake.disable(self.wake_stt.as_mut());
    }

    /// Count of armed timers across every component; zero after a full
    /// cancel, which is the guarantee the HUD relies on when closing.
    pub fn pending_timers(&self) -> usize {
        self.capture.as_ref().map_or(0, CaptureSession::pending_timers)
            + self.output.pending_timers()
            + self.wake.pending_timers()
            + usize::from(self.pending_capture.is_some())
            + usize::from(self.listening_deadline.is_some())
            + usize::from(self.processing_deadline.is_some())
    }

    /// One pump iteration. Ordering matters: capability events are drained
    /// before timers so an event that arrived this iteration can cancel a
    /// timer that would otherwise fire at the same instant.
    pub fn tick(&mut self, now: Instant) {
        self.pump_wake(now);
        self.pump_capture(now);
        self.pump_output(now);
        self.pump_dispatch(now);
        self.pump_state_changes(now);
        self.run_watchdogs(now);
        self.open_pending_capture(now);
        self.wake.tick(self.wake_stt.as_mut(), &self.state, now);
    }

    fn pump_wake(&mut self, now: Instant) {
        while let Some(event) = self.wake_stt.poll_event() {
            if let Some(_phrase) = self.wake.handle_event(event, self.wake_stt.as_mut(), now) {
                self.begin_conversation(now);
                break;
            }
        }
    }

    /// A wake phrase was heard: open the microphone after a short settle
    /// delay. No speech needs cancelling here; the detector only runs while
    /// the assistant is idle.
    fn begin_conversation(&mut self, now: Instant) {
        self.conversation_mode = true;
        self.schedule_capture(now + self.tuning.pre_capture_delay, false);
    }

    fn pump_capture(&mut self, now: Instant) {
        let Some(session) = self.capture.as_mut() else {
            return;
        };
        let mut outcome = None;
        while let Some(event) = self.capture_stt.poll_event() {
            if let Some(result) = session.handle_event(event, &mut self.state, now) {
                outcome = Some(result);
                break;
            }
        }
        if outcome.is_none() {
            outcome = session.tick(self.capture_stt.as_mut(), &mut self.state, now);
        }
        if session.is_closed() {
            self.capture = None;
            self.listening_deadline = None;
        }
        if let Some(outcome) = outcome {
            self.on_capture_outcome(outcome, now);
        }
    }

    fn on_capture_outcome(&mut self, outcome: CaptureOutcome, now: Instant) {
        match outcome {
            CaptureOutcome::Transcript(text) => {
                self.transcript.push(Role::User, text.clone());
                self.state.set(AssistantState::Processing);
                self.processing_deadline = Some(now + self.tuning.processing_watchdog);
                self.dispatch_sent_at = Some(now);
                if let Err(err) = self.dispatch.send(&text) {
                    log_debug(&format!("assistant dispatch failed: {err:#}"));
                    self.processing_deadline = None;
                    self.dispatch_sent_at = None;
                    self.conversation_mode = false;
                    self.state.set(AssistantState::Idle);
                }
            }
            CaptureOutcome::NoSpeech => {
                // An unanswered microphone ends the conversation.
                self.conversation_mode = false;
            }
        }
    }

    fn pump_output(&mut self, now: Instant) {
        while let Some(event) = self.tts.poll_event() {
            self.output
                .handle_event(event, self.tts.as_mut(), &mut self.state, now);
        }
        self.output.tick(self.tts.as_mut(), &mut self.state, now);
    }

    fn pump_dispatch(&mut self, now: Instant) {
        while let Some(reply) = self.dispatch.poll_reply() {
            if self.state.get() == AssistantState::Processing {
                self.processing_deadline = None;
                if let Some(sent_at) = self.dispatch_sent_at.take() {
                    log_debug(&format!(
                        "timing|phase=dispatch|ms={}",
                        now.duration_since(sent_at).as_millis()
                    ));
                }
                log_debug_content(&format!("assistant reply: {}", reply.content));
                self.transcript.push_reply(&reply);
                self.output.enqueue(&reply.content, self.tts.as_mut(), now);
            } else {
                // Reply landed after a cancel or watchdog. Record it but
                // do not speak; the user already moved on.
                log_debug("dropping late assistant reply");
                self.transcript.push_reply(&reply);
            }
        }
    }

    fn pump_state_changes(&mut self, now: Instant) {
        while let Some(change) = self.states.try_next() {
            let finished_speaking = change.previous == AssistantState::Speaking
                && change.current == AssistantState::Idle;
            if finished_speaking && self.conversation_mode {
                self.schedule_capture(now + self.tuning.reopen_delay, true);
            }
        }
    }

    fn run_watchdogs(&mut self, now: Instant) {
        if let Some(deadline) = self.listening_deadline {
            if now >= deadline && self.state.get() == AssistantState::Listening {
                log_debug("listening watchdog fired; closing capture");
                if let Some(mut session) = self.capture.take() {
                    session.stop(self.capture_stt.as_mut());
                }
                self.listening_deadline = None;
                self.conversation_mode = false;
                self.state.set(AssistantState::Idle);
            }
        }
        if let Some(deadline) = self.processing_deadline {
            if now >= deadline {
                self.processing_deadline = None;
                self.dispatch_sent_at = None;
                if self.state.get() == AssistantState::Processing {
                    // Conversation mode survives: the user may still follow up
                    // once the assistant recovers.
                    log_debug("processing watchdog fired; assistant never replied");
                    self.state.set(AssistantState::Idle);
                }
            }
        }
    }

    fn schedule_capture(&mut self, at: Instant, follow_up: bool) {
        self.pending_capture = Some(PendingCapture { at, follow_up });
    }

    fn open_pending_capture(&mut self, now: Instant) {
        let Some(pending) = self.pending_capture else {
            return;
        };
        if now < pending.at {
            return;
        }
        self.pending_capture = None;
        // The world may have changed while the open was pending.
        if self.state.get() != AssistantState::Idle || self.capture.is_some() {
            log_debug("scheduled capture dropped; pipeline is no longer free");
            return;
        }
        let timeout = pending.follow_up.then_some(self.tuning.follow_up_timeout);
        match CaptureSession::start(
            self.capture_stt.as_mut(),
            &mut self.state,
            &self.tuning,
            timeout,
            now,
        ) {
            Ok(session) => {
                self.capture = Some(session);
                self.listening_deadline = Some(now + self.tuning.listening_watchdog);
            }
            Err(CaptureStartError::Busy(state)) => {
                log_debug(&format!("capture open lost the race to {}", state.label()));
            }
            Err(CaptureStartError::Capability(err)) => {
                log_debug(&format!("capture unavailable: {err}"));
                self.conversation_mode = false;
            }
        }
    }

    /// Manual microphone press: a one-shot turn that never reopens.
    pub fn start_single_turn(&mut self, now: Instant) {
        self.conversation_mode = false;
        self.output.cancel(self.tts.as_mut(), &mut self.state);
        self.schedule_capture(now, false);
        self.open_pending_capture(now);
    }

    /// Toggle for a push-to-talk style control: opens the microphone when
    /// free, closes it with no outcome when already capturing.
    pub fn toggle_capture(&mut self, now: Instant) {
        if let Some(mut session) = self.capture.take() {
            session.stop(self.capture_stt.as_mut());
            self.listening_deadline = None;
            self.conversation_mode = false;
            self.state.set(AssistantState::Idle);
        } else {
            self.start_single_turn(now);
        }
    }

    /// Bypass the microphone with typed input.
    pub fn submit_text(&mut self, text: &str, now: Instant) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.state.get() == AssistantState::Processing {
            log_debug("typed input ignored while a turn is in flight");
            return;
        }
        if let Some(mut session) = self.capture.take() {
            session.stop(self.capture_stt.as_mut());
            self.listening_deadline = None;
        }
        self.on_capture_outcome(CaptureOutcome::Transcript(text.to_string()), now);
    }

    /// Tear down every in-flight activity and return to idle. Conversation
    /// mode is cleared and no timer survives.
    pub fn cancel_all(&mut self) {
        if let Some(mut session) = self.capture.take() {
            session.stop(self.capture_stt.as_mut());
        }
        self.output.cancel(self.tts.as_mut(), &mut self.state);
        self.pending_capture = None;
        self.listening_deadline = None;
        self.processing_deadline = None;
        self.dispatch_sent_at = None;
        self.conversation_mode = false;
        if self.state.get() != AssistantState::Alert {
            self.state.set(AssistantState::Idle);
        }
    }

    /// Surface an alert on the HUD. Only an idle assistant shows alerts;
    /// an active conversation is never interrupted by one.
    pub fn raise_alert(&mut self) -> bool {
        let current = self.state.get();
        if current != AssistantState::Idle {
            log_debug(&format!("alert suppressed while {}", current.label()));
            return false;
        }
        self.state.set(AssistantState::Alert);
        true
    }

    pub fn acknowledge_alert(&mut self) {
        if self.state.get() == AssistantState::Alert {
            self.state.set(AssistantState::Idle);
        }
    }

    /// Speak a line directly, outside any conversation turn.
    pub fn announce(&mut self, text: &str, now: Instant) {
        self.transcript.push(Role::Assistant, text);
        self.output.enqueue(text, self.tts.as_mut(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        AssistantReply, CapabilityError, CaptureEvent, CaptureOptions, SynthEvent, VoiceOptions,
    };
    use anyhow::bail;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct SttInner {
        events: VecDeque<CaptureEvent>,
        started: bool,
    }

    #[derive(Clone, Default)]
    struct NullStt(Arc<Mutex<SttInner>>);

    impl SpeechToText for NullStt {
        fn start(&mut self, _opts: &CaptureOptions) -> Result<(), CapabilityError> {
            self.0.lock().unwrap().started = true;
            Ok(())
        }
        fn stop(&mut self) {
            self.0.lock().unwrap().started = false;
        }
        fn abort(&mut self) {
            self.0.lock().unwrap().started = false;
        }
        fn poll_event(&mut self) -> Option<CaptureEvent> {
            let mut inner = self.0.lock().unwrap();
            if inner.started {
                inner.events.pop_front()
            } else {
                None
            }
        }
    }

    #[derive(Default)]
    struct TtsInner {
        spoken: Vec<String>,
        events: VecDeque<SynthEvent>,
    }

    #[derive(Clone, Default)]
    struct NullTts(Arc<Mutex<TtsInner>>);

    impl TextToSpeech for NullTts {
        fn speak(&mut self, text: &str, _opts: &VoiceOptions) -> Result<(), CapabilityError> {
            self.0.lock().unwrap().spoken.push(text.to_string());
            Ok(())
        }
        fn resume(&mut self) {}
        fn cancel(&mut self) {}
        fn poll_event(&mut self) -> Option<SynthEvent> {
            self.0.lock().unwrap().events.pop_front()
        }
    }

    #[derive(Default)]
    struct DispatchInner {
        sent: Vec<String>,
        replies: VecDeque<AssistantReply>,
        fail: bool,
    }

    #[derive(Clone, Default)]
    struct NullDispatch(Arc<Mutex<DispatchInner>>);

    impl AssistantDispatch for NullDispatch {
        fn send(&mut self, text: &str) -> anyhow::Result<()> {
            let mut inner = self.0.lock().unwrap();
            if inner.fail {
                bail!("backend unavailable");
            }
            inner.sent.push(text.to_string());
            Ok(())
        }
        fn poll_reply(&mut self) -> Option<AssistantReply> {
            self.0.lock().unwrap().replies.pop_front()
        }
    }

    struct Rig {
        orch: Orchestrator,
        dispatch: NullDispatch,
    }

    fn rig() -> Rig {
        let tuning = VoiceTuning::default();
        let dispatch = NullDispatch::default();
        let output = SpeechOutputQueue::new(VoiceOptions::default(), tuning.clone());
        let orch = Orchestrator::new(
            Box::new(NullStt::default()),
            Box::new(NullStt::default()),
            Box::new(NullTts::default()),
            Box::new(dispatch.clone()),
            output,
            vec!["jarvis".to_string()],
            tuning,
        );
        Rig { orch, dispatch }
    }

    #[test]
    fn alert_only_surfaces_when_idle() {
        let mut r = rig();
        assert!(r.orch.raise_alert());
        assert_eq!(r.orch.current_state(), AssistantState::Alert);
        // A second alert while one is showing is refused.
        assert!(!r.orch.raise_alert());
        r.orch.acknowledge_alert();
        assert_eq!(r.orch.current_state(), AssistantState::Idle);
    }

    #[test]
    fn typed_input_reaches_the_assistant() {
        let mut r = rig();
        let now = Instant::now();
        r.orch.submit_text("  status report  ", now);
        assert_eq!(r.orch.current_state(), AssistantState::Processing);
        assert_eq!(r.dispatch.0.lock().unwrap().sent, vec!["status report"]);
        assert_eq!(r.orch.transcript().latest().unwrap().content, "status report");

        // A second submission while the first is in flight is dropped.
        r.orch.submit_text("another", now);
        assert_eq!(r.dispatch.0.lock().unwrap().sent.len(), 1);
    }

    #[test]
    fn dispatch_failure_returns_to_idle() {
        let mut r = rig();
        r.dispatch.0.lock().unwrap().fail = true;
        r.orch.submit_text("hello", Instant::now());
        assert_eq!(r.orch.current_state(), AssistantState::Idle);
        assert!(!r.orch.conversation_mode());
        assert_eq!(r.orch.pending_timers(), 0);
    }

    #[test]
    fn empty_typed_input_is_ignored() {
        let mut r = rig();
        r.orch.submit_text("   ", Instant::now());
        assert_eq!(r.orch.current_state(), AssistantState::Idle);
        assert!(r.dispatch.0.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn processing_watchdog_recovers_without_a_reply() {
        let mut r = rig();
        let t0 = Instant::now();
        r.orch.submit_text("anyone there", t0);
        assert_eq!(r.orch.current_state(), AssistantState::Processing);
        r.orch.tick(t0 + Duration::from_secs(29));
        assert_eq!(r.orch.current_state(), AssistantState::Processing);
        r.orch.tick(t0 + Duration::from_secs(31));
        assert_eq!(r.orch.current_state(), AssistantState::Idle);
    }
}
