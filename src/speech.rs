//! Ordered speech output with watchdogs around an unreliable synthesizer.
//!
//! Requests are spoken strictly first-in first-out. Platform synthesizers
//! drop utterances silently, stall in a paused state, or never deliver a
//! completion event; every one of those failure modes gets a timer here so
//! the queue always drains and the assistant never sticks in `Speaking`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::capability::{SynthErrorKind, SynthEvent, TextToSpeech, VoiceOptions};
use crate::config::VoiceTuning;
use crate::state::{AssistantState, StateStore};
use crate::{log_debug, log_debug_content};

#[derive(Debug, Clone)]
struct OutputRequest {
    text: String,
}

/// Lifecycle of the utterance currently being pushed through the synthesizer.
#[derive(Debug, Clone, Copy)]
enum UtterancePhase {
    /// Short settle delay before the first `speak` call.
    Deferred { speak_at: Instant },
    /// `speak` was issued; waiting for the platform to confirm it started.
    AwaitingStart { deadline: Instant, retry: bool },
    /// The first attempt stalled; waiting out a gap before retrying once.
    RetryDelay { resume_at: Instant },
    /// Confirmed speaking. The safety deadline covers a lost end event; the
    /// pulse keeps paused synthesizers from going mute mid-utterance.
    Speaking {
        safety_deadline: Instant,
        next_pulse: Instant,
    },
}

#[derive(Debug)]
struct ActiveUtterance {
    text: String,
    phase: UtterancePhase,
}

pub struct SpeechOutputQueue {
    voice: VoiceOptions,
    tuning: VoiceTuning,
    queue: VecDeque<OutputRequest>,
    active: Option<ActiveUtterance>,
}

impl SpeechOutputQueue {
    pub fn new(voice: VoiceOptions, tuning: VoiceTuning) -> Self {
        Self {
            voice,
            tuning,
            queue: VecDeque::new(),
            active: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_timers(&self) -> usize {
        usize::from(self.active.is_some())
    }

    /// Accept a new request. Speaks immediately (after the settle delay) when
    /// nothing is in flight, otherwise queues behind the current utterance.
    pub fn enqueue(&mut self, text: &str, tts: &mut dyn TextToSpeech, now: Instant) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.active.is_some() {
            self.queue.push_back(OutputRequest { text: text.to_string() });
            return;
        }
        self.begin(text.to_string(), tts, now, self.tuning.pre_speak_delay);
    }

    fn begin(&mut self, text: String, tts: &mut dyn TextToSpeech, now: Instant, delay: Duration) {
        // Clear any utterance the platform still thinks is pending.
        tts.cancel();
        log_debug_content(&format!("speech queued for output: {text}"));
        self.active = Some(ActiveUtterance {
            text,
            phase: UtterancePhase::Deferred {
                speak_at: now + delay,
            },
        });
    }

    /// Feed one synthesizer event in. Events with no active utterance are
    /// stale reports from a cancelled run and are dropped.
    pub fn handle_event(
        &mut self,
        event: SynthEvent,
        tts: &mut dyn TextToSpeech,
        state: &mut StateStore,
        now: Instant,
    ) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match event {
            SynthEvent::Started => {
                let estimate = speaking_estimate(&active.text, self.voice.rate, &self.tuning);
                active.phase = UtterancePhase::Speaking {
                    safety_deadline: now + estimate + self.tuning.speak_safety_margin,
                    next_pulse: now + self.tuning.keepalive_interval,
                };
                state.set(AssistantState::Speaking);
            }
            SynthEvent::Ended => {
                self.finish_active(tts, state, now);
            }
            SynthEvent::Error(kind) => {
                if !matches!(kind, SynthErrorKind::Cancelled) {
                    log_debug(&format!("speech synthesis error: {}", kind.label()));
                }
                self.active = None;
                self.queue.clear();
                state.set(AssistantState::Idle);
            }
        }
    }

    /// Drive the utterance timers; call once per pump iteration.
    pub fn tick(&mut self, tts: &mut dyn TextToSpeech, state: &mut StateStore, now: Instant) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        match active.phase {
            UtterancePhase::Deferred { speak_at } => {
                if now >= speak_at {
                    self.attempt_speak(tts, state, now, false);
                }
            }
            UtterancePhase::AwaitingStart { deadline, retry } => {
                if now >= deadline {
                    if retry {
                        log_debug("speech never started after retry; dropping queue");
                        self.abandon(tts, state);
                    } else {
                        // No start confirmation; reset the platform and try once more.
                        tts.cancel();
                        if let Some(active) = self.active.as_mut() {
                            active.phase = UtterancePhase::RetryDelay {
                                resume_at: now + self.tuning.speak_retry_gap,
                            };
                        }
                    }
                }
            }
            UtterancePhase::RetryDelay { resume_at } => {
                if now >= resume_at {
                    self.attempt_speak(tts, state, now, true);
                }
            }
            UtterancePhase::Speaking {
                safety_deadline,
                next_pulse,
            } => {
                if now >= safety_deadline {
                    log_debug("speech end event never arrived; forcing completion");
                    tts.cancel();
                    self.finish_active(tts, state, now);
                } else if now >= next_pulse {
                    tts.resume();
                    if let Some(active) = self.active.as_mut() {
                        active.phase = UtterancePhase::Speaking {
                            safety_deadline,
                            next_pulse: now + self.tuning.keepalive_interval,
                        };
                    }
                }
            }
        }
    }

    fn attempt_speak(
        &mut self,
        tts: &mut dyn TextToSpeech,
        state: &mut StateStore,
        now: Instant,
        is_retry: bool,
    ) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // Paused synthesizers silently swallow speak calls.
        tts.resume();
        match tts.speak(&active.text, &self.voice) {
            Ok(()) => {
                active.phase = UtterancePhase::AwaitingStart {
                    deadline: now + self.tuning.start_confirm_timeout,
                    retry: is_retry,
                };
            }
            Err(err) => {
                if is_retry {
                    log_debug(&format!("speech start failed twice: {err}"));
                    self.abandon(tts, state);
                } else {
                    log_debug(&format!("speech start failed: {err}"));
                    active.phase = UtterancePhase::RetryDelay {
                        resume_at: now + self.tuning.speak_retry_gap,
                    };
                }
            }
        }
    }

    /// The current utterance is done; chain into the next one or go idle.
    fn finish_active(&mut self, tts: &mut dyn TextToSpeech, state: &mut StateStore, now: Instant) {
        self.active = None;
        if let Some(next) = self.queue.pop_front() {
            // State stays Speaking across the whole batch.
            self.begin(next.text, tts, now, self.tuning.inter_item_delay);
        } else {
            state.set(AssistantState::Idle);
        }
    }

    fn abandon(&mut self, tts: &mut dyn TextToSpeech, state: &mut StateStore) {
        tts.cancel();
        self.active = None;
        self.queue.clear();
        state.set(AssistantState::Idle);
    }

    /// Drop everything, including the in-flight utterance. Releases the
    /// state whenever anything was in flight, even before the platform
    /// confirmed a start; the utterance owned the turn from the moment it
    /// was accepted, so nothing else will release it.
    pub fn cancel(&mut self, tts: &mut dyn TextToSpeech, state: &mut StateStore) {
        let was_busy = self.active.is_some();
        tts.cancel();
        self.active = None;
        self.queue.clear();
        if was_busy {
            state.set(AssistantState::Idle);
        }
    }
}

/// Upper-bound estimate of how long an utterance takes to speak, scaled by
/// the configured rate and clamped to a sane range.
fn speaking_estimate(text: &str, rate: f32, tuning: &VoiceTuning) -> Duration {
    let rate = f64::from(rate.max(0.1));
    let ms = (text.chars().count() as f64 * tuning.speak_ms_per_char as f64) / rate;
    let ms = ms.clamp(
        tuning.speak_estimate_min.as_millis() as f64,
        tuning.speak_estimate_max.as_millis() as f64,
    );
    Duration::from_millis(ms as u64)
}
