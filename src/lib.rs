//! Voice interaction core for a heads-up assistant display.
//!
//! The crate owns the concurrency story of a voice assistant: a shared
//! state machine, a microphone capture session with silence detection, an
//! ordered speech output queue with watchdogs, a passive wake-phrase
//! listener, and the orchestrator that arbitrates the audio pipeline
//! between them. Platform speech engines and the assistant backend plug in
//! behind the traits in [`capability`].

pub mod capability;
pub mod capture;
pub mod config;
mod logging;
pub mod orchestrator;
pub mod speech;
pub mod state;
mod telemetry;
pub mod transcript;
pub mod wake;

pub use capability::{
    AssistantDispatch, AssistantReply, CapabilityError, CaptureErrorKind, CaptureEvent,
    CaptureOptions, SpeechToText, SynthErrorKind, SynthEvent, TextToSpeech, VoiceOptions,
};
pub use capture::{CaptureOutcome, CaptureSession};
pub use config::{AppConfig, VoiceTuning};
pub use logging::{crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic};
pub use orchestrator::Orchestrator;
pub use speech::SpeechOutputQueue;
pub use state::{AssistantState, StateChange, StateStore, StateSubscription};
pub use transcript::{Role, TranscriptEntry, TranscriptLog};
pub use wake::{match_wake_phrase, WakeWordDetector, WAKE_PHRASES};

/// Initialize structured trace output alongside the debug log.
pub fn init_telemetry(config: &AppConfig) {
    telemetry::init_tracing(config);
}
