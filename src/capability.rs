//! Seam traits for the platform capabilities the voice core consumes.
//!
//! Speech-to-text, text-to-speech, and the assistant dispatch are all
//! callback-shaped on real platforms; here they are poll-shaped so a single
//! cooperative pump can drain their events without blocking.

use std::fmt;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Event delivered by a speech-to-text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// One recognition update. Interim fragments replace each other; final
    /// fragments are committed text.
    Fragment {
        alternatives: Vec<String>,
        is_final: bool,
    },
    /// The platform ended the run on its own (browser-style auto-end).
    Ended,
    /// The run failed. No further events follow.
    Error(CaptureErrorKind),
}

/// Closed error vocabulary reported by speech-to-text platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureErrorKind {
    NoSpeech,
    Aborted,
    Other(String),
}

impl CaptureErrorKind {
    pub fn label(&self) -> &str {
        match self {
            CaptureErrorKind::NoSpeech => "no-speech",
            CaptureErrorKind::Aborted => "aborted",
            CaptureErrorKind::Other(msg) => msg,
        }
    }

    /// Benign errors are part of normal operation and never surfaced as failures.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            CaptureErrorKind::NoSpeech | CaptureErrorKind::Aborted
        )
    }
}

/// Event delivered by the text-to-speech capability for the in-flight utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthEvent {
    Started,
    Ended,
    Error(SynthErrorKind),
}

/// Synthesis error vocabulary. `Cancelled` is expected after an explicit cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthErrorKind {
    Cancelled,
    Other(String),
}

impl SynthErrorKind {
    pub fn label(&self) -> &str {
        match self {
            SynthErrorKind::Cancelled => "cancelled",
            SynthErrorKind::Other(msg) => msg,
        }
    }
}

/// Errors surfaced synchronously when a capability cannot start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The platform does not provide this capability at all.
    Unsupported,
    /// Permission was denied; retrying will not help.
    Denied(String),
    /// The start attempt failed for a transient reason.
    Failed(String),
}

impl CapabilityError {
    /// Permanent failures disable the capability for the rest of the run.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CapabilityError::Unsupported | CapabilityError::Denied(_)
        )
    }
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::Unsupported => write!(f, "capability unsupported"),
            CapabilityError::Denied(msg) => write!(f, "permission denied: {msg}"),
            CapabilityError::Failed(msg) => write!(f, "start failed: {msg}"),
        }
    }
}

/// Options passed when starting a speech-to-text run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub language: String,
    /// Continuous runs keep listening across utterances (wake listener).
    pub continuous: bool,
    pub interim_results: bool,
    pub max_alternatives: u32,
}

/// Synthesis parameters sourced from the voice preferences.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceOptions {
    pub rate: f32,
    pub pitch: f32,
    pub voice: Option<String>,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            voice: None,
        }
    }
}

/// Speech-to-text capability. Two independent instances exist at runtime:
/// one for the active capture session and one for the passive wake listener.
pub trait SpeechToText {
    fn start(&mut self, opts: &CaptureOptions) -> Result<(), CapabilityError>;
    /// Graceful stop; buffered fragments and `Ended` may still arrive.
    fn stop(&mut self);
    /// Hard cancel; no further events are delivered for this run.
    fn abort(&mut self);
    fn poll_event(&mut self) -> Option<CaptureEvent>;
}

/// Text-to-speech capability with at most one in-flight utterance.
pub trait TextToSpeech {
    fn speak(&mut self, text: &str, opts: &VoiceOptions) -> Result<(), CapabilityError>;
    /// Nudge a paused synthesizer; used as the keep-alive pulse.
    fn resume(&mut self);
    fn cancel(&mut self);
    fn poll_event(&mut self) -> Option<SynthEvent>;
}

/// Response payload from the assistant backend. Realtime messages arrive as
/// JSON with the spoken content plus an optional emotion hint for the HUD.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    #[serde(default)]
    pub emotion: Option<String>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            emotion: None,
        }
    }
}

/// Parse a realtime reply payload.
pub fn parse_reply(raw: &str) -> Result<AssistantReply> {
    serde_json::from_str(raw.trim()).context("assistant reply was not valid JSON")
}

/// Collaborator that turns a user transcript into a spoken reply. The network
/// side is out of scope; the core only sends text and polls for replies.
pub trait AssistantDispatch {
    fn send(&mut self, text: &str) -> Result<()>;
    fn poll_reply(&mut self) -> Option<AssistantReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_accepts_full_payload() {
        let reply = parse_reply(r#"{"content":"At once, sir.","emotion":"happy"}"#)
            .expect("valid payload");
        assert_eq!(reply.content, "At once, sir.");
        assert_eq!(reply.emotion.as_deref(), Some("happy"));
    }

    #[test]
    fn parse_reply_defaults_missing_emotion() {
        let reply = parse_reply(r#"{"content":"Done."}"#).expect("valid payload");
        assert_eq!(reply, AssistantReply::text("Done."));
    }

    #[test]
    fn parse_reply_rejects_garbage() {
        assert!(parse_reply("not json").is_err());
    }

    #[test]
    fn benign_capture_errors_are_classified() {
        assert!(CaptureErrorKind::NoSpeech.is_benign());
        assert!(CaptureErrorKind::Aborted.is_benign());
        assert!(!CaptureErrorKind::Other("audio-capture".into()).is_benign());
    }

    #[test]
    fn permanent_capability_errors_are_classified() {
        assert!(CapabilityError::Unsupported.is_permanent());
        assert!(CapabilityError::Denied("mic".into()).is_permanent());
        assert!(!CapabilityError::Failed("busy".into()).is_permanent());
    }
}
