//! Console stand-ins for the platform capabilities.
//!
//! The real HUD plugs OS speech engines and a realtime backend into the
//! orchestrator. This host runs the same core against the terminal:
//! microphone capture reports unsupported, speech prints to stdout, and
//! the assistant echoes canned replies so the whole pipeline is exercisable
//! without audio hardware.

use std::collections::VecDeque;

use anyhow::Result;
use voicehud::{
    AssistantDispatch, AssistantReply, CapabilityError, CaptureEvent, CaptureOptions,
    SpeechToText, SynthEvent, TextToSpeech, VoiceOptions,
};

/// No microphone in a terminal; every start reports unsupported so wake
/// listening and voice capture degrade cleanly to typed input.
pub struct UnavailableStt;

impl SpeechToText for UnavailableStt {
    fn start(&mut self, _opts: &CaptureOptions) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported)
    }

    fn stop(&mut self) {}

    fn abort(&mut self) {}

    fn poll_event(&mut self) -> Option<CaptureEvent> {
        None
    }
}

/// Prints utterances instead of speaking them, confirming start and end
/// immediately so the queue advances at full speed.
#[derive(Default)]
pub struct ConsoleTts {
    events: VecDeque<SynthEvent>,
}

impl TextToSpeech for ConsoleTts {
    fn speak(&mut self, text: &str, _opts: &VoiceOptions) -> Result<(), CapabilityError> {
        println!("vox> {text}");
        self.events.push_back(SynthEvent::Started);
        self.events.push_back(SynthEvent::Ended);
        Ok(())
    }

    fn resume(&mut self) {}

    fn cancel(&mut self) {
        self.events.clear();
    }

    fn poll_event(&mut self) -> Option<SynthEvent> {
        self.events.pop_front()
    }
}

/// Echo backend with a one-turn reply latency.
#[derive(Default)]
pub struct LocalEchoDispatch {
    replies: VecDeque<AssistantReply>,
}

impl AssistantDispatch for LocalEchoDispatch {
    fn send(&mut self, text: &str) -> Result<()> {
        self.replies.push_back(AssistantReply {
            content: format!("You said: {text}. All systems nominal, sir."),
            emotion: Some("neutral".to_string()),
        });
        Ok(())
    }

    fn poll_reply(&mut self) -> Option<AssistantReply> {
        self.replies.pop_front()
    }
}
