//! Command-line parsing and validation helpers.

mod prefs;
mod validation;

pub use prefs::VoicePrefs;

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::capability::VoiceOptions;
use crate::wake::WAKE_PHRASES;

/// CLI options for the VoiceHUD assistant shell. Every empirically tuned
/// delay in the voice core is exposed here rather than hard-coded, since the
/// defaults are calibrated around one platform's quirks.
#[derive(Debug, Parser, Clone)]
#[command(about = "VoiceHUD assistant shell", author, version)]
pub struct AppConfig {
    /// Recognition language tag passed to speech capture
    #[arg(long, default_value = "en-US")]
    pub language: String,

    /// Speech output rate multiplier
    #[arg(long = "voice-rate", default_value_t = 1.0)]
    pub voice_rate: f32,

    /// Speech output pitch
    #[arg(long = "voice-pitch", default_value_t = 1.0)]
    pub voice_pitch: f32,

    /// Preferred synthesis voice name (platform default when omitted)
    #[arg(long = "voice-name")]
    pub voice_name: Option<String>,

    /// Wake phrase override (repeatable; built-in set used when none given)
    #[arg(long = "wake-phrase", action = ArgAction::Append, value_name = "PHRASE")]
    pub wake_phrases: Vec<String>,

    /// Disable the passive wake-word listener entirely
    #[arg(long = "no-wake", default_value_t = false)]
    pub no_wake: bool,

    /// Path to a JSON voice-preferences file (mirrors the HUD settings store)
    #[arg(long = "prefs-file", env = "VOICEHUD_PREFS")]
    pub prefs_file: Option<PathBuf>,

    /// Silence window after the last speech fragment before committing (milliseconds)
    #[arg(long = "silence-commit-ms", default_value_t = 2000)]
    pub silence_commit_ms: u64,

    /// No-speech timeout armed on follow-up turns in conversation mode (milliseconds)
    #[arg(long = "follow-up-timeout-ms", default_value_t = 5000)]
    pub follow_up_timeout_ms: u64,

    /// Delay before starting a requested capture so audio can settle (milliseconds)
    #[arg(long = "pre-capture-delay-ms", default_value_t = 150)]
    pub pre_capture_delay_ms: u64,

    /// Delay before issuing an utterance so a just-ended capture releases the
    /// audio pipeline (milliseconds)
    #[arg(long = "pre-speak-delay-ms", default_value_t = 150)]
    pub pre_speak_delay_ms: u64,

    /// How long to wait for synthesis start confirmation before treating the
    /// utterance as silently failed (milliseconds)
    #[arg(long = "start-confirm-ms", default_value_t = 800)]
    pub start_confirm_ms: u64,

    /// Gap before re-issuing an unconfirmed utterance (milliseconds)
    #[arg(long = "speak-retry-gap-ms", default_value_t = 200)]
    pub speak_retry_gap_ms: u64,

    /// Keep-alive pulse interval while speaking (milliseconds)
    #[arg(long = "keepalive-ms", default_value_t = 5000)]
    pub keepalive_ms: u64,

    /// Pause between queued utterances (milliseconds)
    #[arg(long = "inter-item-delay-ms", default_value_t = 100)]
    pub inter_item_delay_ms: u64,

    /// Delay before reopening the mic after speech ends in conversation mode
    /// (milliseconds)
    #[arg(long = "reopen-delay-ms", default_value_t = 800)]
    pub reopen_delay_ms: u64,

    /// Wake listener restart delay after a natural end (milliseconds)
    #[arg(long = "wake-restart-ms", default_value_t = 500)]
    pub wake_restart_ms: u64,

    /// Wake listener restart delay after an error (milliseconds)
    #[arg(long = "wake-error-restart-ms", default_value_t = 1000)]
    pub wake_error_restart_ms: u64,

    /// Wake listener resume delay after the assistant returns to idle
    /// (milliseconds)
    #[arg(long = "wake-resume-ms", default_value_t = 1500)]
    pub wake_resume_ms: u64,

    /// Force-stop threshold for a capture session whose own timers never fire
    /// (milliseconds)
    #[arg(long = "listening-watchdog-ms", default_value_t = 10_000)]
    pub listening_watchdog_ms: u64,

    /// Force-idle threshold for a hung assistant dispatch (milliseconds)
    #[arg(long = "processing-watchdog-ms", default_value_t = 30_000)]
    pub processing_watchdog_ms: u64,

    /// Speaking-time estimate per character at 1x rate (milliseconds)
    #[arg(long = "speak-ms-per-char", default_value_t = 80)]
    pub speak_ms_per_char: u64,

    /// Lower clamp for the speaking-time estimate (milliseconds)
    #[arg(long = "speak-estimate-min-ms", default_value_t = 3000)]
    pub speak_estimate_min_ms: u64,

    /// Upper clamp for the speaking-time estimate (milliseconds)
    #[arg(long = "speak-estimate-max-ms", default_value_t = 30_000)]
    pub speak_estimate_max_ms: u64,

    /// Safety margin past the estimate before force-cancelling an utterance
    /// that never ended (milliseconds)
    #[arg(long = "speak-safety-margin-ms", default_value_t = 2000)]
    pub speak_safety_margin_ms: u64,

    /// Cadence of the host pump loop (milliseconds)
    #[arg(long = "tick-ms", default_value_t = 50)]
    pub tick_ms: u64,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOICEHUD_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOICEHUD_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript/reply snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "VOICEHUD_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

impl AppConfig {
    /// Tuning values consumed by the voice core.
    pub fn voice_tuning(&self) -> VoiceTuning {
        let ms = Duration::from_millis;
        VoiceTuning {
            language: self.language.clone(),
            silence_commit: ms(self.silence_commit_ms),
            follow_up_timeout: ms(self.follow_up_timeout_ms),
            pre_capture_delay: ms(self.pre_capture_delay_ms),
            pre_speak_delay: ms(self.pre_speak_delay_ms),
            start_confirm_timeout: ms(self.start_confirm_ms),
            speak_retry_gap: ms(self.speak_retry_gap_ms),
            keepalive_interval: ms(self.keepalive_ms),
            inter_item_delay: ms(self.inter_item_delay_ms),
            reopen_delay: ms(self.reopen_delay_ms),
            wake_restart_delay: ms(self.wake_restart_ms),
            wake_error_restart_delay: ms(self.wake_error_restart_ms),
            wake_resume_delay: ms(self.wake_resume_ms),
            listening_watchdog: ms(self.listening_watchdog_ms),
            processing_watchdog: ms(self.processing_watchdog_ms),
            speak_ms_per_char: self.speak_ms_per_char,
            speak_estimate_min: ms(self.speak_estimate_min_ms),
            speak_estimate_max: ms(self.speak_estimate_max_ms),
            speak_safety_margin: ms(self.speak_safety_margin_ms),
        }
    }

    pub fn voice_options(&self) -> VoiceOptions {
        VoiceOptions {
            rate: self.voice_rate,
            pitch: self.voice_pitch,
            voice: self.voice_name.clone(),
        }
    }

    /// Wake phrases to scan for, lowercased. CLI overrides replace the
    /// built-in set rather than extending it.
    pub fn effective_wake_phrases(&self) -> Vec<String> {
        if self.wake_phrases.is_empty() {
            WAKE_PHRASES.iter().map(|p| p.to_string()).collect()
        } else {
            self.wake_phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        }
    }
}

/// Tunable delays for the voice interaction core, precomputed as durations.
#[derive(Debug, Clone)]
pub struct VoiceTuning {
    pub language: String,
    pub silence_commit: Duration,
    pub follow_up_timeout: Duration,
    pub pre_capture_delay: Duration,
    pub pre_speak_delay: Duration,
    pub start_confirm_timeout: Duration,
    pub speak_retry_gap: Duration,
    pub keepalive_interval: Duration,
    pub inter_item_delay: Duration,
    pub reopen_delay: Duration,
    pub wake_restart_delay: Duration,
    pub wake_error_restart_delay: Duration,
    pub wake_resume_delay: Duration,
    pub listening_watchdog: Duration,
    pub processing_watchdog: Duration,
    pub speak_ms_per_char: u64,
    pub speak_estimate_min: Duration,
    pub speak_estimate_max: Duration,
    pub speak_safety_margin: Duration,
}

impl Default for VoiceTuning {
    fn default() -> Self {
        let ms = Duration::from_millis;
        Self {
            language: "en-US".to_string(),
            silence_commit: ms(2000),
            follow_up_timeout: ms(5000),
            pre_capture_delay: ms(150),
            pre_speak_delay: ms(150),
            start_confirm_timeout: ms(800),
            speak_retry_gap: ms(200),
            keepalive_interval: ms(5000),
            inter_item_delay: ms(100),
            reopen_delay: ms(800),
            wake_restart_delay: ms(500),
            wake_error_restart_delay: ms(1000),
            wake_resume_delay: ms(1500),
            listening_watchdog: ms(10_000),
            processing_watchdog: ms(30_000),
            speak_ms_per_char: 80,
            speak_estimate_min: ms(3000),
            speak_estimate_max: ms(30_000),
            speak_safety_margin: ms(2000),
        }
    }
}
