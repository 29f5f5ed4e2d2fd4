use super::{AppConfig, VoicePrefs};
use anyhow::{bail, Context, Result};
use clap::Parser;

const MAX_WAKE_PHRASES: usize = 64;
const MAX_WAKE_PHRASE_BYTES: usize = 64;

impl AppConfig {
    /// Parse CLI arguments, merge the optional preferences file, and validate
    /// everything right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        if let Some(path) = config.prefs_file.clone() {
            let prefs = VoicePrefs::load(&path)
                .with_context(|| format!("failed to load preferences from {}", path.display()))?;
            config.apply_prefs(&prefs);
        }
        config.validate()?;
        Ok(config)
    }

    /// The preferences file mirrors the HUD settings store, so its values win
    /// over CLI defaults wherever they are present.
    pub fn apply_prefs(&mut self, prefs: &VoicePrefs) {
        if let Some(language) = &prefs.language {
            self.language = language.clone();
        }
        if let Some(rate) = prefs.voice_rate {
            self.voice_rate = rate;
        }
        if let Some(pitch) = prefs.voice_pitch {
            self.voice_pitch = pitch;
        }
        if let Some(name) = &prefs.voice_name {
            self.voice_name = Some(name.clone());
        }
        if let Some(phrases) = &prefs.wake_phrases {
            self.wake_phrases = phrases.clone();
        }
        if let Some(enabled) = prefs.wake_enabled {
            self.no_wake = !enabled;
        }
    }

    /// Check CLI values and normalize the wake-phrase list.
    pub fn validate(&mut self) -> Result<()> {
        if !is_language_tag(&self.language) {
            bail!(
                "--language must be a BCP-47-style tag (letters, digits, '-'), got {:?}",
                self.language
            );
        }
        if !(0.1..=4.0).contains(&self.voice_rate) {
            bail!(
                "--voice-rate must be between 0.1 and 4.0, got {}",
                self.voice_rate
            );
        }
        if !(0.0..=2.0).contains(&self.voice_pitch) {
            bail!(
                "--voice-pitch must be between 0.0 and 2.0, got {}",
                self.voice_pitch
            );
        }
        if !(200..=30_000).contains(&self.silence_commit_ms) {
            bail!(
                "--silence-commit-ms must be between 200 and 30000, got {}",
                self.silence_commit_ms
            );
        }
        // 0 disables the follow-up timeout, matching a capture with no limit.
        if self.follow_up_timeout_ms > 60_000 {
            bail!(
                "--follow-up-timeout-ms must be at most 60000, got {}",
                self.follow_up_timeout_ms
            );
        }
        if self.pre_capture_delay_ms > 5000 {
            bail!(
                "--pre-capture-delay-ms must be at most 5000, got {}",
                self.pre_capture_delay_ms
            );
        }
        if self.pre_speak_delay_ms > 5000 {
            bail!(
                "--pre-speak-delay-ms must be at most 5000, got {}",
                self.pre_speak_delay_ms
            );
        }
        if !(100..=10_000).contains(&self.start_confirm_ms) {
            bail!(
                "--start-confirm-ms must be between 100 and 10000, got {}",
                self.start_confirm_ms
            );
        }
        if self.speak_retry_gap_ms > 5000 {
            bail!(
                "--speak-retry-gap-ms must be at most 5000, got {}",
                self.speak_retry_gap_ms
            );
        }
        if !(1000..=60_000).contains(&self.keepalive_ms) {
            bail!(
                "--keepalive-ms must be between 1000 and 60000, got {}",
                self.keepalive_ms
            );
        }
        if self.inter_item_delay_ms > 5000 {
            bail!(
                "--inter-item-delay-ms must be at most 5000, got {}",
                self.inter_item_delay_ms
            );
        }
        if self.reopen_delay_ms > 10_000 {
            bail!(
                "--reopen-delay-ms must be at most 10000, got {}",
                self.reopen_delay_ms
            );
        }
        for (flag, value) in [
            ("--wake-restart-ms", self.wake_restart_ms),
            ("--wake-error-restart-ms", self.wake_error_restart_ms),
            ("--wake-resume-ms", self.wake_resume_ms),
        ] {
            if !(100..=60_000).contains(&value) {
                bail!("{flag} must be between 100 and 60000, got {value}");
            }
        }
        if !(1000..=120_000).contains(&self.listening_watchdog_ms) {
            bail!(
                "--listening-watchdog-ms must be between 1000 and 120000, got {}",
                self.listening_watchdog_ms
            );
        }
        if self.listening_watchdog_ms <= self.silence_commit_ms {
            bail!(
                "--listening-watchdog-ms ({}) must exceed --silence-commit-ms ({}) or it will preempt the silence commit",
                self.listening_watchdog_ms,
                self.silence_commit_ms
            );
        }
        if !(1000..=600_000).contains(&self.processing_watchdog_ms) {
            bail!(
                "--processing-watchdog-ms must be between 1000 and 600000, got {}",
                self.processing_watchdog_ms
            );
        }
        if !(1..=1000).contains(&self.speak_ms_per_char) {
            bail!(
                "--speak-ms-per-char must be between 1 and 1000, got {}",
                self.speak_ms_per_char
            );
        }
        if self.speak_estimate_min_ms > self.speak_estimate_max_ms {
            bail!(
                "--speak-estimate-min-ms ({}) cannot exceed --speak-estimate-max-ms ({})",
                self.speak_estimate_min_ms,
                self.speak_estimate_max_ms
            );
        }
        if self.speak_safety_margin_ms > 60_000 {
            bail!(
                "--speak-safety-margin-ms must be at most 60000, got {}",
                self.speak_safety_margin_ms
            );
        }
        if !(10..=1000).contains(&self.tick_ms) {
            bail!("--tick-ms must be between 10 and 1000, got {}", self.tick_ms);
        }

        if self.wake_phrases.len() > MAX_WAKE_PHRASES {
            bail!(
                "at most {MAX_WAKE_PHRASES} wake phrases are supported, got {}",
                self.wake_phrases.len()
            );
        }
        let mut normalized = Vec::with_capacity(self.wake_phrases.len());
        for phrase in &self.wake_phrases {
            let cleaned = phrase.trim().to_lowercase();
            if cleaned.is_empty() {
                bail!("wake phrases must not be empty");
            }
            if cleaned.len() > MAX_WAKE_PHRASE_BYTES {
                bail!(
                    "wake phrase {:?} exceeds {MAX_WAKE_PHRASE_BYTES} bytes",
                    phrase
                );
            }
            normalized.push(cleaned);
        }
        self.wake_phrases = normalized;
        Ok(())
    }
}

fn is_language_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 35
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !tag.starts_with('-')
        && !tag.ends_with('-')
}

#[cfg(test)]
pub(super) fn base_config() -> AppConfig {
    AppConfig::parse_from(["test-app"])
}
