//! Optional JSON preferences file.
//!
//! The HUD persists the user's voice settings (rate, pitch, voice, wake
//! phrases) out of band; this loader lets the shell pick them up without
//! owning the persistence layer itself.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Subset of the HUD settings store the voice core cares about. Unknown
/// fields are ignored so the file can carry presentation settings too.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoicePrefs {
    pub language: Option<String>,
    pub voice_rate: Option<f32>,
    pub voice_pitch: Option<f32>,
    pub voice_name: Option<String>,
    pub wake_phrases: Option<Vec<String>>,
    pub wake_enabled: Option<bool>,
}

impl VoicePrefs {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid preferences file", path.display()))
    }
}
