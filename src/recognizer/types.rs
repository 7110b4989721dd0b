//! # Recognition Types
//!
//! Data shapes exchanged with the upstream recognizer: the configuration sent
//! when a sub-session is opened, and the incremental results it streams back.
//! The audio bytes themselves are opaque to this crate; only the surrounding
//! metadata is typed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Audio encodings accepted by the upstream recognizer.
///
/// The set is provider-defined; this enum covers the encodings the relay
/// advertises on its handshake. The relay never inspects the audio bytes,
/// so adding a variant is purely a pass-through change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Linear16,
    Flac,
    Mulaw,
    OggOpus,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Linear16 => "linear16",
            AudioEncoding::Flac => "flac",
            AudioEncoding::Mulaw => "mulaw",
            AudioEncoding::OggOpus => "ogg_opus",
        }
    }
}

impl FromStr for AudioEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear16" => Ok(AudioEncoding::Linear16),
            "flac" => Ok(AudioEncoding::Flac),
            "mulaw" => Ok(AudioEncoding::Mulaw),
            "ogg_opus" => Ok(AudioEncoding::OggOpus),
            other => Err(format!("Unknown audio encoding: {}", other)),
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration sent to the recognizer when a sub-session is opened.
///
/// One logical Session reuses the same configuration for every generation it
/// rotates through, so this struct is built once at handshake time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
    pub language: String,
    /// Provider-specific model identifier (e.g. "video", "phone_call").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One incremental recognition result received from a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Candidate transcriptions, best first.
    pub alternatives: Vec<SpeechAlternative>,
    /// Interim results may be revised; final results are stable.
    pub is_final: bool,
    /// Offset of the end of this result from the start of the generation's
    /// audio, in milliseconds.
    #[serde(default)]
    pub end_time_ms: u64,
}

/// A single candidate transcription with optional word-level detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechAlternative {
    pub transcript: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordInfo>,
}

/// Per-word timing and speaker attribution, when the provider emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordInfo {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_tag: Option<u32>,
}
