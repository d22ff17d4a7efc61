#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::{validate_finite_range, validate_label};
use crate::{ContractViolation, Validate};

/// Skip step used by the free-standing player's back/forward buttons.
pub const FREE_PLAYER_SKIP_SECS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlaybackRate {
    #[default]
    #[serde(rename = "1")]
    X1,
    #[serde(rename = "2")]
    X2,
    #[serde(rename = "3")]
    X3,
}

impl PlaybackRate {
    pub fn from_multiplier(multiplier: u8) -> Result<Self, ContractViolation> {
        match multiplier {
            1 => Ok(PlaybackRate::X1),
            2 => Ok(PlaybackRate::X2),
            3 => Ok(PlaybackRate::X3),
            _ => Err(ContractViolation::InvalidValue {
                field: "playback_rate",
                reason: "must be one of 1, 2, 3",
            }),
        }
    }

    pub fn multiplier(self) -> u8 {
        match self {
            PlaybackRate::X1 => 1,
            PlaybackRate::X2 => 2,
            PlaybackRate::X3 => 3,
        }
    }
}

/// Gated listening and ad-hoc playback are separate operating modes of the same gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioGateMode {
    GatedListening,
    FreePlayer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioSourceDescriptor {
    pub uri: String,
    pub label: String,
}

impl AudioSourceDescriptor {
    pub fn v1(uri: String, label: String) -> Result<Self, ContractViolation> {
        let source = Self { uri, label };
        source.validate()?;
        Ok(source)
    }
}

impl Validate for AudioSourceDescriptor {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.uri.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "audio_source_descriptor.uri",
                reason: "must be non-empty",
            });
        }
        if self.uri.chars().any(char::is_whitespace) {
            return Err(ContractViolation::InvalidValue {
                field: "audio_source_descriptor.uri",
                reason: "must not contain whitespace",
            });
        }
        validate_label("audio_source_descriptor.label", &self.label, 128)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AudioGateOptions {
    #[serde(rename = "loop")]
    pub looped: bool,
    pub autoplay: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSessionState {
    pub mode: Option<AudioGateMode>,
    pub source_label: Option<String>,
    pub is_playing: bool,
    pub playback_rate: PlaybackRate,
    pub volume: f64,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
}

impl AudioSessionState {
    pub fn detached() -> Self {
        Self {
            mode: None,
            source_label: None,
            is_playing: false,
            playback_rate: PlaybackRate::X1,
            volume: 1.0,
            position_secs: 0.0,
            duration_secs: None,
        }
    }
}

impl Validate for AudioSessionState {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite_range("audio_session_state.volume", self.volume, 0.0, 1.0)?;
        if !self.position_secs.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "audio_session_state.position_secs",
            });
        }
        if self.position_secs < 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "audio_session_state.position_secs",
                reason: "must be >= 0",
            });
        }
        if let Some(duration) = self.duration_secs {
            if !duration.is_finite() {
                return Err(ContractViolation::NotFinite {
                    field: "audio_session_state.duration_secs",
                });
            }
            if self.position_secs > duration {
                return Err(ContractViolation::InvalidValue {
                    field: "audio_session_state.position_secs",
                    reason: "must be <= duration_secs",
                });
            }
        }
        if self.mode != Some(AudioGateMode::GatedListening)
            && self.playback_rate != PlaybackRate::X1
        {
            return Err(ContractViolation::InvalidValue {
                field: "audio_session_state.playback_rate",
                reason: "rate control exists only in gated listening mode",
            });
        }
        Ok(())
    }
}
