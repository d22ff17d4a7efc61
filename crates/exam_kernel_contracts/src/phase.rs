#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::audio::AudioSourceDescriptor;
use crate::device::DeviceTestName;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const EXAM_PHASE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Upper bound for any single phase timer (24h).
pub const MAX_PHASE_TIMER_SECS: u32 = 86_400;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamPhase {
    HallTicket,
    DeviceTest,
    Listening,
    Writing,
    Ended,
}

impl ExamPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamPhase::HallTicket => "HALL_TICKET",
            ExamPhase::DeviceTest => "DEVICE_TEST",
            ExamPhase::Listening => "LISTENING",
            ExamPhase::Writing => "WRITING",
            ExamPhase::Ended => "ENDED",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ExamPhase::Ended
    }
}

/// Identifies one run of the countdown. A tick is honoured only while its token is live.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimerToken {
    pub generation: u64,
    pub phase: ExamPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimerState {
    pub remaining_secs: u32,
    pub active: bool,
}

/// Scheduling instruction for whatever host drives the real clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerDirective {
    Start { token: TimerToken, seconds: u32 },
    Cancel { token: TimerToken },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryAction {
    #[default]
    None,
    /// Attach the listening source in gated mode and start it immediately.
    StartListeningAudio,
    /// Give the phase the free-standing player (no source until the candidate loads one).
    AttachFreePlayer,
    /// Freeze the document and announce completion.
    SealDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitAction {
    #[default]
    None,
    /// Pause the gate regardless of user intent and zero the remaining time.
    ForcePauseAudio,
    /// Release the microphone lease and any test audio held by the phase.
    ReleaseDevices,
    /// Stop and detach the free-standing player.
    ReleaseAudio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub phase: ExamPhase,
    #[serde(default)]
    pub timer_seconds: Option<u32>,
    #[serde(default)]
    pub entry_action: EntryAction,
    #[serde(default)]
    pub exit_action: ExitAction,
}

impl PhaseSpec {
    pub fn v1(
        phase: ExamPhase,
        timer_seconds: Option<u32>,
        entry_action: EntryAction,
        exit_action: ExitAction,
    ) -> Result<Self, ContractViolation> {
        let spec = Self {
            phase,
            timer_seconds,
            entry_action,
            exit_action,
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl Validate for PhaseSpec {
    fn validate(&self) -> Result<(), ContractViolation> {
        match (self.phase, self.timer_seconds) {
            (ExamPhase::HallTicket | ExamPhase::DeviceTest | ExamPhase::Ended, Some(_)) => {
                return Err(ContractViolation::InvalidValue {
                    field: "phase_spec.timer_seconds",
                    reason: "only LISTENING and WRITING phases may carry a timer",
                });
            }
            (ExamPhase::Listening, None) => {
                return Err(ContractViolation::InvalidValue {
                    field: "phase_spec.timer_seconds",
                    reason: "LISTENING requires a timer",
                });
            }
            (_, Some(secs)) if secs == 0 || secs > MAX_PHASE_TIMER_SECS => {
                return Err(ContractViolation::InvalidRange {
                    field: "phase_spec.timer_seconds",
                    min: 1.0,
                    max: MAX_PHASE_TIMER_SECS as f64,
                    got: secs as f64,
                });
            }
            _ => {}
        }

        let entry_ok = match self.entry_action {
            EntryAction::None => true,
            EntryAction::StartListeningAudio => self.phase == ExamPhase::Listening,
            EntryAction::AttachFreePlayer => {
                matches!(self.phase, ExamPhase::DeviceTest | ExamPhase::Writing)
            }
            EntryAction::SealDocument => self.phase == ExamPhase::Ended,
        };
        if !entry_ok {
            return Err(ContractViolation::InvalidValue {
                field: "phase_spec.entry_action",
                reason: "entry action does not apply to this phase",
            });
        }

        let exit_ok = match self.exit_action {
            ExitAction::None => true,
            ExitAction::ForcePauseAudio => self.phase == ExamPhase::Listening,
            ExitAction::ReleaseDevices => self.phase == ExamPhase::DeviceTest,
            ExitAction::ReleaseAudio => {
                matches!(self.phase, ExamPhase::DeviceTest | ExamPhase::Writing)
            }
        };
        if !exit_ok {
            return Err(ContractViolation::InvalidValue {
                field: "phase_spec.exit_action",
                reason: "exit action does not apply to this phase",
            });
        }
        if self.phase == ExamPhase::Listening
            && (self.entry_action != EntryAction::StartListeningAudio
                || self.exit_action != ExitAction::ForcePauseAudio)
        {
            return Err(ContractViolation::InvalidValue {
                field: "phase_spec.phase",
                reason: "LISTENING must start audio on entry and force-pause it on exit",
            });
        }
        Ok(())
    }
}

/// The only externally supplied configuration: an ordered phase sequence and its gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamBlueprint {
    pub schema_version: SchemaVersion,
    pub phases: Vec<PhaseSpec>,
    pub required_tests: BTreeSet<DeviceTestName>,
    #[serde(default)]
    pub back_enabled: bool,
    #[serde(default)]
    pub listening_source: Option<AudioSourceDescriptor>,
}

impl ExamBlueprint {
    pub fn v1(
        phases: Vec<PhaseSpec>,
        required_tests: BTreeSet<DeviceTestName>,
        back_enabled: bool,
        listening_source: Option<AudioSourceDescriptor>,
    ) -> Result<Self, ContractViolation> {
        let blueprint = Self {
            schema_version: EXAM_PHASE_CONTRACT_VERSION,
            phases,
            required_tests,
            back_enabled,
            listening_source,
        };
        blueprint.validate()?;
        Ok(blueprint)
    }

    pub fn position_of(&self, phase: ExamPhase) -> Option<usize> {
        self.phases.iter().position(|spec| spec.phase == phase)
    }

    pub fn has_listening(&self) -> bool {
        self.position_of(ExamPhase::Listening).is_some()
    }
}

impl Validate for ExamBlueprint {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != EXAM_PHASE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "exam_blueprint.schema_version",
                reason: "must match EXAM_PHASE_CONTRACT_VERSION",
            });
        }
        for spec in &self.phases {
            spec.validate()?;
        }
        // Strictly increasing phase order forbids duplicates and reordering in one check.
        if self.phases.windows(2).any(|w| w[0].phase >= w[1].phase) {
            return Err(ContractViolation::InvalidValue {
                field: "exam_blueprint.phases",
                reason: "phases must appear once each in canonical order",
            });
        }
        let sequence: Vec<ExamPhase> = self.phases.iter().map(|spec| spec.phase).collect();
        let required_shape = [
            ExamPhase::HallTicket,
            ExamPhase::DeviceTest,
            ExamPhase::Writing,
            ExamPhase::Ended,
        ];
        if !required_shape.iter().all(|phase| sequence.contains(phase)) {
            return Err(ContractViolation::InvalidValue {
                field: "exam_blueprint.phases",
                reason: "must contain HALL_TICKET, DEVICE_TEST, WRITING and ENDED",
            });
        }
        if self.required_tests.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "exam_blueprint.required_tests",
                reason: "must name at least one device test",
            });
        }
        if self.has_listening() {
            match &self.listening_source {
                Some(source) => source.validate()?,
                None => {
                    return Err(ContractViolation::InvalidValue {
                        field: "exam_blueprint.listening_source",
                        reason: "must be present when LISTENING is configured",
                    });
                }
            }
            if self.back_enabled {
                return Err(ContractViolation::InvalidValue {
                    field: "exam_blueprint.back_enabled",
                    reason: "back navigation is only available without a LISTENING gate",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(phase: ExamPhase, timer: Option<u32>) -> PhaseSpec {
        PhaseSpec {
            phase,
            timer_seconds: timer,
            entry_action: EntryAction::None,
            exit_action: ExitAction::None,
        }
    }

    fn listening_spec(secs: u32) -> PhaseSpec {
        PhaseSpec {
            phase: ExamPhase::Listening,
            timer_seconds: Some(secs),
            entry_action: EntryAction::StartListeningAudio,
            exit_action: ExitAction::ForcePauseAudio,
        }
    }

    fn source() -> AudioSourceDescriptor {
        AudioSourceDescriptor::v1("asset://passage.mp3".to_string(), "Passage".to_string())
            .unwrap()
    }

    #[test]
    fn at_phase_contract_01_both_observed_shapes_validate() {
        let writing_only = ExamBlueprint::v1(
            vec![
                spec(ExamPhase::HallTicket, None),
                spec(ExamPhase::DeviceTest, None),
                spec(ExamPhase::Writing, Some(1_800)),
                spec(ExamPhase::Ended, None),
            ],
            DeviceTestName::full_set(),
            true,
            None,
        );
        assert!(writing_only.is_ok());

        let gated = ExamBlueprint::v1(
            vec![
                spec(ExamPhase::HallTicket, None),
                spec(ExamPhase::DeviceTest, None),
                listening_spec(240),
                spec(ExamPhase::Writing, None),
                spec(ExamPhase::Ended, None),
            ],
            DeviceTestName::audio_pair(),
            false,
            Some(source()),
        );
        assert!(gated.is_ok());
    }

    #[test]
    fn at_phase_contract_02_out_of_order_sequence_is_rejected() {
        let out = ExamBlueprint::v1(
            vec![
                spec(ExamPhase::DeviceTest, None),
                spec(ExamPhase::HallTicket, None),
                spec(ExamPhase::Writing, None),
                spec(ExamPhase::Ended, None),
            ],
            DeviceTestName::full_set(),
            false,
            None,
        );
        assert!(out.is_err());
    }

    #[test]
    fn at_phase_contract_03_listening_needs_timer_source_and_no_back() {
        assert!(PhaseSpec::v1(
            ExamPhase::Listening,
            None,
            EntryAction::StartListeningAudio,
            ExitAction::ForcePauseAudio
        )
        .is_err());

        let phases = vec![
            spec(ExamPhase::HallTicket, None),
            spec(ExamPhase::DeviceTest, None),
            listening_spec(240),
            spec(ExamPhase::Writing, None),
            spec(ExamPhase::Ended, None),
        ];
        assert!(
            ExamBlueprint::v1(phases.clone(), DeviceTestName::audio_pair(), false, None).is_err()
        );
        assert!(ExamBlueprint::v1(phases, DeviceTestName::audio_pair(), true, Some(source()))
            .is_err());
    }

    #[test]
    fn at_phase_contract_04_timer_bounds_and_placement() {
        assert!(PhaseSpec::v1(
            ExamPhase::Writing,
            Some(0),
            EntryAction::None,
            ExitAction::None
        )
        .is_err());
        assert!(PhaseSpec::v1(
            ExamPhase::DeviceTest,
            Some(30),
            EntryAction::None,
            ExitAction::None
        )
        .is_err());
        assert!(PhaseSpec::v1(
            ExamPhase::Writing,
            Some(MAX_PHASE_TIMER_SECS + 1),
            EntryAction::None,
            ExitAction::None
        )
        .is_err());
    }

    #[test]
    fn at_phase_contract_05_blueprint_parses_from_json() {
        let raw = r#"{
            "schema_version": 1,
            "phases": [
                {"phase": "HALL_TICKET"},
                {"phase": "DEVICE_TEST", "exit_action": "RELEASE_DEVICES"},
                {"phase": "WRITING", "timer_seconds": 900, "entry_action": "ATTACH_FREE_PLAYER"},
                {"phase": "ENDED", "entry_action": "SEAL_DOCUMENT"}
            ],
            "required_tests": ["PLAYBACK", "MICROPHONE", "KEYBOARD"],
            "back_enabled": true
        }"#;
        let blueprint: ExamBlueprint = serde_json::from_str(raw).unwrap();
        assert!(blueprint.validate().is_ok());
        assert_eq!(blueprint.phases[2].timer_seconds, Some(900));
        assert!(!blueprint.has_listening());
    }
}
