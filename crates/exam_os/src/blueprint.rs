#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use exam_kernel_contracts::audio::AudioSourceDescriptor;
use exam_kernel_contracts::device::DeviceTestName;
use exam_kernel_contracts::hall_ticket::HallTicketInfo;
use exam_kernel_contracts::phase::{EntryAction, ExamBlueprint, ExamPhase, ExitAction, PhaseSpec};
use exam_kernel_contracts::{ContractViolation, Validate};

pub const DEFAULT_WRITING_SECS: u32 = 3_600;
pub const DEFAULT_LISTENING_SECS: u32 = 240;

pub const PLAYBACK_SAMPLE_URI: &str = "asset://device-test/sample.wav";

#[derive(Debug)]
pub enum BlueprintLoadError {
    Json(serde_json::Error),
    ContractViolation(ContractViolation),
}

impl std::fmt::Display for BlueprintLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "blueprint json error: {err}"),
            Self::ContractViolation(v) => write!(f, "blueprint rejected: {v}"),
        }
    }
}

impl std::error::Error for BlueprintLoadError {}

impl From<serde_json::Error> for BlueprintLoadError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ContractViolation> for BlueprintLoadError {
    fn from(value: ContractViolation) -> Self {
        Self::ContractViolation(value)
    }
}

/// HallTicket → DeviceTest (all three tests) → Writing (timed, free player) → Ended.
pub fn timed_writing_v1(writing_secs: u32) -> Result<ExamBlueprint, ContractViolation> {
    ExamBlueprint::v1(
        vec![
            PhaseSpec::v1(ExamPhase::HallTicket, None, EntryAction::None, ExitAction::None)?,
            PhaseSpec::v1(
                ExamPhase::DeviceTest,
                None,
                EntryAction::None,
                ExitAction::ReleaseDevices,
            )?,
            PhaseSpec::v1(
                ExamPhase::Writing,
                Some(writing_secs),
                EntryAction::AttachFreePlayer,
                ExitAction::ReleaseAudio,
            )?,
            PhaseSpec::v1(
                ExamPhase::Ended,
                None,
                EntryAction::SealDocument,
                ExitAction::None,
            )?,
        ],
        DeviceTestName::full_set(),
        true,
        None,
    )
}

/// HallTicket → DeviceTest (playback, microphone) → Listening → Writing (untimed) → Ended.
pub fn listening_gate_v1(
    listening_secs: u32,
    source: AudioSourceDescriptor,
) -> Result<ExamBlueprint, ContractViolation> {
    ExamBlueprint::v1(
        vec![
            PhaseSpec::v1(ExamPhase::HallTicket, None, EntryAction::None, ExitAction::None)?,
            PhaseSpec::v1(
                ExamPhase::DeviceTest,
                None,
                EntryAction::None,
                ExitAction::ReleaseDevices,
            )?,
            PhaseSpec::v1(
                ExamPhase::Listening,
                Some(listening_secs),
                EntryAction::StartListeningAudio,
                ExitAction::ForcePauseAudio,
            )?,
            PhaseSpec::v1(ExamPhase::Writing, None, EntryAction::None, ExitAction::None)?,
            PhaseSpec::v1(
                ExamPhase::Ended,
                None,
                EntryAction::SealDocument,
                ExitAction::None,
            )?,
        ],
        DeviceTestName::audio_pair(),
        false,
        Some(source),
    )
}

pub fn parse_blueprint_json(raw: &str) -> Result<ExamBlueprint, BlueprintLoadError> {
    let blueprint = serde_json::from_str::<ExamBlueprint>(raw)?;
    blueprint.validate()?;
    Ok(blueprint)
}

pub fn playback_sample_source() -> AudioSourceDescriptor {
    AudioSourceDescriptor {
        uri: PLAYBACK_SAMPLE_URI.to_string(),
        label: "Sample clip".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamControllerConfig {
    pub blueprint: ExamBlueprint,
    pub hall_ticket: HallTicketInfo,
    pub playback_sample: AudioSourceDescriptor,
}

impl ExamControllerConfig {
    pub fn mvp_v1(blueprint: ExamBlueprint) -> Result<Self, ContractViolation> {
        Self::v1(
            blueprint,
            HallTicketInfo::sample_v1(),
            playback_sample_source(),
        )
    }

    pub fn v1(
        blueprint: ExamBlueprint,
        hall_ticket: HallTicketInfo,
        playback_sample: AudioSourceDescriptor,
    ) -> Result<Self, ContractViolation> {
        let config = Self {
            blueprint,
            hall_ticket,
            playback_sample,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn required_tests(&self) -> &BTreeSet<DeviceTestName> {
        &self.blueprint.required_tests
    }
}

impl Validate for ExamControllerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.blueprint.validate()?;
        self.hall_ticket.validate()?;
        self.playback_sample.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage() -> AudioSourceDescriptor {
        AudioSourceDescriptor::v1("asset://passage.mp3".to_string(), "Passage".to_string())
            .unwrap()
    }

    #[test]
    fn at_blueprint_01_presets_validate() {
        let timed = timed_writing_v1(DEFAULT_WRITING_SECS).unwrap();
        assert!(timed.back_enabled);
        assert!(!timed.has_listening());
        assert_eq!(timed.required_tests, DeviceTestName::full_set());

        let gated = listening_gate_v1(DEFAULT_LISTENING_SECS, passage()).unwrap();
        assert!(!gated.back_enabled);
        assert_eq!(gated.required_tests, DeviceTestName::audio_pair());
        let writing = &gated.phases[gated.position_of(ExamPhase::Writing).unwrap()];
        assert_eq!(writing.timer_seconds, None);
    }

    #[test]
    fn at_blueprint_02_zero_timer_is_rejected() {
        assert!(timed_writing_v1(0).is_err());
        assert!(listening_gate_v1(0, passage()).is_err());
    }

    #[test]
    fn at_blueprint_03_json_blueprint_is_validated_after_parse() {
        let raw = r#"{
            "schema_version": 1,
            "phases": [
                {"phase": "HALL_TICKET"},
                {"phase": "DEVICE_TEST"},
                {"phase": "WRITING"}
            ],
            "required_tests": ["KEYBOARD"]
        }"#;
        assert!(matches!(
            parse_blueprint_json(raw),
            Err(BlueprintLoadError::ContractViolation(_))
        ));
        assert!(matches!(
            parse_blueprint_json("{"),
            Err(BlueprintLoadError::Json(_))
        ));
    }

    #[test]
    fn at_blueprint_04_config_carries_sample_clip_and_hall_ticket() {
        let config = ExamControllerConfig::mvp_v1(timed_writing_v1(900).unwrap()).unwrap();
        assert_eq!(config.playback_sample.uri, PLAYBACK_SAMPLE_URI);
        assert_eq!(config.hall_ticket.roll_number, "EX2024001");
        assert_eq!(config.required_tests().len(), 3);
    }
}
