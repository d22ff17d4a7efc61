#![forbid(unsafe_code)]

use exam_kernel_contracts::audio::AudioSessionState;
use exam_kernel_contracts::device::{DeviceTestName, DeviceTestSnapshot, KeyboardPromptLanguage};
use exam_kernel_contracts::document::{Document, EditorView};
use exam_kernel_contracts::hall_ticket::HallTicketInfo;
use exam_kernel_contracts::phase::{ExamPhase, TimerState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionCause {
    TimeExpired,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallTicketView {
    pub hall_ticket: HallTicketInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTestView {
    pub required_tests: Vec<DeviceTestName>,
    pub results: DeviceTestSnapshot,
    pub all_passed: bool,
    pub playback: AudioSessionState,
    pub microphone_recording: bool,
    pub microphone_level: u8,
    pub keyboard_language: KeyboardPromptLanguage,
    pub keyboard_prompt: String,
    pub keyboard_typed_chars: usize,
    pub back_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningView {
    pub timer: TimerState,
    pub remaining_label: String,
    pub audio: AudioSessionState,
    pub editor: EditorView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingView {
    pub document: Document,
    pub editor: EditorView,
    pub timer: Option<TimerState>,
    pub remaining_label: Option<String>,
    /// Present only when the phase carries the free-standing player.
    pub audio: Option<AudioSessionState>,
    pub back_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndedView {
    pub document_title: String,
    pub plain_text_chars: usize,
    pub completed_by: Option<CompletionCause>,
    pub editor: EditorView,
}

/// Everything the shell needs to render the active phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseView {
    HallTicket(HallTicketView),
    DeviceTest(DeviceTestView),
    Listening(ListeningView),
    Writing(WritingView),
    Ended(EndedView),
}

impl PhaseView {
    pub fn phase(&self) -> ExamPhase {
        match self {
            PhaseView::HallTicket(_) => ExamPhase::HallTicket,
            PhaseView::DeviceTest(_) => ExamPhase::DeviceTest,
            PhaseView::Listening(_) => ExamPhase::Listening,
            PhaseView::Writing(_) => ExamPhase::Writing,
            PhaseView::Ended(_) => ExamPhase::Ended,
        }
    }
}
