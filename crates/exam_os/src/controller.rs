#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use exam_engines::audio_gate::{AudioGate, AudioGateError, AudioTransport, PlaybackStart};
use exam_engines::countdown::{CountdownTimer, FnObserver, TickOutcome};
use exam_engines::device_readiness::DeviceReadinessTracker;
use exam_engines::editor_lock::{self, format_clock, EditorSurface};
use exam_engines::export::{DocumentEncoder, DocumentExporter, ExportError, ZipDocxEncoder};
use exam_engines::microphone::{
    audio_level_percent, MicrophoneError, MicrophoneLease, MicrophoneSource,
};
use exam_kernel_contracts::audio::{
    AudioGateMode, AudioGateOptions, AudioSessionState, AudioSourceDescriptor, PlaybackRate,
};
use exam_kernel_contracts::device::{DeviceTestName, DeviceTestSnapshot, KeyboardPromptLanguage};
use exam_kernel_contracts::document::{
    validate_document_title, Document, EditorContent, EditorView, ExportArtifact,
    DEFAULT_DOCUMENT_TITLE,
};
use exam_kernel_contracts::notice::Notice;
use exam_kernel_contracts::phase::{
    EntryAction, ExamPhase, ExitAction, PhaseSpec, TimerDirective, TimerState, TimerToken,
};
use exam_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use exam_storage::document_store::DocumentStore;
use exam_storage::repo::DocumentRepo;

use crate::blueprint::ExamControllerConfig;
use crate::view::{
    CompletionCause, DeviceTestView, EndedView, HallTicketView, ListeningView, PhaseView,
    WritingView,
};

pub mod reason_codes {
    use exam_kernel_contracts::ReasonCodeId;

    // EXAM phase-controller reason-code namespace.
    pub const EXAM_OK_DEVICE_TEST_PASSED: ReasonCodeId = ReasonCodeId(0x4550_0001);
    pub const EXAM_OK_DOCUMENT_SAVED: ReasonCodeId = ReasonCodeId(0x4550_0002);
    pub const EXAM_OK_DOCUMENT_LOADED: ReasonCodeId = ReasonCodeId(0x4550_0003);
    pub const EXAM_OK_DOCUMENT_NEW: ReasonCodeId = ReasonCodeId(0x4550_0004);
    pub const EXAM_OK_EXPORTED: ReasonCodeId = ReasonCodeId(0x4550_0005);
    pub const EXAM_OK_SUBMITTED: ReasonCodeId = ReasonCodeId(0x4550_0006);

    pub const EXAM_INFO_MICROPHONE_RECORDING: ReasonCodeId = ReasonCodeId(0x4550_0011);
    pub const EXAM_INFO_TIME_EXPIRED: ReasonCodeId = ReasonCodeId(0x4550_0012);
    pub const EXAM_DOCUMENT_NOT_FOUND: ReasonCodeId = ReasonCodeId(0x4550_0013);

    pub const EXAM_DEVICE_TESTS_INCOMPLETE: ReasonCodeId = ReasonCodeId(0x4550_00F1);
    pub const EXAM_ADVANCE_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4550_00F2);
    pub const EXAM_BACK_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4550_00F3);
    pub const EXAM_SUBMIT_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4550_00F4);
    pub const EXAM_COMMAND_NOT_IN_PHASE: ReasonCodeId = ReasonCodeId(0x4550_00F5);
    pub const EXAM_PLAYBACK_FAILED: ReasonCodeId = ReasonCodeId(0x4550_00F6);
    pub const EXAM_LISTENING_AUTOPLAY_BLOCKED: ReasonCodeId = ReasonCodeId(0x4550_00F7);
    pub const EXAM_MICROPHONE_DENIED: ReasonCodeId = ReasonCodeId(0x4550_00F8);
    pub const EXAM_MICROPHONE_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4550_00F9);
    pub const EXAM_MICROPHONE_NOT_RECORDING: ReasonCodeId = ReasonCodeId(0x4550_00FA);
    pub const EXAM_DOCUMENT_LOCKED: ReasonCodeId = ReasonCodeId(0x4550_00FB);
    pub const EXAM_DOCUMENT_INVALID: ReasonCodeId = ReasonCodeId(0x4550_00FC);
    pub const EXAM_STORAGE_FAILED: ReasonCodeId = ReasonCodeId(0x4550_00FD);
    pub const EXAM_AUDIO_CONTROL_REFUSED: ReasonCodeId = ReasonCodeId(0x4550_00FE);
}

pub mod messages {
    pub const PLAYBACK_TEST_PASSED: &str =
        "ऑडिओ प्लेबॅक चाचणी यशस्वी! / Audio playback test successful!";
    pub const PLAYBACK_FAILED: &str = "ऑडिओ प्ले करू शकत नाही / Cannot play audio";
    pub const LISTENING_AUTOPLAY_BLOCKED: &str =
        "Audio did not start automatically. Press play to listen.";
    pub const MICROPHONE_RECORDING: &str = "बोला आणि मायक्रोफोन चाचणी करा / Speak to test microphone";
    pub const MICROPHONE_DENIED: &str = "मायक्रोफोन प्रवेश नाकारला / Microphone access denied";
    pub const MICROPHONE_UNAVAILABLE: &str = "मायक्रोफोन उपलब्ध नाही / Microphone not available";
    pub const MICROPHONE_TEST_PASSED: &str =
        "मायक्रोफोन चाचणी यशस्वी! / Microphone test successful!";
    pub const KEYBOARD_TEST_PASSED: &str = "कीबोर्ड चाचणी यशस्वी! / Keyboard test successful!";
    pub const TIME_EXPIRED: &str = "Time is up. Your answer has been recorded.";
    pub const SUBMITTED: &str = "Your answer has been submitted.";
    pub const DOCUMENT_LOCKED: &str = "The answer sheet is locked.";
    pub const DOCUMENT_SAVED: &str = "Document saved successfully!";
    pub const DOCUMENT_SAVE_FAILED: &str = "Document could not be saved.";
    pub const DOCUMENT_LOADED: &str = "Document loaded successfully!";
    pub const DOCUMENT_NOT_FOUND: &str = "No saved document found.";
    pub const DOCUMENT_LOAD_FAILED: &str = "Saved document could not be read.";
    pub const DOCUMENT_NEW: &str = "New document created!";
    pub const EXPORTED_TEXT: &str = "Document downloaded as text file!";
    pub const EXPORTED_DOCX: &str = "Document downloaded as Word file!";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Moved { from: ExamPhase, to: ExamPhase },
    /// The move exists but its gate is closed (device tests not all passed).
    Blocked { reason_code: ReasonCodeId },
    /// No such move from the current phase.
    Unavailable { reason_code: ReasonCodeId },
}

impl NavigationOutcome {
    pub fn reason_code(&self) -> Option<ReasonCodeId> {
        match self {
            Self::Moved { .. } => None,
            Self::Blocked { reason_code } | Self::Unavailable { reason_code } => {
                Some(*reason_code)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Refused { reason_code: ReasonCodeId },
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// The exam state machine. One instance per candidate session; all mutation goes through
/// `&mut self`, so hosts serialize clock ticks and shell commands by construction.
pub struct ExamController<T, M, S, E = ZipDocxEncoder>
where
    T: AudioTransport,
    M: MicrophoneSource,
    S: DocumentStore,
    E: DocumentEncoder,
{
    config: ExamControllerConfig,
    phase_index: usize,
    timer: CountdownTimer,
    phase_remaining: BTreeMap<ExamPhase, u32>,
    audio: AudioGate<T>,
    readiness: DeviceReadinessTracker,
    microphone: M,
    microphone_lease: Option<MicrophoneLease<M::Stream>>,
    microphone_level: u8,
    keyboard_language: KeyboardPromptLanguage,
    keyboard_text: String,
    document: Document,
    document_sealed: bool,
    editor_restore_pending: bool,
    completion: Option<CompletionCause>,
    store: S,
    exporter: DocumentExporter<E>,
    notices: Vec<Notice>,
    directives: Vec<TimerDirective>,
}

impl<T, M, S> ExamController<T, M, S, ZipDocxEncoder>
where
    T: AudioTransport,
    M: MicrophoneSource,
    S: DocumentStore,
{
    pub fn new(
        config: ExamControllerConfig,
        transport: T,
        microphone: M,
        store: S,
    ) -> Result<Self, ContractViolation> {
        Self::with_exporter(config, transport, microphone, store, DocumentExporter::new())
    }
}

impl<T, M, S, E> ExamController<T, M, S, E>
where
    T: AudioTransport,
    M: MicrophoneSource,
    S: DocumentStore,
    E: DocumentEncoder,
{
    pub fn with_exporter(
        config: ExamControllerConfig,
        transport: T,
        microphone: M,
        store: S,
        exporter: DocumentExporter<E>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        let mut controller = Self {
            config,
            phase_index: 0,
            timer: CountdownTimer::new(),
            phase_remaining: BTreeMap::new(),
            audio: AudioGate::new(transport),
            readiness: DeviceReadinessTracker::new(),
            microphone,
            microphone_lease: None,
            microphone_level: 0,
            keyboard_language: KeyboardPromptLanguage::default(),
            keyboard_text: String::new(),
            document: Document::untitled(),
            document_sealed: false,
            editor_restore_pending: false,
            completion: None,
            store,
            exporter,
            notices: Vec::new(),
            directives: Vec::new(),
        };
        controller.enter_current_phase();
        tracing::info!(
            phase = controller.phase().as_str(),
            phases = controller.config.blueprint.phases.len(),
            "exam session started"
        );
        Ok(controller)
    }

    pub fn phase(&self) -> ExamPhase {
        self.current_spec().phase
    }

    pub fn current_spec(&self) -> &PhaseSpec {
        &self.config.blueprint.phases[self.phase_index]
    }

    pub fn config(&self) -> &ExamControllerConfig {
        &self.config
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn live_timer_token(&self) -> Option<TimerToken> {
        self.timer.live_token()
    }

    pub fn audio_state(&self) -> AudioSessionState {
        self.audio.snapshot()
    }

    pub fn device_results(&self) -> DeviceTestSnapshot {
        self.readiness.snapshot()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn completion(&self) -> Option<CompletionCause> {
        self.completion
    }

    pub fn is_microphone_recording(&self) -> bool {
        self.microphone_lease.is_some()
    }

    pub fn microphone_source_mut(&mut self) -> &mut M {
        &mut self.microphone
    }

    pub fn audio_transport(&self) -> &T {
        self.audio.transport()
    }

    pub fn audio_transport_mut(&mut self) -> &mut T {
        self.audio.transport_mut()
    }

    pub fn pending_notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn drain_timer_directives(&mut self) -> Vec<TimerDirective> {
        std::mem::take(&mut self.directives)
    }

    // navigation

    pub fn advance(&mut self) -> NavigationOutcome {
        match self.phase() {
            ExamPhase::HallTicket => self.move_to(self.phase_index + 1),
            ExamPhase::DeviceTest => {
                if !self.readiness.all_passed(&self.config.blueprint.required_tests) {
                    tracing::debug!("advance refused: device tests incomplete");
                    return NavigationOutcome::Blocked {
                        reason_code: reason_codes::EXAM_DEVICE_TESTS_INCOMPLETE,
                    };
                }
                self.move_to(self.phase_index + 1)
            }
            ExamPhase::Listening | ExamPhase::Writing | ExamPhase::Ended => {
                NavigationOutcome::Unavailable {
                    reason_code: reason_codes::EXAM_ADVANCE_UNAVAILABLE,
                }
            }
        }
    }

    pub fn back_available(&self) -> bool {
        self.back_target().is_some()
    }

    pub fn back(&mut self) -> NavigationOutcome {
        match self.back_target() {
            Some(index) => self.move_to(index),
            None => NavigationOutcome::Unavailable {
                reason_code: reason_codes::EXAM_BACK_UNAVAILABLE,
            },
        }
    }

    pub fn submit(&mut self) -> NavigationOutcome {
        if self.phase() != ExamPhase::Writing {
            return NavigationOutcome::Unavailable {
                reason_code: reason_codes::EXAM_SUBMIT_UNAVAILABLE,
            };
        }
        self.complete(CompletionCause::Submitted)
    }

    /// Feeds one second of wall clock to the live countdown. Ticks for any other token are
    /// ignored and reported as `Stale`.
    pub fn on_clock_tick(&mut self, token: TimerToken) -> TickOutcome {
        let mut remaining = None;
        let mut expired = false;
        let outcome = self.timer.tick(
            token,
            &mut FnObserver {
                on_tick: |secs: u32| remaining = Some(secs),
                on_expire: || expired = true,
            },
        );
        if outcome == TickOutcome::Stale {
            tracing::debug!(
                generation = token.generation,
                phase = token.phase.as_str(),
                "stale timer tick ignored"
            );
            return outcome;
        }
        if let Some(secs) = remaining {
            self.phase_remaining.insert(token.phase, secs);
        }
        if expired {
            self.on_phase_expired(token.phase);
        }
        outcome
    }

    fn back_target(&self) -> Option<usize> {
        if !self.config.blueprint.back_enabled || self.phase().is_terminal() {
            return None;
        }
        let previous = self.phase_index.checked_sub(1)?;
        match self.config.blueprint.phases.get(previous)?.phase {
            ExamPhase::HallTicket | ExamPhase::DeviceTest => Some(previous),
            ExamPhase::Listening | ExamPhase::Writing | ExamPhase::Ended => None,
        }
    }

    fn on_phase_expired(&mut self, phase: ExamPhase) {
        if phase != self.phase() {
            return;
        }
        tracing::info!(phase = phase.as_str(), "phase timer expired");
        match phase {
            ExamPhase::Writing => {
                self.complete(CompletionCause::TimeExpired);
            }
            _ => {
                self.move_to(self.phase_index + 1);
            }
        }
    }

    fn complete(&mut self, cause: CompletionCause) -> NavigationOutcome {
        let Some(ended) = self.config.blueprint.position_of(ExamPhase::Ended) else {
            return NavigationOutcome::Unavailable {
                reason_code: reason_codes::EXAM_SUBMIT_UNAVAILABLE,
            };
        };
        let first = self.completion.is_none();
        if first {
            self.completion = Some(cause);
        }
        let outcome = self.move_to(ended);
        if first {
            self.notices.push(match cause {
                CompletionCause::TimeExpired => {
                    Notice::info(reason_codes::EXAM_INFO_TIME_EXPIRED, messages::TIME_EXPIRED)
                }
                CompletionCause::Submitted => {
                    Notice::success(reason_codes::EXAM_OK_SUBMITTED, messages::SUBMITTED)
                }
            });
        }
        outcome
    }

    fn move_to(&mut self, next_index: usize) -> NavigationOutcome {
        if next_index >= self.config.blueprint.phases.len() {
            return NavigationOutcome::Unavailable {
                reason_code: reason_codes::EXAM_ADVANCE_UNAVAILABLE,
            };
        }
        let from = self.phase();
        self.transition_to(next_index);
        NavigationOutcome::Moved {
            from,
            to: self.phase(),
        }
    }

    /// Exit action, timer cancel, phase swap, entry action, timer start. Nothing observes a
    /// state in between.
    fn transition_to(&mut self, next_index: usize) {
        let outgoing = self.current_spec().clone();
        let from = outgoing.phase;

        self.run_exit_action(outgoing.exit_action);
        let cancelled = match outgoing.exit_action {
            ExitAction::ForcePauseAudio => self.timer.stop_and_zero(),
            _ => self.timer.stop(),
        };
        if outgoing.timer_seconds.is_some() {
            self.phase_remaining
                .insert(from, self.timer.state().remaining_secs);
        }
        if let Some(token) = cancelled {
            tracing::debug!(
                generation = token.generation,
                phase = from.as_str(),
                "phase timer cancelled"
            );
            self.directives.push(TimerDirective::Cancel { token });
        }

        // Nothing the outgoing phase holds survives it, whatever its exit action names.
        self.release_microphone();
        if self.audio.owner() == Some(from) {
            if let Err(err) = self.audio.release(from) {
                tracing::warn!(error = %err, "audio gate release failed");
            }
        }

        self.phase_index = next_index;
        self.enter_current_phase();
        tracing::info!(
            from = from.as_str(),
            to = self.phase().as_str(),
            "exam phase transition"
        );
    }

    fn run_exit_action(&mut self, action: ExitAction) {
        match action {
            ExitAction::None => {}
            ExitAction::ForcePauseAudio => self.audio.force_pause(),
            ExitAction::ReleaseDevices => self.release_microphone(),
            ExitAction::ReleaseAudio => self.audio.pause(),
        }
    }

    fn enter_current_phase(&mut self) {
        let spec = self.current_spec().clone();
        match spec.entry_action {
            EntryAction::None => {}
            EntryAction::StartListeningAudio => self.start_listening_audio(),
            EntryAction::AttachFreePlayer => {
                if let Err(err) = self.audio.acquire(spec.phase, AudioGateMode::FreePlayer) {
                    tracing::warn!(error = %err, "free player could not be attached");
                }
            }
            EntryAction::SealDocument => {
                self.document_sealed = true;
                tracing::info!(title = %self.document.title, "document sealed");
            }
        }
        // A freshly mounted editor starts empty.
        if spec.phase == ExamPhase::Writing {
            self.editor_restore_pending = true;
        }
        if let Some(total) = spec.timer_seconds {
            let seconds = self
                .phase_remaining
                .get(&spec.phase)
                .copied()
                .unwrap_or(total);
            let token = self.timer.start(spec.phase, seconds);
            tracing::debug!(
                generation = token.generation,
                phase = spec.phase.as_str(),
                seconds,
                "phase timer started"
            );
            self.directives.push(TimerDirective::Start { token, seconds });
        }
    }

    fn start_listening_audio(&mut self) {
        let Some(source) = self.config.blueprint.listening_source.clone() else {
            tracing::warn!("listening phase entered without a source");
            return;
        };
        if let Err(err) = self
            .audio
            .acquire(ExamPhase::Listening, AudioGateMode::GatedListening)
        {
            tracing::warn!(error = %err, "listening gate could not be acquired");
            return;
        }
        let options = AudioGateOptions {
            looped: false,
            autoplay: true,
        };
        match self.audio.configure(source, options) {
            Ok(PlaybackStart::Started) => tracing::info!("listening audio started"),
            Ok(PlaybackStart::NotRequested) => {}
            Ok(PlaybackStart::Rejected(err)) => {
                tracing::warn!(error = %err, "listening autoplay rejected");
                self.notices.push(Notice::error(
                    reason_codes::EXAM_LISTENING_AUTOPLAY_BLOCKED,
                    messages::LISTENING_AUTOPLAY_BLOCKED,
                ));
            }
            Err(err) => {
                tracing::warn!(error = %err, "listening source could not be loaded");
                self.notices.push(Notice::error(
                    reason_codes::EXAM_PLAYBACK_FAILED,
                    messages::PLAYBACK_FAILED,
                ));
            }
        }
    }

    // device tests

    pub fn run_playback_test(&mut self) -> CommandOutcome {
        if let Some(refused) = self.phase_refusal(ExamPhase::DeviceTest) {
            return refused;
        }
        if self.audio.owner() != Some(ExamPhase::DeviceTest) {
            if let Err(err) = self
                .audio
                .acquire(ExamPhase::DeviceTest, AudioGateMode::FreePlayer)
            {
                return self.playback_test_failed(&err.to_string());
            }
        }
        let sample = self.config.playback_sample.clone();
        let options = AudioGateOptions {
            looped: false,
            autoplay: true,
        };
        match self.audio.configure(sample, options) {
            Ok(PlaybackStart::Started) => {
                self.readiness
                    .record_result(DeviceTestName::Playback, true);
                self.notices.push(Notice::success(
                    reason_codes::EXAM_OK_DEVICE_TEST_PASSED,
                    messages::PLAYBACK_TEST_PASSED,
                ));
                CommandOutcome::Applied
            }
            Ok(PlaybackStart::Rejected(err)) => self.playback_test_failed(&err.to_string()),
            Ok(PlaybackStart::NotRequested) => self.playback_test_failed("playback not started"),
            Err(err) => self.playback_test_failed(&err.to_string()),
        }
    }

    fn playback_test_failed(&mut self, detail: &str) -> CommandOutcome {
        tracing::warn!(detail, "playback test failed");
        self.notices.push(Notice::error(
            reason_codes::EXAM_PLAYBACK_FAILED,
            messages::PLAYBACK_FAILED,
        ));
        CommandOutcome::Refused {
            reason_code: reason_codes::EXAM_PLAYBACK_FAILED,
        }
    }

    pub fn start_microphone_test(&mut self) -> CommandOutcome {
        if let Some(refused) = self.phase_refusal(ExamPhase::DeviceTest) {
            return refused;
        }
        if self.microphone_lease.is_some() {
            return CommandOutcome::Applied;
        }
        match MicrophoneLease::acquire(&mut self.microphone) {
            Ok(lease) => {
                self.microphone_lease = Some(lease);
                self.microphone_level = 0;
                self.notices.push(Notice::info(
                    reason_codes::EXAM_INFO_MICROPHONE_RECORDING,
                    messages::MICROPHONE_RECORDING,
                ));
                CommandOutcome::Applied
            }
            Err(err) => {
                tracing::warn!(error = %err, "microphone test could not start");
                let (reason_code, message) = match err {
                    MicrophoneError::PermissionDenied => (
                        reason_codes::EXAM_MICROPHONE_DENIED,
                        messages::MICROPHONE_DENIED,
                    ),
                    MicrophoneError::DeviceUnavailable(_) => (
                        reason_codes::EXAM_MICROPHONE_UNAVAILABLE,
                        messages::MICROPHONE_UNAVAILABLE,
                    ),
                };
                self.notices.push(Notice::error(reason_code, message));
                CommandOutcome::Refused { reason_code }
            }
        }
    }

    /// Ends the recording, hands the device back and counts the test as passed.
    pub fn stop_microphone_test(&mut self) -> CommandOutcome {
        if let Some(refused) = self.phase_refusal(ExamPhase::DeviceTest) {
            return refused;
        }
        let Some(lease) = self.microphone_lease.take() else {
            return CommandOutcome::Refused {
                reason_code: reason_codes::EXAM_MICROPHONE_NOT_RECORDING,
            };
        };
        lease.release();
        self.microphone_level = 0;
        self.readiness
            .record_result(DeviceTestName::Microphone, true);
        self.notices.push(Notice::success(
            reason_codes::EXAM_OK_DEVICE_TEST_PASSED,
            messages::MICROPHONE_TEST_PASSED,
        ));
        CommandOutcome::Applied
    }

    /// Level meter input while recording; `None` when no recording is live.
    pub fn sample_microphone_level(&mut self, samples: &[u8]) -> Option<u8> {
        self.microphone_lease.as_ref()?;
        self.microphone_level = audio_level_percent(samples);
        Some(self.microphone_level)
    }

    pub fn select_keyboard_language(&mut self, language: KeyboardPromptLanguage) -> CommandOutcome {
        if let Some(refused) = self.phase_refusal(ExamPhase::DeviceTest) {
            return refused;
        }
        self.keyboard_language = language;
        CommandOutcome::Applied
    }

    pub fn update_keyboard_text(&mut self, text: String) -> CommandOutcome {
        if let Some(refused) = self.phase_refusal(ExamPhase::DeviceTest) {
            return refused;
        }
        if self.readiness.record_keyboard_input(&text) {
            self.notices.push(Notice::success(
                reason_codes::EXAM_OK_DEVICE_TEST_PASSED,
                messages::KEYBOARD_TEST_PASSED,
            ));
        }
        self.keyboard_text = text;
        CommandOutcome::Applied
    }

    fn release_microphone(&mut self) {
        if let Some(lease) = self.microphone_lease.take() {
            lease.release();
        }
        self.microphone_level = 0;
    }

    fn phase_refusal(&self, expected: ExamPhase) -> Option<CommandOutcome> {
        if self.phase() == expected {
            return None;
        }
        Some(CommandOutcome::Refused {
            reason_code: reason_codes::EXAM_COMMAND_NOT_IN_PHASE,
        })
    }

    // audio controls

    pub fn play_audio(&mut self) -> Result<AudioSessionState, AudioGateError> {
        if let Err(err) = self.audio.play() {
            if matches!(err, AudioGateError::Playback(_)) {
                self.notices.push(Notice::error(
                    reason_codes::EXAM_PLAYBACK_FAILED,
                    messages::PLAYBACK_FAILED,
                ));
            }
            return Err(err);
        }
        Ok(self.audio.snapshot())
    }

    pub fn pause_audio(&mut self) -> AudioSessionState {
        self.audio.pause();
        self.audio.snapshot()
    }

    pub fn skip_audio_back(&mut self) -> Result<AudioSessionState, AudioGateError> {
        self.audio.skip_back()?;
        Ok(self.audio.snapshot())
    }

    pub fn skip_audio_forward(&mut self) -> Result<AudioSessionState, AudioGateError> {
        self.audio.skip_forward()?;
        Ok(self.audio.snapshot())
    }

    pub fn seek_audio_to(&mut self, secs: f64) -> Result<AudioSessionState, AudioGateError> {
        self.audio.seek_to(secs)?;
        Ok(self.audio.snapshot())
    }

    pub fn set_playback_rate(&mut self, multiplier: u8) -> Result<PlaybackRate, AudioGateError> {
        self.audio.set_rate(multiplier)
    }

    pub fn set_audio_volume(&mut self, volume: f64) -> Result<f64, AudioGateError> {
        self.audio.set_volume(volume)
    }

    /// Loads a candidate-chosen file into the free-standing player without starting it.
    pub fn load_player_source(
        &mut self,
        source: AudioSourceDescriptor,
    ) -> Result<AudioSessionState, AudioGateError> {
        match self.audio.mode() {
            Some(AudioGateMode::FreePlayer) => {}
            Some(mode) => return Err(AudioGateError::WrongMode { mode }),
            None => return Err(AudioGateError::NotOwned),
        }
        self.audio.configure(source, AudioGateOptions::default())?;
        Ok(self.audio.snapshot())
    }

    pub fn report_playback_ended(&mut self) {
        self.audio.mark_ended();
    }

    pub fn report_playback_failure(&mut self, detail: &str) {
        tracing::warn!(detail, "shell reported playback failure");
        self.audio.force_pause();
        self.notices.push(Notice::error(
            reason_codes::EXAM_PLAYBACK_FAILED,
            messages::PLAYBACK_FAILED,
        ));
    }

    pub fn elapse_audio(&mut self, secs: f64) {
        self.audio.elapse(secs);
    }

    // document

    pub fn set_title(&mut self, title: String) -> CommandOutcome {
        if let Some(refused) = self.document_refusal() {
            return refused;
        }
        if let Err(violation) = validate_document_title(&title) {
            tracing::debug!(%violation, "title rejected");
            return CommandOutcome::Refused {
                reason_code: reason_codes::EXAM_DOCUMENT_INVALID,
            };
        }
        self.document.title = title;
        CommandOutcome::Applied
    }

    pub fn set_body(&mut self, markup: String, plain_text: String) -> CommandOutcome {
        if let Some(refused) = self.document_refusal() {
            return refused;
        }
        match EditorContent::v1(markup, plain_text) {
            Ok(body) => {
                self.document.body = body;
                CommandOutcome::Applied
            }
            Err(violation) => {
                tracing::debug!(%violation, "body rejected");
                CommandOutcome::Refused {
                    reason_code: reason_codes::EXAM_DOCUMENT_INVALID,
                }
            }
        }
    }

    pub fn new_document(&mut self) -> CommandOutcome {
        if let Some(refused) = self.document_refusal() {
            return refused;
        }
        self.document = Document::untitled();
        self.editor_restore_pending = true;
        self.notices.push(Notice::success(
            reason_codes::EXAM_OK_DOCUMENT_NEW,
            messages::DOCUMENT_NEW,
        ));
        CommandOutcome::Applied
    }

    /// Allowed while writing and after the exam ends; the saved copy never feeds back into a
    /// sealed document.
    pub fn save_document(&mut self) -> CommandOutcome {
        if !matches!(self.phase(), ExamPhase::Writing | ExamPhase::Ended) {
            return CommandOutcome::Refused {
                reason_code: reason_codes::EXAM_COMMAND_NOT_IN_PHASE,
            };
        }
        match self.store.save_document_row(&self.document) {
            Ok(()) => {
                self.notices.push(Notice::success(
                    reason_codes::EXAM_OK_DOCUMENT_SAVED,
                    messages::DOCUMENT_SAVED,
                ));
                CommandOutcome::Applied
            }
            Err(err) => {
                tracing::warn!(error = %err, "document save failed");
                self.notices.push(Notice::error(
                    reason_codes::EXAM_STORAGE_FAILED,
                    messages::DOCUMENT_SAVE_FAILED,
                ));
                CommandOutcome::Refused {
                    reason_code: reason_codes::EXAM_STORAGE_FAILED,
                }
            }
        }
    }

    pub fn load_document(&mut self) -> CommandOutcome {
        if let Some(refused) = self.document_refusal() {
            return refused;
        }
        match self.store.load_document_row() {
            Ok(Some(saved)) => {
                self.document.body = saved.body;
                self.document.title = saved
                    .title
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_TITLE.to_string());
                self.editor_restore_pending = true;
                self.notices.push(Notice::success(
                    reason_codes::EXAM_OK_DOCUMENT_LOADED,
                    messages::DOCUMENT_LOADED,
                ));
                CommandOutcome::Applied
            }
            Ok(None) => {
                self.notices.push(Notice::info(
                    reason_codes::EXAM_DOCUMENT_NOT_FOUND,
                    messages::DOCUMENT_NOT_FOUND,
                ));
                CommandOutcome::Refused {
                    reason_code: reason_codes::EXAM_DOCUMENT_NOT_FOUND,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "document load failed");
                self.notices.push(Notice::error(
                    reason_codes::EXAM_STORAGE_FAILED,
                    messages::DOCUMENT_LOAD_FAILED,
                ));
                CommandOutcome::Refused {
                    reason_code: reason_codes::EXAM_STORAGE_FAILED,
                }
            }
        }
    }

    pub fn export_text(&mut self) -> Result<ExportArtifact, ExportError> {
        let result = self
            .exporter
            .export_as_text(&self.document.title, &self.document.body.plain_text);
        self.report_export(result, messages::EXPORTED_TEXT)
    }

    pub fn export_docx(&mut self) -> Result<ExportArtifact, ExportError> {
        let result = self
            .exporter
            .export_as_docx(&self.document.title, &self.document.body.plain_text);
        self.report_export(result, messages::EXPORTED_DOCX)
    }

    fn report_export(
        &mut self,
        result: Result<ExportArtifact, ExportError>,
        success_message: &str,
    ) -> Result<ExportArtifact, ExportError> {
        match &result {
            Ok(_) => self.notices.push(Notice::success(
                reason_codes::EXAM_OK_EXPORTED,
                success_message,
            )),
            Err(err) => self
                .notices
                .push(Notice::error(err.reason_code(), err.user_message())),
        }
        result
    }

    fn document_refusal(&mut self) -> Option<CommandOutcome> {
        if self.phase() == ExamPhase::Writing && !self.document_sealed {
            return None;
        }
        tracing::debug!(phase = self.phase().as_str(), "document mutation refused");
        self.notices.push(Notice::error(
            reason_codes::EXAM_DOCUMENT_LOCKED,
            messages::DOCUMENT_LOCKED,
        ));
        Some(CommandOutcome::Refused {
            reason_code: reason_codes::EXAM_DOCUMENT_LOCKED,
        })
    }

    // presentation

    pub fn editor_view(&self) -> EditorView {
        let phase = self.phase();
        let listening_remaining =
            (phase == ExamPhase::Listening).then(|| self.timer.state().remaining_secs);
        editor_lock::editor_view(phase, listening_remaining)
    }

    /// Pushes the lock state into the shell's editor. The controller's copy replaces the
    /// surface content only once after the editor mounts, a load or a new document; text the
    /// candidate typed in between is never overwritten.
    pub fn sync_editor<U>(&mut self, surface: &mut U)
    where
        U: EditorSurface + ?Sized,
    {
        let view = self.editor_view();
        if view.editable && self.editor_restore_pending {
            if surface.plain_text() != self.document.body.plain_text {
                surface.set_value(&self.document.body.markup);
            }
            self.editor_restore_pending = false;
        }
        editor_lock::apply_editor_view(surface, &view);
    }

    pub fn view(&self) -> PhaseView {
        let back_enabled = self.back_available();
        match self.phase() {
            ExamPhase::HallTicket => PhaseView::HallTicket(HallTicketView {
                hall_ticket: self.config.hall_ticket.clone(),
            }),
            ExamPhase::DeviceTest => PhaseView::DeviceTest(DeviceTestView {
                required_tests: self
                    .config
                    .blueprint
                    .required_tests
                    .iter()
                    .copied()
                    .collect(),
                results: self.readiness.snapshot(),
                all_passed: self
                    .readiness
                    .all_passed(&self.config.blueprint.required_tests),
                playback: self.audio.snapshot(),
                microphone_recording: self.microphone_lease.is_some(),
                microphone_level: self.microphone_level,
                keyboard_language: self.keyboard_language,
                keyboard_prompt: self.keyboard_language.prompt_text().to_string(),
                keyboard_typed_chars: self.keyboard_text.chars().count(),
                back_enabled,
            }),
            ExamPhase::Listening => {
                let timer = self.timer.state();
                PhaseView::Listening(ListeningView {
                    timer,
                    remaining_label: format_clock(timer.remaining_secs),
                    audio: self.audio.snapshot(),
                    editor: self.editor_view(),
                })
            }
            ExamPhase::Writing => {
                let timer = self
                    .current_spec()
                    .timer_seconds
                    .map(|_| self.timer.state());
                PhaseView::Writing(WritingView {
                    document: self.document.clone(),
                    editor: self.editor_view(),
                    timer,
                    remaining_label: timer.map(|t| format_clock(t.remaining_secs)),
                    audio: (self.audio.owner() == Some(ExamPhase::Writing))
                        .then(|| self.audio.snapshot()),
                    back_enabled,
                })
            }
            ExamPhase::Ended => PhaseView::Ended(EndedView {
                document_title: self.document.title.clone(),
                plain_text_chars: self.document.body.plain_text.chars().count(),
                completed_by: self.completion,
                editor: self.editor_view(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{listening_gate_v1, timed_writing_v1};
    use exam_engines::audio_gate::VirtualAudioTransport;
    use exam_engines::microphone::ShellMicrophoneSource;
    use exam_storage::document_store::InMemoryDocumentStore;

    type TestController =
        ExamController<VirtualAudioTransport, ShellMicrophoneSource, InMemoryDocumentStore>;

    fn timed(writing_secs: u32) -> TestController {
        let config = ExamControllerConfig::mvp_v1(timed_writing_v1(writing_secs).unwrap()).unwrap();
        ExamController::new(
            config,
            VirtualAudioTransport::new(Some(30.0)),
            ShellMicrophoneSource::new(),
            InMemoryDocumentStore::new(),
        )
        .unwrap()
    }

    fn pass_all_tests(c: &mut TestController) {
        assert!(c.run_playback_test().is_applied());
        assert!(c.start_microphone_test().is_applied());
        assert!(c.stop_microphone_test().is_applied());
        c.update_keyboard_text("typing test".to_string());
    }

    fn live_token(c: &TestController) -> TimerToken {
        c.live_timer_token().unwrap()
    }

    #[test]
    fn at_exam_ctrl_01_back_keeps_writing_clock_and_device_results() {
        let mut c = timed(120);
        c.advance();
        pass_all_tests(&mut c);
        assert_eq!(
            c.advance(),
            NavigationOutcome::Moved {
                from: ExamPhase::DeviceTest,
                to: ExamPhase::Writing
            }
        );
        let token = live_token(&c);
        for _ in 0..20 {
            c.on_clock_tick(token);
        }
        assert_eq!(c.timer_state().remaining_secs, 100);

        assert!(matches!(c.back(), NavigationOutcome::Moved { .. }));
        assert_eq!(c.phase(), ExamPhase::DeviceTest);
        assert!(c.live_timer_token().is_none());
        assert_eq!(c.on_clock_tick(token), TickOutcome::Stale);

        assert!(matches!(c.advance(), NavigationOutcome::Moved { .. }));
        assert_eq!(c.timer_state().remaining_secs, 100);
        assert_ne!(live_token(&c), token);
    }

    #[test]
    fn at_exam_ctrl_02_directives_pair_start_and_cancel() {
        let mut c = timed(60);
        assert!(c.drain_timer_directives().is_empty());
        c.advance();
        pass_all_tests(&mut c);
        c.advance();
        let started = c.drain_timer_directives();
        assert_eq!(started.len(), 1);
        let TimerDirective::Start { token, seconds } = started[0] else {
            panic!("expected a start directive");
        };
        assert_eq!(seconds, 60);
        c.submit();
        assert_eq!(
            c.drain_timer_directives(),
            vec![TimerDirective::Cancel { token }]
        );
    }

    #[test]
    fn at_exam_ctrl_03_leaving_device_test_releases_microphone() {
        let mut c = timed(60);
        c.advance();
        pass_all_tests(&mut c);
        assert!(c.start_microphone_test().is_applied());
        assert_eq!(c.microphone_source_mut().open_streams(), 1);
        c.advance();
        assert!(!c.is_microphone_recording());
        assert_eq!(c.microphone_source_mut().open_streams(), 0);
        assert_eq!(c.audio_state().mode, Some(AudioGateMode::FreePlayer));
    }

    #[test]
    fn at_exam_ctrl_04_level_meter_only_while_recording() {
        let mut c = timed(60);
        c.advance();
        assert_eq!(c.sample_microphone_level(&[200, 56]), None);
        c.start_microphone_test();
        assert_eq!(c.sample_microphone_level(&[200, 56]), Some(100));
        assert_eq!(c.sample_microphone_level(&[138, 118]), Some(20));
        c.stop_microphone_test();
        assert_eq!(c.sample_microphone_level(&[138]), None);
    }

    #[test]
    fn at_exam_ctrl_05_listening_entry_autoplays_and_rate_is_gated() {
        let source = AudioSourceDescriptor::v1(
            "asset://passage.mp3".to_string(),
            "Passage".to_string(),
        )
        .unwrap();
        let config =
            ExamControllerConfig::mvp_v1(listening_gate_v1(30, source).unwrap()).unwrap();
        let mut c: TestController = ExamController::new(
            config,
            VirtualAudioTransport::new(Some(120.0)),
            ShellMicrophoneSource::new(),
            InMemoryDocumentStore::new(),
        )
        .unwrap();
        c.advance();
        c.run_playback_test();
        c.start_microphone_test();
        c.stop_microphone_test();
        assert!(matches!(c.advance(), NavigationOutcome::Moved { .. }));
        assert_eq!(c.phase(), ExamPhase::Listening);
        assert!(c.audio_state().is_playing);
        assert_eq!(c.set_playback_rate(2).unwrap(), PlaybackRate::X2);
        assert!(c.set_audio_volume(0.5).is_err());
        assert_eq!(
            c.back(),
            NavigationOutcome::Unavailable {
                reason_code: reason_codes::EXAM_BACK_UNAVAILABLE
            }
        );
        assert_eq!(
            c.advance(),
            NavigationOutcome::Unavailable {
                reason_code: reason_codes::EXAM_ADVANCE_UNAVAILABLE
            }
        );
    }

    #[test]
    fn at_exam_ctrl_06_view_tracks_phase() {
        let mut c = timed(90);
        assert_eq!(c.view().phase(), ExamPhase::HallTicket);
        c.advance();
        let PhaseView::DeviceTest(device) = c.view() else {
            panic!("expected device-test view");
        };
        assert_eq!(device.required_tests.len(), 3);
        assert!(!device.all_passed);
        assert!(device.back_enabled);
        pass_all_tests(&mut c);
        c.advance();
        let PhaseView::Writing(writing) = c.view() else {
            panic!("expected writing view");
        };
        assert!(writing.editor.editable);
        assert_eq!(writing.remaining_label.as_deref(), Some("1:30"));
        assert!(writing.audio.is_some());
    }
}
