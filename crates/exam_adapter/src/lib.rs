#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use exam_engines::audio_gate::{AudioGateError, VirtualAudioTransport};
use exam_engines::countdown::TickOutcome;
use exam_engines::editor_lock::EditorSurface;
use exam_engines::microphone::{MicrophonePermission, ShellMicrophoneSource};
use exam_kernel_contracts::audio::AudioSourceDescriptor;
use exam_kernel_contracts::device::KeyboardPromptLanguage;
use exam_kernel_contracts::document::{ExportArtifact, ExportFormat};
use exam_kernel_contracts::notice::Notice;
use exam_kernel_contracts::phase::{ExamBlueprint, ExamPhase, TimerDirective, TimerToken};
use exam_kernel_contracts::ReasonCodeId;
use exam_os::blueprint::{
    listening_gate_v1, parse_blueprint_json, timed_writing_v1, ExamControllerConfig,
    DEFAULT_LISTENING_SECS, DEFAULT_WRITING_SECS,
};
use exam_os::controller::{
    reason_codes as exam_reason_codes, CommandOutcome, ExamController, NavigationOutcome,
};
use exam_os::view::PhaseView;
use exam_storage::document_store::{DocumentStore, FileDocumentStore, InMemoryDocumentStore};
use tokio::task::JoinHandle;

pub mod reason_codes {
    use exam_kernel_contracts::ReasonCodeId;

    pub const ADAPTER_RUNTIME_POISONED: ReasonCodeId = ReasonCodeId(0xAD70_00F1);
    pub const ADAPTER_REQUEST_INVALID: ReasonCodeId = ReasonCodeId(0xAD70_00F2);
}

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const LISTENING_PASSAGE_URI: &str = "asset://listening/passage.mp3";

const RUNTIME_POISONED: &str = "exam runtime lock poisoned";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueprintPreset {
    TimedWriting,
    ListeningGate,
}

impl BlueprintPreset {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "timed_writing" => Some(Self::TimedWriting),
            "listening_gate" => Some(Self::ListeningGate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: String,
    pub blueprint_path: Option<PathBuf>,
    pub preset: BlueprintPreset,
    pub writing_secs: u32,
    pub listening_secs: u32,
    pub document_store_path: Option<PathBuf>,
    pub tick_interval_ms: u64,
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Out-of-range or unparsable values fall back to their defaults.
    pub fn from_env_var_map<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            bind: non_empty("EXAM_HTTP_BIND").unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string()),
            blueprint_path: non_empty("EXAM_BLUEPRINT_PATH").map(PathBuf::from),
            preset: non_empty("EXAM_BLUEPRINT_PRESET")
                .and_then(|v| BlueprintPreset::parse(&v))
                .unwrap_or(BlueprintPreset::TimedWriting),
            writing_secs: non_empty("EXAM_WRITING_SECONDS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| (60..=14_400).contains(v))
                .unwrap_or(DEFAULT_WRITING_SECS),
            listening_secs: non_empty("EXAM_LISTENING_SECONDS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| (1..=3_600).contains(v))
                .unwrap_or(DEFAULT_LISTENING_SECS),
            document_store_path: non_empty("EXAM_DOCUMENT_STORE_PATH").map(PathBuf::from),
            tick_interval_ms: non_empty("EXAM_TICK_INTERVAL_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| (100..=60_000).contains(v))
                .unwrap_or(DEFAULT_TICK_INTERVAL_MS),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        self.bind
            .parse()
            .map_err(|err| format!("invalid EXAM_HTTP_BIND '{}': {err}", self.bind))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn blueprint(&self) -> Result<ExamBlueprint, String> {
        if let Some(path) = &self.blueprint_path {
            let raw = fs::read_to_string(path).map_err(|err| {
                format!("failed to read blueprint '{}': {err}", path.display())
            })?;
            return parse_blueprint_json(&raw)
                .map_err(|err| format!("blueprint '{}' rejected: {err}", path.display()));
        }
        let blueprint = match self.preset {
            BlueprintPreset::TimedWriting => timed_writing_v1(self.writing_secs),
            BlueprintPreset::ListeningGate => {
                let source = AudioSourceDescriptor::v1(
                    LISTENING_PASSAGE_URI.to_string(),
                    "Listening passage".to_string(),
                )
                .map_err(|v| v.to_string())?;
                listening_gate_v1(self.listening_secs, source)
            }
        };
        blueprint.map_err(|v| format!("preset blueprint rejected: {v}"))
    }

    pub fn document_store(&self) -> Box<dyn DocumentStore + Send> {
        match &self.document_store_path {
            Some(path) => Box::new(FileDocumentStore::for_path(path.clone())),
            None => Box::new(InMemoryDocumentStore::new()),
        }
    }
}

pub type AdapterExamController =
    ExamController<VirtualAudioTransport, ShellMicrophoneSource, Box<dyn DocumentStore + Send>>;

/// Shell commands accepted over HTTP. Each maps onto one controller operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExamCommand {
    Advance,
    Back,
    Submit,
    PlaybackTest(PlaybackTestRequest),
    MicrophoneStart(MicrophoneStartRequest),
    MicrophoneStop,
    MicrophoneLevel(MicrophoneLevelRequest),
    Keyboard(KeyboardRequest),
    AudioPlay,
    AudioPause,
    AudioSeek(SeekRequest),
    AudioRate(RateRequest),
    AudioVolume(VolumeRequest),
    AudioSource(SourceRequest),
    AudioEnded,
    AudioFailed(PlaybackFailureRequest),
    SetTitle(TitleRequest),
    SetBody(BodyRequest),
    NewDocument,
    SaveDocument,
    LoadDocument,
}

/// The shell's report of whether its media element refused to start the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct PlaybackTestRequest {
    #[serde(default)]
    pub playback_blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShellMicrophonePermission {
    #[default]
    Granted,
    Denied,
    Unavailable,
}

impl From<ShellMicrophonePermission> for MicrophonePermission {
    fn from(value: ShellMicrophonePermission) -> Self {
        match value {
            ShellMicrophonePermission::Granted => MicrophonePermission::Granted,
            ShellMicrophonePermission::Denied => MicrophonePermission::Denied,
            ShellMicrophonePermission::Unavailable => MicrophonePermission::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MicrophoneStartRequest {
    #[serde(default)]
    pub permission: ShellMicrophonePermission,
}

/// Unsigned 8-bit time-domain samples, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MicrophoneLevelRequest {
    pub samples_base64: String,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeekRequest {
    Back,
    Forward,
    To { position_secs: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RateRequest {
    pub multiplier: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VolumeRequest {
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceRequest {
    pub uri: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct PlaybackFailureRequest {
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct KeyboardRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BodyRequest {
    pub markup: String,
    pub plain_text: String,
}

/// What the shell must do to its editor after a command.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EditorSyncDirective {
    pub read_only: bool,
    pub toolbar_visible: bool,
    /// Set only after the editor mounts, a load or a new document.
    pub restore_markup: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExamCommandResponse {
    pub status: String,
    pub outcome: String,
    pub reason_code: Option<ReasonCodeId>,
    pub reason: Option<String>,
    pub view: Option<PhaseView>,
    #[serde(default)]
    pub editor: Option<EditorSyncDirective>,
}

impl ExamCommandResponse {
    fn applied(outcome: &str, view: PhaseView) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            reason_code: None,
            reason: None,
            view: Some(view),
            editor: None,
        }
    }

    fn refused(reason_code: ReasonCodeId, view: PhaseView) -> Self {
        Self {
            status: "error".to_string(),
            outcome: "REFUSED".to_string(),
            reason_code: Some(reason_code),
            reason: None,
            view: Some(view),
            editor: None,
        }
    }

    fn rejected(reason_code: ReasonCodeId, reason: String) -> Self {
        Self {
            status: "error".to_string(),
            outcome: "REJECTED".to_string(),
            reason_code: Some(reason_code),
            reason: Some(reason),
            view: None,
            editor: None,
        }
    }

    fn with_reason(mut self, reason: String) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExportResponse {
    pub status: String,
    pub outcome: String,
    pub reason_code: Option<ReasonCodeId>,
    pub reason: Option<String>,
    pub format: Option<ExportFormat>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub sha256_hex: Option<String>,
    pub content_base64: Option<String>,
}

impl ExportResponse {
    fn from_artifact(artifact: ExportArtifact) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: "EXPORTED".to_string(),
            reason_code: None,
            reason: None,
            format: Some(artifact.format),
            file_name: Some(artifact.file_name),
            mime_type: Some(artifact.mime_type),
            sha256_hex: Some(artifact.sha256_hex),
            content_base64: Some(base64::engine::general_purpose::STANDARD.encode(artifact.bytes)),
        }
    }

    fn failed(reason_code: ReasonCodeId, reason: String) -> Self {
        Self {
            status: "error".to_string(),
            outcome: "EXPORT_FAILED".to_string(),
            reason_code: Some(reason_code),
            reason: Some(reason),
            format: None,
            file_name: None,
            mime_type: None,
            sha256_hex: None,
            content_base64: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NoticesResponse {
    pub status: String,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub phase: Option<ExamPhase>,
    pub live_timer: Option<TimerToken>,
}

/// Host-side copy of the shell's editor state. The shell reports typing through the body
/// command; restores the controller asks for are handed back in the next response.
#[derive(Debug, Clone, Default)]
pub struct ShellEditorMirror {
    plain_text: String,
    pending_restore: Option<String>,
    read_only: bool,
    toolbar_visible: bool,
}

impl ShellEditorMirror {
    fn report_typed(&mut self, plain_text: String) {
        self.plain_text = plain_text;
    }

    fn take_directive(&mut self, restored_plain_text: &str) -> EditorSyncDirective {
        let restore_markup = self.pending_restore.take();
        if restore_markup.is_some() {
            self.plain_text = restored_plain_text.to_string();
        }
        EditorSyncDirective {
            read_only: self.read_only,
            toolbar_visible: self.toolbar_visible,
            restore_markup,
        }
    }
}

impl EditorSurface for ShellEditorMirror {
    fn plain_text(&self) -> String {
        self.plain_text.clone()
    }

    fn set_value(&mut self, markup: &str) {
        self.pending_restore = Some(markup.to_string());
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn set_toolbar_visible(&mut self, visible: bool) {
        self.toolbar_visible = visible;
    }
}

/// One candidate session: the controller plus the HTTP-facing command mapping.
pub struct AdapterRuntime {
    controller: AdapterExamController,
    editor: ShellEditorMirror,
}

impl AdapterRuntime {
    pub fn new(
        config: ExamControllerConfig,
        store: Box<dyn DocumentStore + Send>,
    ) -> Result<Self, String> {
        let controller = ExamController::new(
            config,
            VirtualAudioTransport::new(None),
            ShellMicrophoneSource::new(),
            store,
        )
        .map_err(|v| format!("exam controller rejected config: {v}"))?;
        Ok(Self {
            controller,
            editor: ShellEditorMirror::default(),
        })
    }

    pub fn from_adapter_config(config: &AdapterConfig) -> Result<Self, String> {
        let blueprint = config.blueprint()?;
        let controller_config = ExamControllerConfig::mvp_v1(blueprint)
            .map_err(|v| format!("exam controller config rejected: {v}"))?;
        Self::new(controller_config, config.document_store())
    }

    pub fn default_from_env() -> Result<Self, String> {
        Self::from_adapter_config(&AdapterConfig::from_env())
    }

    pub fn controller(&self) -> &AdapterExamController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AdapterExamController {
        &mut self.controller
    }

    pub fn view(&self) -> PhaseView {
        self.controller.view()
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            phase: Some(self.controller.phase()),
            live_timer: self.controller.live_timer_token(),
        }
    }

    /// The current view plus any editor restore still owed to the shell.
    pub fn view_response(&mut self) -> ExamCommandResponse {
        let mut response = ExamCommandResponse::applied("VIEW", self.view());
        response.editor = Some(self.sync_editor());
        response
    }

    pub fn run_command(&mut self, command: ExamCommand) -> ExamCommandResponse {
        let mut response = self.apply_command(command);
        if response.view.is_some() {
            response.editor = Some(self.sync_editor());
        }
        response
    }

    fn apply_command(&mut self, command: ExamCommand) -> ExamCommandResponse {
        match command {
            ExamCommand::Advance => {
                let outcome = self.controller.advance();
                self.navigation_response(outcome)
            }
            ExamCommand::Back => {
                let outcome = self.controller.back();
                self.navigation_response(outcome)
            }
            ExamCommand::Submit => {
                let outcome = self.controller.submit();
                self.navigation_response(outcome)
            }
            ExamCommand::PlaybackTest(request) => {
                // The shell's report covers this attempt only.
                self.controller
                    .audio_transport_mut()
                    .set_autoplay_allowed(!request.playback_blocked);
                let outcome = self.controller.run_playback_test();
                self.controller.audio_transport_mut().set_autoplay_allowed(true);
                self.command_response(outcome)
            }
            ExamCommand::MicrophoneStart(request) => {
                self.controller
                    .microphone_source_mut()
                    .set_permission(request.permission.into());
                let outcome = self.controller.start_microphone_test();
                self.command_response(outcome)
            }
            ExamCommand::MicrophoneStop => {
                let outcome = self.controller.stop_microphone_test();
                self.command_response(outcome)
            }
            ExamCommand::MicrophoneLevel(request) => self.run_microphone_level(request),
            ExamCommand::Keyboard(request) => self.run_keyboard(request),
            ExamCommand::AudioPlay => {
                let result = self.controller.play_audio().map(drop);
                self.audio_response(result)
            }
            ExamCommand::AudioPause => {
                self.controller.pause_audio();
                self.command_response(CommandOutcome::Applied)
            }
            ExamCommand::AudioSeek(request) => {
                let result = match request {
                    SeekRequest::Back => self.controller.skip_audio_back(),
                    SeekRequest::Forward => self.controller.skip_audio_forward(),
                    SeekRequest::To { position_secs } => {
                        self.controller.seek_audio_to(position_secs)
                    }
                };
                self.audio_response(result.map(drop))
            }
            ExamCommand::AudioRate(request) => {
                let result = self.controller.set_playback_rate(request.multiplier).map(drop);
                self.audio_response(result)
            }
            ExamCommand::AudioVolume(request) => {
                let result = self.controller.set_audio_volume(request.volume).map(drop);
                self.audio_response(result)
            }
            ExamCommand::AudioSource(request) => {
                let source = match AudioSourceDescriptor::v1(request.uri, request.label) {
                    Ok(source) => source,
                    Err(violation) => {
                        return ExamCommandResponse::rejected(
                            reason_codes::ADAPTER_REQUEST_INVALID,
                            format!("audio source rejected: {violation}"),
                        )
                    }
                };
                let result = self.controller.load_player_source(source).map(drop);
                self.audio_response(result)
            }
            ExamCommand::AudioEnded => {
                self.controller.report_playback_ended();
                self.command_response(CommandOutcome::Applied)
            }
            ExamCommand::AudioFailed(request) => {
                self.controller.report_playback_failure(&request.detail);
                self.command_response(CommandOutcome::Applied)
            }
            ExamCommand::SetTitle(request) => {
                let outcome = self.controller.set_title(request.title);
                self.command_response(outcome)
            }
            ExamCommand::SetBody(request) => {
                let typed = request.plain_text.clone();
                let outcome = self.controller.set_body(request.markup, request.plain_text);
                if outcome.is_applied() {
                    self.editor.report_typed(typed);
                }
                self.command_response(outcome)
            }
            ExamCommand::NewDocument => {
                let outcome = self.controller.new_document();
                self.command_response(outcome)
            }
            ExamCommand::SaveDocument => {
                let outcome = self.controller.save_document();
                self.command_response(outcome)
            }
            ExamCommand::LoadDocument => {
                let outcome = self.controller.load_document();
                self.command_response(outcome)
            }
        }
    }

    fn run_keyboard(&mut self, request: KeyboardRequest) -> ExamCommandResponse {
        if let Some(code) = request.language {
            let Some(language) = KeyboardPromptLanguage::parse(&code) else {
                return ExamCommandResponse::rejected(
                    reason_codes::ADAPTER_REQUEST_INVALID,
                    format!("unsupported keyboard language '{code}'"),
                );
            };
            let outcome = self.controller.select_keyboard_language(language);
            if !outcome.is_applied() {
                return self.command_response(outcome);
            }
        }
        match request.text {
            Some(text) => {
                let outcome = self.controller.update_keyboard_text(text);
                self.command_response(outcome)
            }
            None => self.command_response(CommandOutcome::Applied),
        }
    }

    fn run_microphone_level(&mut self, request: MicrophoneLevelRequest) -> ExamCommandResponse {
        let samples = match base64::engine::general_purpose::STANDARD.decode(&request.samples_base64)
        {
            Ok(samples) => samples,
            Err(err) => {
                return ExamCommandResponse::rejected(
                    reason_codes::ADAPTER_REQUEST_INVALID,
                    format!("microphone samples are not valid base64: {err}"),
                )
            }
        };
        match self.controller.sample_microphone_level(&samples) {
            Some(_) => self.command_response(CommandOutcome::Applied),
            None => self.command_response(CommandOutcome::Refused {
                reason_code: exam_reason_codes::EXAM_MICROPHONE_NOT_RECORDING,
            }),
        }
    }

    pub fn export(&mut self, format: ExportFormat) -> ExportResponse {
        let result = match format {
            ExportFormat::Text => self.controller.export_text(),
            ExportFormat::Docx => self.controller.export_docx(),
        };
        match result {
            Ok(artifact) => ExportResponse::from_artifact(artifact),
            Err(err) => ExportResponse::failed(err.reason_code(), err.user_message().to_string()),
        }
    }

    pub fn drain_notices(&mut self) -> NoticesResponse {
        NoticesResponse {
            status: "ok".to_string(),
            notices: self.controller.drain_notices(),
        }
    }

    fn navigation_response(&self, outcome: NavigationOutcome) -> ExamCommandResponse {
        match outcome {
            NavigationOutcome::Moved { from, to } => {
                tracing::info!(from = from.as_str(), to = to.as_str(), "shell moved phase");
                ExamCommandResponse::applied("MOVED", self.view())
            }
            NavigationOutcome::Blocked { reason_code }
            | NavigationOutcome::Unavailable { reason_code } => {
                ExamCommandResponse::refused(reason_code, self.view())
            }
        }
    }

    fn audio_response(&self, result: Result<(), AudioGateError>) -> ExamCommandResponse {
        match result {
            Ok(()) => ExamCommandResponse::applied("APPLIED", self.view()),
            Err(err) => {
                tracing::debug!(error = %err, "audio control refused");
                let reason_code = match err {
                    AudioGateError::Playback(_) => exam_reason_codes::EXAM_PLAYBACK_FAILED,
                    _ => exam_reason_codes::EXAM_AUDIO_CONTROL_REFUSED,
                };
                ExamCommandResponse::refused(reason_code, self.view()).with_reason(err.to_string())
            }
        }
    }

    fn sync_editor(&mut self) -> EditorSyncDirective {
        self.controller.sync_editor(&mut self.editor);
        self.editor
            .take_directive(&self.controller.document().body.plain_text)
    }

    fn command_response(&self, outcome: CommandOutcome) -> ExamCommandResponse {
        match outcome {
            CommandOutcome::Applied => ExamCommandResponse::applied("APPLIED", self.view()),
            CommandOutcome::Refused { reason_code } => {
                ExamCommandResponse::refused(reason_code, self.view())
            }
        }
    }
}

/// Owns the runtime behind one lock and drives its clock.
///
/// Every mutation runs under the runtime lock. Timer directives the controller emits are
/// applied after the lock is released: `Start` spawns a tick task bound to the token,
/// `Cancel` aborts it. Ticks from a task that outlives its phase are rejected by the
/// controller as stale. [`SessionHost::shutdown`] stops the audio clock and every tick task.
#[derive(Clone)]
pub struct SessionHost {
    runtime: Arc<Mutex<AdapterRuntime>>,
    tick_tasks: Arc<Mutex<BTreeMap<TimerToken, JoinHandle<()>>>>,
    audio_clock: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
}

impl SessionHost {
    /// Must be called from within a tokio runtime.
    pub fn start(runtime: AdapterRuntime, tick_interval: Duration) -> Self {
        let host = Self {
            runtime: Arc::new(Mutex::new(runtime)),
            tick_tasks: Arc::new(Mutex::new(BTreeMap::new())),
            audio_clock: Arc::new(Mutex::new(None)),
            tick_interval,
        };
        let clock = host.spawn_audio_clock();
        match host.audio_clock.lock() {
            Ok(mut slot) => *slot = Some(clock),
            Err(_) => clock.abort(),
        }
        // The initial phase may already be timed.
        if let Err(err) = host.with_runtime(|_| ()) {
            tracing::error!(error = %err, "exam session could not schedule its first phase");
        }
        host
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn with_runtime<R, F>(&self, f: F) -> Result<R, String>
    where
        F: FnOnce(&mut AdapterRuntime) -> R,
    {
        let (result, directives) = {
            let mut runtime = self
                .runtime
                .lock()
                .map_err(|_| RUNTIME_POISONED.to_string())?;
            let result = f(&mut runtime);
            let directives = runtime.controller.drain_timer_directives();
            (result, directives)
        };
        self.apply_timer_directives(directives);
        Ok(result)
    }

    pub fn live_tick_tasks(&self) -> usize {
        match self.tick_tasks.lock() {
            Ok(tasks) => tasks.values().filter(|task| !task.is_finished()).count(),
            Err(_) => 0,
        }
    }

    pub fn audio_clock_running(&self) -> bool {
        match self.audio_clock.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|clock| !clock.is_finished()),
            Err(_) => false,
        }
    }

    /// Aborts the audio clock and every pending tick task. The session state stays readable.
    pub fn shutdown(&self) {
        match self.audio_clock.lock() {
            Ok(slot) => {
                if let Some(clock) = slot.as_ref() {
                    clock.abort();
                }
            }
            Err(_) => tracing::error!("audio clock slot lock poisoned"),
        }
        match self.tick_tasks.lock() {
            Ok(mut tasks) => {
                for (_, task) in std::mem::take(&mut *tasks) {
                    task.abort();
                }
            }
            Err(_) => tracing::error!("tick task registry lock poisoned"),
        }
        tracing::info!("exam session host shut down");
    }

    fn apply_timer_directives(&self, directives: Vec<TimerDirective>) {
        if directives.is_empty() {
            return;
        }
        let Ok(mut tasks) = self.tick_tasks.lock() else {
            tracing::error!("tick task registry lock poisoned");
            return;
        };
        for directive in directives {
            match directive {
                TimerDirective::Start { token, seconds } => {
                    let task = self.spawn_tick_task(token, seconds);
                    if let Some(previous) = tasks.insert(token, task) {
                        previous.abort();
                    }
                }
                TimerDirective::Cancel { token } => {
                    if let Some(task) = tasks.remove(&token) {
                        task.abort();
                        tracing::debug!(
                            generation = token.generation,
                            phase = token.phase.as_str(),
                            "tick task aborted"
                        );
                    }
                }
            }
        }
        tasks.retain(|_, task| !task.is_finished());
    }

    fn spawn_tick_task(&self, token: TimerToken, seconds: u32) -> JoinHandle<()> {
        let host = self.clone();
        let period = self.tick_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            for _ in 0..seconds {
                ticker.tick().await;
                match host.with_runtime(|runtime| runtime.controller.on_clock_tick(token)) {
                    Ok(TickOutcome::Ticked { .. }) => {}
                    Ok(TickOutcome::Expired) | Ok(TickOutcome::Stale) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "tick task stopped");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_audio_clock(&self) -> JoinHandle<()> {
        let runtime = self.runtime.clone();
        let period = self.tick_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Ok(mut guard) = runtime.lock() else {
                    tracing::error!(error = RUNTIME_POISONED, "audio clock stopped");
                    break;
                };
                guard.controller.elapse_audio(period.as_secs_f64());
            }
        })
    }
}

pub fn router(host: SessionHost) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/exam/view", get(current_view))
        .route("/v1/exam/advance", post(advance))
        .route("/v1/exam/back", post(back))
        .route("/v1/exam/submit", post(submit))
        .route("/v1/exam/device/playback", post(device_playback))
        .route("/v1/exam/device/microphone/start", post(device_microphone_start))
        .route("/v1/exam/device/microphone/stop", post(device_microphone_stop))
        .route("/v1/exam/device/microphone/level", post(device_microphone_level))
        .route("/v1/exam/device/keyboard", post(device_keyboard))
        .route("/v1/exam/audio/play", post(audio_play))
        .route("/v1/exam/audio/pause", post(audio_pause))
        .route("/v1/exam/audio/seek", post(audio_seek))
        .route("/v1/exam/audio/rate", post(audio_rate))
        .route("/v1/exam/audio/volume", post(audio_volume))
        .route("/v1/exam/audio/source", post(audio_source))
        .route("/v1/exam/audio/ended", post(audio_ended))
        .route("/v1/exam/audio/failed", post(audio_failed))
        .route("/v1/exam/document/title", post(document_title))
        .route("/v1/exam/document/body", post(document_body))
        .route("/v1/exam/document/new", post(document_new))
        .route("/v1/exam/document/save", post(document_save))
        .route("/v1/exam/document/load", post(document_load))
        .route("/v1/exam/export/text", post(export_text))
        .route("/v1/exam/export/docx", post(export_docx))
        .route("/v1/exam/notices", get(drain_notices))
        .with_state(host)
}

pub async fn healthz(State(host): State<SessionHost>) -> (StatusCode, Json<AdapterHealthResponse>) {
    match host.with_runtime(|runtime| runtime.health_report()) {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(reason) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(reason),
                phase: None,
                live_timer: None,
            }),
        ),
    }
}

pub async fn current_view(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    match host.with_runtime(|runtime| runtime.view_response()) {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(reason) => poisoned_command_response(reason),
    }
}

async fn advance(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::Advance)
}

async fn back(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::Back)
}

async fn submit(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::Submit)
}

/// The body is optional; without one the shell reports that playback started.
async fn device_playback(
    State(host): State<SessionHost>,
    request: Option<Json<PlaybackTestRequest>>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    dispatch(&host, ExamCommand::PlaybackTest(request))
}

/// The body is optional; without one the permission counts as granted.
async fn device_microphone_start(
    State(host): State<SessionHost>,
    request: Option<Json<MicrophoneStartRequest>>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    dispatch(&host, ExamCommand::MicrophoneStart(request))
}

async fn device_microphone_level(
    State(host): State<SessionHost>,
    Json(request): Json<MicrophoneLevelRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::MicrophoneLevel(request))
}

async fn device_microphone_stop(
    State(host): State<SessionHost>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::MicrophoneStop)
}

async fn device_keyboard(
    State(host): State<SessionHost>,
    Json(request): Json<KeyboardRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::Keyboard(request))
}

async fn audio_play(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioPlay)
}

async fn audio_pause(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioPause)
}

async fn audio_seek(
    State(host): State<SessionHost>,
    Json(request): Json<SeekRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioSeek(request))
}

async fn audio_rate(
    State(host): State<SessionHost>,
    Json(request): Json<RateRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioRate(request))
}

async fn audio_volume(
    State(host): State<SessionHost>,
    Json(request): Json<VolumeRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioVolume(request))
}

async fn audio_source(
    State(host): State<SessionHost>,
    Json(request): Json<SourceRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioSource(request))
}

async fn audio_ended(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::AudioEnded)
}

async fn audio_failed(
    State(host): State<SessionHost>,
    request: Option<Json<PlaybackFailureRequest>>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    dispatch(&host, ExamCommand::AudioFailed(request))
}

async fn document_title(
    State(host): State<SessionHost>,
    Json(request): Json<TitleRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::SetTitle(request))
}

async fn document_body(
    State(host): State<SessionHost>,
    Json(request): Json<BodyRequest>,
) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::SetBody(request))
}

async fn document_new(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::NewDocument)
}

async fn document_save(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::SaveDocument)
}

async fn document_load(State(host): State<SessionHost>) -> (StatusCode, Json<ExamCommandResponse>) {
    dispatch(&host, ExamCommand::LoadDocument)
}

async fn export_text(State(host): State<SessionHost>) -> (StatusCode, Json<ExportResponse>) {
    export(&host, ExportFormat::Text)
}

async fn export_docx(State(host): State<SessionHost>) -> (StatusCode, Json<ExportResponse>) {
    export(&host, ExportFormat::Docx)
}

async fn drain_notices(State(host): State<SessionHost>) -> (StatusCode, Json<NoticesResponse>) {
    match host.with_runtime(|runtime| runtime.drain_notices()) {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(NoticesResponse {
                status: "error".to_string(),
                notices: Vec::new(),
            }),
        ),
    }
}

fn dispatch(host: &SessionHost, command: ExamCommand) -> (StatusCode, Json<ExamCommandResponse>) {
    match host.with_runtime(|runtime| runtime.run_command(command)) {
        Ok(response) if response.is_ok() => (StatusCode::OK, Json(response)),
        Ok(response) if response.view.is_none() => (StatusCode::BAD_REQUEST, Json(response)),
        Ok(response) => (StatusCode::CONFLICT, Json(response)),
        Err(reason) => poisoned_command_response(reason),
    }
}

fn export(host: &SessionHost, format: ExportFormat) -> (StatusCode, Json<ExportResponse>) {
    match host.with_runtime(|runtime| runtime.export(format)) {
        Ok(response) if response.status == "ok" => (StatusCode::OK, Json(response)),
        Ok(response) => (StatusCode::UNPROCESSABLE_ENTITY, Json(response)),
        Err(reason) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ExportResponse::failed(
                reason_codes::ADAPTER_RUNTIME_POISONED,
                reason,
            )),
        ),
    }
}

fn poisoned_command_response(reason: String) -> (StatusCode, Json<ExamCommandResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ExamCommandResponse::rejected(
            reason_codes::ADAPTER_RUNTIME_POISONED,
            reason,
        )),
    )
}
