#![forbid(unsafe_code)]

use exam_engines::audio_gate::{AudioGateError, VirtualAudioTransport};
use exam_engines::countdown::TickOutcome;
use exam_engines::editor_lock::EditorSurface;
use exam_engines::export::{DocumentEncoder, DocumentExporter, ExportError, DOCX_FALLBACK_MESSAGE};
use exam_engines::microphone::{MicrophonePermission, ShellMicrophoneSource};
use exam_kernel_contracts::audio::{AudioGateMode, AudioSourceDescriptor, PlaybackRate};
use exam_kernel_contracts::device::DeviceTestName;
use exam_kernel_contracts::document::{EditorContent, DEFAULT_DOCUMENT_TITLE};
use exam_kernel_contracts::notice::NoticeLevel;
use exam_kernel_contracts::phase::{ExamPhase, TimerState, TimerToken};
use exam_os::blueprint::{listening_gate_v1, timed_writing_v1, ExamControllerConfig};
use exam_os::controller::{messages, reason_codes, CommandOutcome, ExamController, NavigationOutcome};
use exam_os::view::{CompletionCause, PhaseView};
use exam_storage::document_store::{
    DocumentStore, InMemoryDocumentStore, DOCUMENT_CONTENT_KEY, DOCUMENT_TITLE_KEY,
};

type Controller = ExamController<VirtualAudioTransport, ShellMicrophoneSource, InMemoryDocumentStore>;

fn passage() -> AudioSourceDescriptor {
    AudioSourceDescriptor::v1("asset://listening/passage.mp3".to_string(), "Passage".to_string())
        .unwrap()
}

fn listening_controller(listening_secs: u32) -> Controller {
    let config =
        ExamControllerConfig::mvp_v1(listening_gate_v1(listening_secs, passage()).unwrap())
            .unwrap();
    ExamController::new(
        config,
        VirtualAudioTransport::new(Some(600.0)),
        ShellMicrophoneSource::new(),
        InMemoryDocumentStore::new(),
    )
    .unwrap()
}

fn timed_controller(writing_secs: u32) -> Controller {
    timed_controller_with_store(writing_secs, InMemoryDocumentStore::new())
}

fn timed_controller_with_store(writing_secs: u32, store: InMemoryDocumentStore) -> Controller {
    let config = ExamControllerConfig::mvp_v1(timed_writing_v1(writing_secs).unwrap()).unwrap();
    ExamController::new(
        config,
        VirtualAudioTransport::new(Some(30.0)),
        ShellMicrophoneSource::new(),
        store,
    )
    .unwrap()
}

fn pass_audio_pair(c: &mut Controller) {
    assert!(c.run_playback_test().is_applied());
    assert!(c.start_microphone_test().is_applied());
    assert!(c.stop_microphone_test().is_applied());
}

fn into_writing(c: &mut Controller) {
    c.advance();
    pass_audio_pair(c);
    c.update_keyboard_text("keyboard ok!".to_string());
    assert!(matches!(c.advance(), NavigationOutcome::Moved { .. }));
    assert_eq!(c.phase(), ExamPhase::Writing);
}

fn token(c: &Controller) -> TimerToken {
    c.live_timer_token().unwrap()
}

#[test]
fn at_exam_flow_01_listening_expiry_moves_to_writing_paused_at_zero() {
    let mut c = listening_controller(4);
    c.advance();
    pass_audio_pair(&mut c);
    c.advance();
    assert_eq!(c.phase(), ExamPhase::Listening);
    assert!(c.audio_state().is_playing);

    let t = token(&c);
    assert_eq!(c.on_clock_tick(t), TickOutcome::Ticked { remaining_secs: 3 });
    assert_eq!(c.on_clock_tick(t), TickOutcome::Ticked { remaining_secs: 2 });
    assert_eq!(c.on_clock_tick(t), TickOutcome::Ticked { remaining_secs: 1 });
    assert_eq!(c.on_clock_tick(t), TickOutcome::Expired);

    assert_eq!(c.phase(), ExamPhase::Writing);
    assert_eq!(
        c.timer_state(),
        TimerState {
            remaining_secs: 0,
            active: false
        }
    );
    assert!(!c.audio_state().is_playing);
    assert!(!c.audio_transport().is_playing());
    assert!(c.editor_view().editable);
}

#[test]
fn at_exam_flow_02_keyboard_passes_at_ten_characters() {
    let mut c = timed_controller(600);
    c.advance();
    c.update_keyboard_text("123456789".to_string());
    assert!(!c.device_results().keyboard);
    c.update_keyboard_text("1234567890".to_string());
    assert!(c.device_results().keyboard);
    c.update_keyboard_text(String::new());
    assert!(c.device_results().keyboard);
}

#[test]
fn at_exam_flow_03_untitled_text_export_matches_body() {
    let mut c = timed_controller(600);
    into_writing(&mut c);
    assert!(c
        .set_body("<p>line1</p><p>line2</p>".to_string(), "line1\nline2".to_string())
        .is_applied());
    let artifact = c.export_text().unwrap();
    assert_eq!(artifact.file_name, format!("{DEFAULT_DOCUMENT_TITLE}.txt"));
    assert_eq!(artifact.bytes, b"line1\nline2".to_vec());
    let again = c.export_text().unwrap();
    assert_eq!(artifact, again);
}

#[test]
fn at_exam_flow_04_microphone_denial_reports_once_per_attempt() {
    let mut c = timed_controller(600);
    c.advance();
    c.microphone_source_mut()
        .set_permission(MicrophonePermission::Denied);
    for _ in 0..2 {
        assert_eq!(
            c.start_microphone_test(),
            CommandOutcome::Refused {
                reason_code: reason_codes::EXAM_MICROPHONE_DENIED
            }
        );
        let notices = c.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].message, messages::MICROPHONE_DENIED);
    }
    assert!(!c.device_results().microphone);

    c.microphone_source_mut()
        .set_permission(MicrophonePermission::Granted);
    assert!(c.start_microphone_test().is_applied());
    assert!(c.stop_microphone_test().is_applied());
    assert!(c.device_results().microphone);
}

#[test]
fn at_exam_flow_05_device_gate_is_a_no_op_until_all_required_pass() {
    let mut c = listening_controller(240);
    c.advance();
    assert_eq!(
        c.advance(),
        NavigationOutcome::Blocked {
            reason_code: reason_codes::EXAM_DEVICE_TESTS_INCOMPLETE
        }
    );
    assert_eq!(c.phase(), ExamPhase::DeviceTest);
    c.run_playback_test();
    assert!(matches!(c.advance(), NavigationOutcome::Blocked { .. }));
    c.start_microphone_test();
    c.stop_microphone_test();
    // Keyboard is not part of the listening configuration's gate.
    assert!(!c.device_results().get(DeviceTestName::Keyboard));
    assert_eq!(
        c.advance(),
        NavigationOutcome::Moved {
            from: ExamPhase::DeviceTest,
            to: ExamPhase::Listening
        }
    );
}

#[test]
fn at_exam_flow_06_stale_tokens_never_mutate_state() {
    let mut c = listening_controller(3);
    c.advance();
    pass_audio_pair(&mut c);
    c.advance();
    let listening = token(&c);
    for _ in 0..3 {
        c.on_clock_tick(listening);
    }
    assert_eq!(c.phase(), ExamPhase::Writing);
    for _ in 0..5 {
        assert_eq!(c.on_clock_tick(listening), TickOutcome::Stale);
    }
    assert_eq!(c.phase(), ExamPhase::Writing);

    let forged = TimerToken {
        generation: listening.generation + 40,
        phase: ExamPhase::Writing,
    };
    assert_eq!(c.on_clock_tick(forged), TickOutcome::Stale);
    assert_eq!(c.phase(), ExamPhase::Writing);
    assert_eq!(c.completion(), None);
}

#[test]
fn at_exam_flow_07_writing_expiry_notice_fires_exactly_once() {
    let mut c = timed_controller(60);
    into_writing(&mut c);
    c.drain_notices();
    let t = token(&c);
    for _ in 0..75 {
        c.on_clock_tick(t);
    }
    assert_eq!(c.phase(), ExamPhase::Ended);
    assert_eq!(c.completion(), Some(CompletionCause::TimeExpired));
    let notices = c.drain_notices();
    let expiry: Vec<_> = notices
        .iter()
        .filter(|n| n.reason_code == reason_codes::EXAM_INFO_TIME_EXPIRED)
        .collect();
    assert_eq!(expiry.len(), 1);
    assert_eq!(
        c.submit(),
        NavigationOutcome::Unavailable {
            reason_code: reason_codes::EXAM_SUBMIT_UNAVAILABLE
        }
    );
    assert!(!c.back_available());
}

#[test]
fn at_exam_flow_08_ended_rejects_mutation_but_keeps_export() {
    let mut c = timed_controller(600);
    into_writing(&mut c);
    c.set_title("Essay".to_string());
    c.set_body("<p>final</p>".to_string(), "final".to_string());
    assert!(matches!(c.submit(), NavigationOutcome::Moved { .. }));
    c.drain_notices();

    for outcome in [
        c.set_title("Changed".to_string()),
        c.set_body("<p>x</p>".to_string(), "x".to_string()),
        c.new_document(),
        c.load_document(),
    ] {
        assert_eq!(
            outcome,
            CommandOutcome::Refused {
                reason_code: reason_codes::EXAM_DOCUMENT_LOCKED
            }
        );
    }
    assert_eq!(c.drain_notices().len(), 4);
    assert_eq!(c.document().title, "Essay");
    assert_eq!(c.document().body.plain_text, "final");
    assert!(!c.editor_view().editable);

    let artifact = c.export_text().unwrap();
    assert_eq!(artifact.file_name, "Essay.txt");
    let PhaseView::Ended(ended) = c.view() else {
        panic!("expected ended view");
    };
    assert_eq!(ended.completed_by, Some(CompletionCause::Submitted));
    assert_eq!(ended.plain_text_chars, 5);
}

#[test]
fn at_exam_flow_09_save_then_load_round_trips_and_reports_absence() {
    let mut c = timed_controller(600);
    into_writing(&mut c);
    c.drain_notices();

    assert_eq!(
        c.load_document(),
        CommandOutcome::Refused {
            reason_code: reason_codes::EXAM_DOCUMENT_NOT_FOUND
        }
    );
    assert_eq!(c.drain_notices()[0].message, messages::DOCUMENT_NOT_FOUND);

    c.set_title("निबंध".to_string());
    c.set_body("<p>पहिली ओळ</p>".to_string(), "पहिली ओळ".to_string());
    assert!(c.save_document().is_applied());
    assert!(c.new_document().is_applied());
    assert_eq!(c.document().title, DEFAULT_DOCUMENT_TITLE);
    assert!(c.document().body.is_empty());

    assert!(c.load_document().is_applied());
    assert_eq!(c.document().title, "निबंध");
    assert_eq!(c.document().body.plain_text, "पहिली ओळ");
}

struct FailingEncoder;

impl DocumentEncoder for FailingEncoder {
    fn encode_docx(&self, _plain_text: &str) -> Result<Vec<u8>, ExportError> {
        Err(ExportError::DocxEncoding("container writer failed".to_string()))
    }
}

#[test]
fn at_exam_flow_10_docx_failure_suggests_text_and_keeps_document() {
    let config = ExamControllerConfig::mvp_v1(timed_writing_v1(600).unwrap()).unwrap();
    let mut c = ExamController::with_exporter(
        config,
        VirtualAudioTransport::new(Some(30.0)),
        ShellMicrophoneSource::new(),
        InMemoryDocumentStore::new(),
        DocumentExporter::with_encoder(FailingEncoder),
    )
    .unwrap();
    c.advance();
    c.run_playback_test();
    c.start_microphone_test();
    c.stop_microphone_test();
    c.update_keyboard_text("abcdefghij".to_string());
    c.advance();
    c.set_body("<p>keep</p>".to_string(), "keep".to_string());
    c.drain_notices();

    assert!(c.export_docx().is_err());
    let notices = c.drain_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, DOCX_FALLBACK_MESSAGE);
    assert_eq!(c.document().body.plain_text, "keep");
    assert!(c.export_text().is_ok());
}

#[test]
fn at_exam_flow_11_playback_rejection_leaves_test_failed_and_retryable() {
    let mut c = timed_controller(600);
    c.advance();
    c.audio_transport_mut().set_autoplay_allowed(false);
    assert_eq!(
        c.run_playback_test(),
        CommandOutcome::Refused {
            reason_code: reason_codes::EXAM_PLAYBACK_FAILED
        }
    );
    assert!(!c.device_results().playback);
    assert_eq!(c.drain_notices()[0].message, messages::PLAYBACK_FAILED);

    c.audio_transport_mut().set_autoplay_allowed(true);
    assert!(c.run_playback_test().is_applied());
    assert!(c.device_results().playback);
}

#[test]
fn at_exam_flow_12_load_without_saved_title_falls_back_to_untitled() {
    let mut store = InMemoryDocumentStore::new();
    let body = EditorContent::v1("<p>old</p>".to_string(), "old".to_string()).unwrap();
    store
        .put(DOCUMENT_CONTENT_KEY, serde_json::to_string(&body).unwrap())
        .unwrap();
    let mut c = timed_controller_with_store(600, store);
    into_writing(&mut c);
    c.set_title("Current Draft".to_string());

    assert!(c.load_document().is_applied());
    assert_eq!(c.document().title, DEFAULT_DOCUMENT_TITLE);
    assert_eq!(c.document().body, body);
}

#[test]
fn at_exam_flow_13_empty_saved_body_reports_not_found() {
    let mut c = timed_controller(600);
    into_writing(&mut c);
    c.set_title("Essay".to_string());
    c.set_body("<p>keep</p>".to_string(), "keep".to_string());
    assert!(c.new_document().is_applied());
    assert!(c.save_document().is_applied());
    c.set_body("<p>unsaved</p>".to_string(), "unsaved".to_string());
    c.drain_notices();

    assert_eq!(
        c.load_document(),
        CommandOutcome::Refused {
            reason_code: reason_codes::EXAM_DOCUMENT_NOT_FOUND
        }
    );
    assert_eq!(c.drain_notices()[0].message, messages::DOCUMENT_NOT_FOUND);
    assert_eq!(c.document().body.plain_text, "unsaved");
}

#[test]
fn at_exam_flow_14_listening_expiry_while_paused_lands_at_zero() {
    let mut c = listening_controller(3);
    c.advance();
    pass_audio_pair(&mut c);
    c.advance();
    let t = token(&c);
    assert_eq!(c.on_clock_tick(t), TickOutcome::Ticked { remaining_secs: 2 });

    let paused = c.pause_audio();
    assert!(!paused.is_playing);
    assert!(!c.audio_transport().is_playing());
    assert_eq!(c.on_clock_tick(t), TickOutcome::Ticked { remaining_secs: 1 });
    assert_eq!(c.on_clock_tick(t), TickOutcome::Expired);

    assert_eq!(c.phase(), ExamPhase::Writing);
    assert_eq!(c.timer_state().remaining_secs, 0);
    assert!(!c.audio_state().is_playing);
    assert!(!c.audio_transport().is_playing());
}

#[test]
fn at_exam_flow_15_listening_controls_skip_and_change_speed_only() {
    let mut c = listening_controller(60);
    c.advance();
    pass_audio_pair(&mut c);
    c.advance();
    assert_eq!(c.audio_state().mode, Some(AudioGateMode::GatedListening));

    c.elapse_audio(1.5);
    assert_eq!(c.audio_state().position_secs, 1.5);
    assert_eq!(c.skip_audio_forward().unwrap().position_secs, 11.5);
    assert_eq!(c.skip_audio_back().unwrap().position_secs, 1.5);
    assert_eq!(c.skip_audio_back().unwrap().position_secs, 0.0);

    assert_eq!(c.set_playback_rate(2), Ok(PlaybackRate::X2));
    assert_eq!(c.set_playback_rate(4), Err(AudioGateError::InvalidRate(4)));
    c.elapse_audio(1.0);
    assert_eq!(c.audio_state().position_secs, 2.0);

    let paused = c.pause_audio();
    assert!(!paused.is_playing);
    c.elapse_audio(5.0);
    assert_eq!(c.audio_state().position_secs, 2.0);
    assert!(c.play_audio().unwrap().is_playing);
    assert!(c.audio_transport().is_playing());

    let gated = AudioGateError::WrongMode {
        mode: AudioGateMode::GatedListening,
    };
    assert_eq!(c.seek_audio_to(20.0), Err(gated.clone()));
    assert_eq!(c.set_audio_volume(0.5), Err(gated.clone()));
    assert_eq!(c.load_player_source(passage()), Err(gated));
    assert_eq!(c.audio_state().playback_rate, PlaybackRate::X2);
}

#[test]
fn at_exam_flow_16_writing_free_player_takes_volume_but_not_speed() {
    let mut c = timed_controller(600);
    into_writing(&mut c);
    c.drain_notices();
    assert_eq!(c.audio_state().mode, Some(AudioGateMode::FreePlayer));
    assert_eq!(c.play_audio(), Err(AudioGateError::NoSource));

    let loaded = c.load_player_source(passage()).unwrap();
    assert_eq!(loaded.source_label.as_deref(), Some("Passage"));
    assert!(!loaded.is_playing);
    assert!(c.play_audio().unwrap().is_playing);

    assert_eq!(c.seek_audio_to(12.0).unwrap().position_secs, 12.0);
    assert_eq!(c.seek_audio_to(45.0).unwrap().position_secs, 30.0);
    assert_eq!(c.skip_audio_back().unwrap().position_secs, 20.0);
    assert_eq!(c.set_audio_volume(0.5), Ok(0.5));
    assert_eq!(c.audio_transport().volume(), 0.5);
    assert_eq!(c.set_audio_volume(1.5), Err(AudioGateError::InvalidVolume(1.5)));
    assert_eq!(
        c.set_playback_rate(2),
        Err(AudioGateError::WrongMode {
            mode: AudioGateMode::FreePlayer
        })
    );
    assert_eq!(c.audio_state().playback_rate, PlaybackRate::X1);

    c.report_playback_ended();
    assert!(!c.audio_state().is_playing);
    assert!(c.play_audio().unwrap().is_playing);
    c.report_playback_failure("decoder error");
    assert!(!c.audio_state().is_playing);
    assert!(!c.audio_transport().is_playing());
    assert_eq!(c.drain_notices()[0].message, messages::PLAYBACK_FAILED);
}

#[derive(Default)]
struct RecordingEditor {
    text: String,
    restored: Vec<String>,
    read_only: bool,
    toolbar_visible: bool,
}

impl EditorSurface for RecordingEditor {
    fn plain_text(&self) -> String {
        self.text.clone()
    }

    fn set_value(&mut self, markup: &str) {
        self.restored.push(markup.to_string());
        self.text = markup.to_string();
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn set_toolbar_visible(&mut self, visible: bool) {
        self.toolbar_visible = visible;
    }
}

#[test]
fn at_exam_flow_17_editor_sync_keeps_typing_and_restores_after_load() {
    let mut store = InMemoryDocumentStore::new();
    store.put(DOCUMENT_TITLE_KEY, "Essay".to_string()).unwrap();
    let saved = EditorContent::v1("<p>saved</p>".to_string(), "saved".to_string()).unwrap();
    store
        .put(DOCUMENT_CONTENT_KEY, serde_json::to_string(&saved).unwrap())
        .unwrap();
    let mut c = timed_controller_with_store(600, store);
    into_writing(&mut c);
    c.set_body("<p>carried</p>".to_string(), "carried".to_string());

    let mut editor = RecordingEditor::default();
    c.sync_editor(&mut editor);
    assert_eq!(editor.restored, vec!["<p>carried</p>".to_string()]);
    assert!(!editor.read_only);
    assert!(editor.toolbar_visible);

    editor.text = "carried and still typing".to_string();
    c.sync_editor(&mut editor);
    c.sync_editor(&mut editor);
    assert_eq!(editor.restored.len(), 1);
    assert_eq!(editor.text, "carried and still typing");

    assert!(c.load_document().is_applied());
    c.sync_editor(&mut editor);
    assert_eq!(editor.restored.last().map(String::as_str), Some("<p>saved</p>"));

    editor.text = "typed after load".to_string();
    c.sync_editor(&mut editor);
    assert_eq!(editor.restored.len(), 2);

    assert!(c.new_document().is_applied());
    c.sync_editor(&mut editor);
    assert_eq!(editor.restored.last().map(String::as_str), Some(""));
    assert_eq!(editor.restored.len(), 3);

    assert!(matches!(c.submit(), NavigationOutcome::Moved { .. }));
    editor.text = "late keystroke".to_string();
    c.sync_editor(&mut editor);
    assert!(editor.read_only);
    assert!(!editor.toolbar_visible);
    assert_eq!(editor.restored.len(), 3);
}
