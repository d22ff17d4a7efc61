#![forbid(unsafe_code)]

use exam_kernel_contracts::document::{EditorSurfaceMode, EditorView};
use exam_kernel_contracts::phase::ExamPhase;

/// The rich-text surface in the shell. Formatting is opaque here; only the lock and the plain
/// projection matter.
pub trait EditorSurface {
    fn plain_text(&self) -> String;
    fn set_value(&mut self, markup: &str);
    fn set_read_only(&mut self, read_only: bool);
    fn set_toolbar_visible(&mut self, visible: bool);
}

/// Editor presentation for a phase. `listening_remaining_secs` only matters for LISTENING.
pub fn editor_view(phase: ExamPhase, listening_remaining_secs: Option<u32>) -> EditorView {
    match phase {
        ExamPhase::HallTicket | ExamPhase::DeviceTest => EditorView {
            editable: false,
            toolbar_visible: false,
            surface: EditorSurfaceMode::NotMounted,
        },
        ExamPhase::Listening => {
            let remaining_secs = listening_remaining_secs.unwrap_or(0);
            EditorView {
                editable: false,
                toolbar_visible: false,
                surface: EditorSurfaceMode::ListeningPlaceholder {
                    remaining_secs,
                    remaining_label: format_clock(remaining_secs),
                },
            }
        }
        ExamPhase::Writing => EditorView {
            editable: true,
            toolbar_visible: true,
            surface: EditorSurfaceMode::Editable,
        },
        ExamPhase::Ended => EditorView {
            editable: false,
            toolbar_visible: false,
            surface: EditorSurfaceMode::CompletionPlaceholder,
        },
    }
}

/// `m:ss`, minutes unbounded.
pub fn format_clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub fn apply_editor_view<S>(surface: &mut S, view: &EditorView)
where
    S: EditorSurface + ?Sized,
{
    surface.set_read_only(!view.editable);
    surface.set_toolbar_visible(view.toolbar_visible);
}
