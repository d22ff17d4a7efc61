#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_label;
use crate::{ContractViolation, Validate};

pub const DEFAULT_DOCUMENT_TITLE: &str = "Untitled Document";
pub const MAX_DOCUMENT_TITLE_CHARS: usize = 256;
pub const MAX_DOCUMENT_BODY_BYTES: usize = 4 * 1024 * 1024;

/// What the editor surface reports on change: its own markup plus the plain-text projection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditorContent {
    pub markup: String,
    pub plain_text: String,
}

impl EditorContent {
    pub fn v1(markup: String, plain_text: String) -> Result<Self, ContractViolation> {
        let content = Self { markup, plain_text };
        content.validate()?;
        Ok(content)
    }

    pub fn is_empty(&self) -> bool {
        self.markup.is_empty() && self.plain_text.is_empty()
    }
}

impl Validate for EditorContent {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.markup.len() > MAX_DOCUMENT_BODY_BYTES {
            return Err(ContractViolation::InvalidValue {
                field: "editor_content.markup",
                reason: "exceeds max body size",
            });
        }
        if self.plain_text.len() > MAX_DOCUMENT_BODY_BYTES {
            return Err(ContractViolation::InvalidValue {
                field: "editor_content.plain_text",
                reason: "exceeds max body size",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub body: EditorContent,
}

impl Document {
    pub fn untitled() -> Self {
        Self {
            title: DEFAULT_DOCUMENT_TITLE.to_string(),
            body: EditorContent::default(),
        }
    }

    pub fn v1(title: String, body: EditorContent) -> Result<Self, ContractViolation> {
        let document = Self { title, body };
        document.validate()?;
        Ok(document)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::untitled()
    }
}

impl Validate for Document {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_document_title(&self.title)?;
        self.body.validate()
    }
}

pub fn validate_document_title(title: &str) -> Result<(), ContractViolation> {
    validate_label("document.title", title, MAX_DOCUMENT_TITLE_CHARS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditorSurfaceMode {
    NotMounted,
    /// The editing surface is replaced outright while the listening gate runs.
    ListeningPlaceholder {
        remaining_secs: u32,
        remaining_label: String,
    },
    Editable,
    CompletionPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorView {
    pub editable: bool,
    pub toolbar_visible: bool,
    pub surface: EditorSurfaceMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Docx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain;charset=utf-8",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub sha256_hex: String,
}

impl Validate for ExportArtifact {
    fn validate(&self) -> Result<(), ContractViolation> {
        let suffix = format!(".{}", self.format.extension());
        if !self.file_name.ends_with(&suffix) {
            return Err(ContractViolation::InvalidValue {
                field: "export_artifact.file_name",
                reason: "must end with the format extension",
            });
        }
        if self.mime_type != self.format.mime_type() {
            return Err(ContractViolation::InvalidValue {
                field: "export_artifact.mime_type",
                reason: "must match the format",
            });
        }
        if self.sha256_hex.len() != 64
            || !self.sha256_hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ContractViolation::InvalidValue {
                field: "export_artifact.sha256_hex",
                reason: "must be 64 hex characters",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_document_contract_01_title_rejects_control_characters() {
        assert!(Document::v1("Essay\u{0007}".to_string(), EditorContent::default()).is_err());
        assert!(Document::v1("निबंध".to_string(), EditorContent::default()).is_ok());
    }

    #[test]
    fn at_document_contract_02_untitled_default() {
        let doc = Document::default();
        assert_eq!(doc.title, DEFAULT_DOCUMENT_TITLE);
        assert!(doc.body.is_empty());
    }

    #[test]
    fn at_document_contract_03_export_format_metadata() {
        assert_eq!(ExportFormat::Text.extension(), "txt");
        assert_eq!(ExportFormat::Docx.extension(), "docx");
        assert!(ExportFormat::Docx.mime_type().contains("wordprocessingml"));
    }
}
