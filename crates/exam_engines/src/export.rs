#![forbid(unsafe_code)]

use std::io::{Cursor, Write};

use exam_kernel_contracts::document::{
    validate_document_title, ExportArtifact, ExportFormat, DEFAULT_DOCUMENT_TITLE,
};
use exam_kernel_contracts::{ContractViolation, Validate};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub mod reason_codes {
    use exam_kernel_contracts::ReasonCodeId;

    // EXPORT reason-code namespace.
    pub const EXPORT_OK_TEXT: ReasonCodeId = ReasonCodeId(0x4558_0001);
    pub const EXPORT_OK_DOCX: ReasonCodeId = ReasonCodeId(0x4558_0002);

    pub const EXPORT_INPUT_INVALID: ReasonCodeId = ReasonCodeId(0x4558_00F1);
    pub const EXPORT_DOCX_ENCODING_FAILED: ReasonCodeId = ReasonCodeId(0x4558_00F2);
}

pub const DOCX_FALLBACK_MESSAGE: &str =
    "Error creating Word document. Please try downloading as text instead.";

#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    DocxEncoding(String),
    ContractViolation(ContractViolation),
}

impl ExportError {
    pub fn reason_code(&self) -> exam_kernel_contracts::ReasonCodeId {
        match self {
            Self::DocxEncoding(_) => reason_codes::EXPORT_DOCX_ENCODING_FAILED,
            Self::ContractViolation(_) => reason_codes::EXPORT_INPUT_INVALID,
        }
    }

    /// Message for the candidate; encoding failures point at the text download.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DocxEncoding(_) => DOCX_FALLBACK_MESSAGE,
            Self::ContractViolation(_) => "The document could not be exported.",
        }
    }
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DocxEncoding(reason) => write!(f, "docx encoding failed: {reason}"),
            Self::ContractViolation(v) => write!(f, "export contract violation: {v}"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<ContractViolation> for ExportError {
    fn from(value: ContractViolation) -> Self {
        Self::ContractViolation(value)
    }
}

impl From<zip::result::ZipError> for ExportError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::DocxEncoding(value.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::DocxEncoding(value.to_string())
    }
}

/// Produces the word-processor container from the plain-text projection.
pub trait DocumentEncoder {
    fn encode_docx(&self, plain_text: &str) -> Result<Vec<u8>, ExportError>;
}

/// Minimal WordprocessingML package: one paragraph per line, stored entries, fixed timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipDocxEncoder;

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#,
);

const PACKAGE_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"</Relationships>"#,
);

impl DocumentEncoder for ZipDocxEncoder {
    fn encode_docx(&self, plain_text: &str) -> Result<Vec<u8>, ExportError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(DateTime::default());
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(CONTENT_TYPES_XML.as_bytes())?;
        zip.start_file("_rels/.rels", options)?;
        zip.write_all(PACKAGE_RELS_XML.as_bytes())?;
        zip.start_file("word/document.xml", options)?;
        zip.write_all(document_xml(plain_text).as_bytes())?;
        Ok(zip.finish()?.into_inner())
    }
}

fn document_xml(plain_text: &str) -> String {
    let mut xml = String::from(concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
        "<w:body>",
    ));
    for line in plain_text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        // Word collapses an empty paragraph with no run; keep the line visible.
        let text = if line.is_empty() { " " } else { line };
        xml.push_str(r#"<w:p><w:r><w:t xml:space="preserve">"#);
        xml.push_str(&escape_xml(text));
        xml.push_str("</w:t></w:r></w:p>");
    }
    xml.push_str("</w:body></w:document>");
    xml
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct DocumentExporter<E = ZipDocxEncoder>
where
    E: DocumentEncoder,
{
    encoder: E,
}

impl DocumentExporter<ZipDocxEncoder> {
    pub fn new() -> Self {
        Self {
            encoder: ZipDocxEncoder,
        }
    }
}

impl<E> DocumentExporter<E>
where
    E: DocumentEncoder,
{
    pub fn with_encoder(encoder: E) -> Self {
        Self { encoder }
    }

    pub fn export_as_text(
        &self,
        title: &str,
        plain_text: &str,
    ) -> Result<ExportArtifact, ExportError> {
        self.artifact(ExportFormat::Text, title, plain_text.as_bytes().to_vec())
    }

    pub fn export_as_docx(
        &self,
        title: &str,
        plain_text: &str,
    ) -> Result<ExportArtifact, ExportError> {
        let bytes = self.encoder.encode_docx(plain_text).map_err(|err| {
            tracing::warn!(error = %err, "docx export failed");
            err
        })?;
        self.artifact(ExportFormat::Docx, title, bytes)
    }

    fn artifact(
        &self,
        format: ExportFormat,
        title: &str,
        bytes: Vec<u8>,
    ) -> Result<ExportArtifact, ExportError> {
        validate_document_title(title)?;
        let artifact = ExportArtifact {
            format,
            file_name: export_file_name(title, format),
            mime_type: format.mime_type().to_string(),
            sha256_hex: sha256_hex(&bytes),
            bytes,
        };
        artifact.validate()?;
        tracing::debug!(
            file_name = %artifact.file_name,
            size = artifact.bytes.len(),
            "document exported"
        );
        Ok(artifact)
    }
}

/// `"{title}.{ext}"`; a blank title falls back to the default document title.
pub fn export_file_name(title: &str, format: ExportFormat) -> String {
    let stem = if title.trim().is_empty() {
        DEFAULT_DOCUMENT_TITLE
    } else {
        title
    };
    format!("{stem}.{}", format.extension())
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
