#![forbid(unsafe_code)]

use exam_kernel_contracts::document::{validate_document_title, Document, EditorContent};
use exam_kernel_contracts::Validate;

use crate::document_store::{DocumentStore, StorageError, DOCUMENT_CONTENT_KEY, DOCUMENT_TITLE_KEY};

/// What a manual save left behind. The title is optional because older saves wrote only the body;
/// an empty saved title reads as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDocument {
    pub title: Option<String>,
    pub body: EditorContent,
}

pub trait DocumentRepo {
    fn save_document_row(&mut self, document: &Document) -> Result<(), StorageError>;

    /// `Ok(None)` when no body has been saved, or the saved body is empty.
    fn load_document_row(&self) -> Result<Option<SavedDocument>, StorageError>;
}

impl<S> DocumentRepo for S
where
    S: DocumentStore + ?Sized,
{
    fn save_document_row(&mut self, document: &Document) -> Result<(), StorageError> {
        document.validate()?;
        let content = serde_json::to_string(&document.body)?;
        self.put(DOCUMENT_CONTENT_KEY, content)?;
        self.put(DOCUMENT_TITLE_KEY, document.title.clone())?;
        tracing::debug!(title = %document.title, "document saved");
        Ok(())
    }

    fn load_document_row(&self) -> Result<Option<SavedDocument>, StorageError> {
        let Some(raw) = self.get(DOCUMENT_CONTENT_KEY)?.filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        let body = serde_json::from_str::<EditorContent>(&raw)?;
        if body.markup.is_empty() {
            return Ok(None);
        }
        body.validate()?;
        let title = self
            .get(DOCUMENT_TITLE_KEY)?
            .filter(|title| !title.is_empty());
        if let Some(title) = &title {
            validate_document_title(title)?;
        }
        Ok(Some(SavedDocument { title, body }))
    }
}
