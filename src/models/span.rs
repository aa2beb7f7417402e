use serde::{Deserialize, Serialize};

/// Document text handed over by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_document_id: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(source_document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_document_id: source_document_id.into(),
            text: text.into(),
        }
    }
}

/// Contiguous region of a document attributed to one patient.
///
/// Offsets are byte offsets into the UTF-8 document text, `end_offset` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSpan {
    pub patient_label: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl DocumentSpan {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }
}
