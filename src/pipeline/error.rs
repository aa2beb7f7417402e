use thiserror::Error;

use super::segmenter::SegmentationError;

/// Document-level failures. None of them affects sibling documents.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("Document extraction was cancelled before it started")]
    Cancelled,

    #[error("Document task failed: {0}")]
    TaskFailed(String),
}
