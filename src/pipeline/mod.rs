pub mod agents;
pub mod aggregator;
pub mod error;
pub mod llm;
pub mod normalize;
pub mod orchestrator; // segment → agents → aggregate → normalize → validate
pub mod segmenter;
pub mod sink; // RecordStore / DocumentIndexer collaborators
pub mod stats;
pub mod validation;

pub use error::PipelineError;
pub use orchestrator::{BatchOutcome, CancelHandle, DocumentFailure, DocumentOutcome, ExtractionPipeline};
