//! Media narration for lab write-ups: frame extraction, backend probing and the fallback
//! cascade from on-device vision down to text-only narration.

pub mod backends;
pub mod config;
pub mod embedded;
pub mod error;
pub mod frames;
pub mod orchestrator;
pub mod probe;

#[cfg(test)]
mod test_http;

pub use backends::{generate_text_only, AnalysisBackend, BackendRegistry};
pub use config::NarrationConfig;
pub use error::NarrationError;
pub use frames::{ExtractedFrame, FrameSource, MediaFrameExtractor};
pub use orchestrator::{
    LabNarration, MediaNarrationOutcome, NarrationMode, NarrationOptions, NarrationOrchestrator,
    NarrationProgress, ProgressSink, ProgressStage,
};
pub use probe::{AvailabilityProbe, BackendProbe, ProbeReport};
