//! Service layer for prism
//!
//! The two owners of user-triggered operations: the image pipeline and the
//! chat session. They share the inference client but no mutable state.

pub mod chat;
pub mod pipeline;

pub use chat::{ChatSession, FAILURE_REPLY_PREFIX};
pub use pipeline::{
    ArtifactId, DescriptionState, GeneratedArtifact, GenerationPipeline, PipelineEvent,
};
