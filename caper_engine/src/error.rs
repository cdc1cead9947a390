use caper_save::SaveError;
use thiserror::Error;

use crate::context::ResourceKind;

/// Fatal script-driver failures. Scripted content is static, so none of
/// these are retried; the active driver stops cleanly before the error
/// surfaces.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{kind} resource {id} not found")]
    ResourceNotFound { kind: ResourceKind, id: u16 },

    #[error("malformed script: {reason} at offset {offset:#x}")]
    MalformedScript { reason: String, offset: usize },

    #[error("dialogue node {node_id} cannot be resolved")]
    NodeResolution { node_id: i16 },

    #[error("speaker '{name}' not found (script {script})")]
    SpeakerNotFound { name: String, script: u16 },

    #[error("speaker registry is full ({limit} speakers)")]
    SpeakerLimit { limit: usize },

    #[error("save stream references missing object {handle}")]
    DanglingHandle { handle: u32 },

    #[error(transparent)]
    Save(#[from] SaveError),
}

impl ScriptError {
    pub fn malformed(reason: impl Into<String>, offset: usize) -> Self {
        ScriptError::MalformedScript {
            reason: reason.into(),
            offset,
        }
    }
}
