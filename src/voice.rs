//! The `VoicePipeline` collaborator: real-time voice I/O
//! (microphone capture, STT, TTS synthesis, echo cancellation) is entirely
//! out of scope for this engine — the engine only offers the Event Bus as
//! the delivery channel for `callerSpeech` and a narrow `speak` capability
//! the Controller Adapter's `say_to_caller` tool can call.

use async_trait::async_trait;

use crate::errors::HfpError;

#[async_trait]
pub trait VoicePipeline: Send + Sync {
    /// Synthesise and play `text`. Returns once playback *completes*; the
    /// Controller Adapter itself is responsible for not waiting on this
    /// ("return immediately" contract).
    async fn speak(&self, text: &str) -> Result<(), HfpError>;
}

/// Used when no TTS backend is configured; `say_to_caller` reports an error
/// result rather than guessing at a default.
pub struct NullVoicePipeline;

#[async_trait]
impl VoicePipeline for NullVoicePipeline {
    async fn speak(&self, _text: &str) -> Result<(), HfpError> {
        Err(HfpError::ToolError("no voice pipeline configured".into()))
    }
}
