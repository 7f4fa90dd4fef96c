//! Completion Client: one request/response exchange with a remote
//! text-completion service.

pub mod openai;

use crate::document::ModelId;
use crate::error::Result;
use async_trait::async_trait;

pub use openai::OpenAIChatClient;

/// Remote text completion, applied as `instruction` (system role) over
/// `body` (user role).
///
/// Implementations must not retry. Failures are reported as
/// [`DistillError::RemoteUnavailable`](crate::DistillError::RemoteUnavailable)
/// when no credential is bound, and
/// [`DistillError::Remote`](crate::DistillError::Remote) otherwise.
/// An absent completion is returned as an empty string.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, model: &ModelId, body: &str, instruction: &str) -> Result<String>;
}
