//! Contract between the compression controller and whatever performs the encode.

use std::path::Path;

use async_trait::async_trait;

use crate::args::EncodeInvocation;
use crate::error::EngineError;

/// Receives completion fractions in `[0, 1]` while one invocation runs.
///
/// Borrowed for exactly one `encode` call, so a listener can never outlive the
/// pass it was registered for.
pub type ProgressListener<'a> = &'a (dyn Fn(f64) + Send + Sync);

#[async_trait]
pub trait EncodingEngine: Send {
    /// Runs one invocation to completion or failure.
    async fn encode(
        &mut self,
        invocation: &EncodeInvocation,
        progress: Option<ProgressListener<'_>>,
    ) -> Result<(), EngineError>;

    /// Byte length of a produced artifact.
    async fn output_size(&self, output: &Path) -> Result<u64, EngineError>;
}
