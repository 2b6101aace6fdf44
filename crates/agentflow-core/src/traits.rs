use futures::future::BoxFuture;

use crate::error::HandlerError;
use crate::types::{HandlerContext, NodeConfig, NodeInputs, Payload};

/// Node handler: the work behind one node kind.
///
/// The engine treats handlers as opaque async capabilities. A handler receives
/// its node's config and the merged outputs of all direct predecessors, and
/// either returns an output payload or a classified failure.
///
/// Handlers are retried on `Transient` failures, so they must be idempotent or
/// safely retryable. Handlers that cannot guarantee this return `Some(0)` from
/// `max_retries`.
pub trait NodeHandler: Send + Sync + 'static {
    /// Short handler name for logs.
    fn name(&self) -> &str;

    /// Run one attempt.
    fn invoke(
        &self,
        ctx: HandlerContext,
        config: NodeConfig,
        inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>>;

    /// Retry cap declared by the handler; `None` defers to the engine policy.
    fn max_retries(&self) -> Option<u32> {
        None
    }
}
