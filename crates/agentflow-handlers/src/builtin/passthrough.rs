use futures::future::BoxFuture;

use agentflow_core::traits::NodeHandler;
use agentflow_core::{HandlerContext, HandlerError, NodeConfig, NodeInputs, Payload};

/// Forwards its inputs unchanged. Used for Trigger and Action nodes.
///
/// With no inputs the run input is emitted, so a Trigger hands whatever
/// started the run to its successors. A single input is forwarded as-is;
/// several are emitted as an object keyed by predecessor id.
pub struct PassthroughHandler;

impl NodeHandler for PassthroughHandler {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn invoke(
        &self,
        ctx: HandlerContext,
        _config: NodeConfig,
        inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>> {
        Box::pin(async move { Ok(forward(&ctx, inputs)) })
    }
}

fn forward(ctx: &HandlerContext, inputs: NodeInputs) -> Payload {
    if inputs.len() > 1 {
        let merged = inputs
            .into_iter()
            .map(|(id, payload)| (id.0, payload))
            .collect();
        return Payload::Object(merged);
    }
    match inputs.into_values().next() {
        Some(payload) => payload,
        None => (*ctx.run_input).clone(),
    }
}
