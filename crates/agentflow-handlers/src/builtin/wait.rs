use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use agentflow_core::traits::NodeHandler;
use agentflow_core::{HandlerContext, HandlerError, NodeConfig, NodeInputs, Payload};

/// Delays the pipeline by `seconds` (fractional allowed), then forwards its
/// single input.
pub struct WaitHandler;

impl NodeHandler for WaitHandler {
    fn name(&self) -> &str {
        "wait"
    }

    fn invoke(
        &self,
        ctx: HandlerContext,
        config: NodeConfig,
        inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>> {
        Box::pin(async move {
            let seconds = match config.get("seconds") {
                None => 1.0,
                Some(v) => v
                    .as_f64()
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .ok_or_else(|| {
                        HandlerError::permanent(format!("invalid wait duration: {}", v))
                    })?,
            };
            let delay = Duration::try_from_secs_f64(seconds).map_err(|e| {
                HandlerError::permanent(format!("invalid wait duration {}: {}", seconds, e))
            })?;
            debug!(node_id = %ctx.node_id, delay_ms = delay.as_millis() as u64, "Waiting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => {
                    return Err(HandlerError::permanent("wait cancelled"));
                }
            }

            Ok(inputs.into_values().next().unwrap_or(Payload::Null))
        })
    }

    fn max_retries(&self) -> Option<u32> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(seconds: Payload) -> NodeConfig {
        let mut config = NodeConfig::new();
        config.insert("seconds".into(), seconds);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_then_forwards() {
        let mut inputs = NodeInputs::new();
        inputs.insert("a".into(), json!({"k": "v"}));
        let start = tokio::time::Instant::now();
        let out = WaitHandler
            .invoke(HandlerContext::detached("w"), config(json!(5)), inputs)
            .await
            .unwrap();
        assert_eq!(out, json!({"k": "v"}));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_negative_duration_is_permanent() {
        let err = WaitHandler
            .invoke(HandlerContext::detached("w"), config(json!(-1)), NodeInputs::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_oversized_duration_is_permanent() {
        let err = WaitHandler
            .invoke(HandlerContext::detached("w"), config(json!(1e30)), NodeInputs::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().starts_with("invalid wait duration"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let ctx = HandlerContext::detached("w");
        let cancel = ctx.cancel.clone();
        let task = tokio::spawn(async move {
            WaitHandler
                .invoke(ctx, config(json!(600)), NodeInputs::new())
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.message(), "wait cancelled");
    }
}
