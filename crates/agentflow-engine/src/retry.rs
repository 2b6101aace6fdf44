use std::time::Duration;

use agentflow_core::config::EngineConfig;
use agentflow_core::traits::NodeHandler;
use agentflow_graph::NodeKind;

/// Retry budget and backoff for node attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// Retries allowed for one node: the engine budget capped by the kind's
    /// declared limit and the handler's own hint.
    pub fn budget(&self, kind: NodeKind, handler: Option<&dyn NodeHandler>) -> u32 {
        [
            Some(self.max_retries),
            kind.spec().max_retries,
            handler.and_then(|h| h.max_retries()),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0)
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        // Add jitter: 0.8x to 1.2x
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((ms as f64 * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Handler timeout for `kind`: config override by label, then the kind's own
/// limit, then the engine default.
pub fn timeout_for(config: &EngineConfig, kind: NodeKind) -> Duration {
    let secs = config
        .timeouts
        .get(kind.label())
        .copied()
        .or(kind.spec().timeout_secs)
        .unwrap_or(config.default_timeout_secs);
    Duration::from_secs(secs)
}
