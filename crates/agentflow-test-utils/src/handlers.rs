use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use agentflow_core::traits::NodeHandler;
use agentflow_core::{HandlerContext, HandlerError, NodeConfig, NodeId, NodeInputs, Payload};

/// Shared invocation counter that outlives the handler it was taken from.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A handler that returns scripted results in order.
///
/// Once the script is exhausted the last result repeats.
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<Payload, HandlerError>>>,
    last: Mutex<Option<Result<Payload, HandlerError>>>,
    calls: CallCounter,
    delay: Option<Duration>,
    max_retries: Option<u32>,
}

impl ScriptedHandler {
    pub fn new(script: Vec<Result<Payload, HandlerError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: CallCounter::default(),
            delay: None,
            max_retries: None,
        }
    }

    pub fn always_ok(output: Payload) -> Self {
        Self::new(vec![Ok(output)])
    }

    pub fn always_err(error: HandlerError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Fail transiently `n` times, then succeed with `output`.
    pub fn flaky(n: usize, output: Payload) -> Self {
        let mut script: Vec<_> = (0..n)
            .map(|i| Err(HandlerError::transient(format!("flake {}", i + 1))))
            .collect();
        script.push(Ok(output));
        Self::new(script)
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    fn next_result(&self) -> Result<Payload, HandlerError> {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(HandlerError::permanent("script is empty"))),
        }
    }
}

impl NodeHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(
        &self,
        _ctx: HandlerContext,
        _config: NodeConfig,
        _inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>> {
        Box::pin(async move {
            self.calls.bump();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.next_result()
        })
    }

    fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub node_id: NodeId,
    pub attempt: u32,
    pub identity: Option<String>,
    pub config: NodeConfig,
    pub inputs: NodeInputs,
}

/// A handler that records every call and answers `{"node": <id>}`.
///
/// Also tracks how many calls were in flight at once, for worker-pool tests.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls for one node, in order.
    pub fn calls_for(&self, id: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.node_id.as_str() == id)
            .collect()
    }

    /// Node ids in call order.
    pub fn order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.node_id.0).collect()
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl NodeHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    fn invoke(
        &self,
        ctx: HandlerContext,
        config: NodeConfig,
        inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(RecordedCall {
                node_id: ctx.node_id.clone(),
                attempt: ctx.attempt,
                identity: ctx.identity.clone(),
                config,
                inputs,
            });
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "node": ctx.node_id.as_str() }))
        })
    }
}
