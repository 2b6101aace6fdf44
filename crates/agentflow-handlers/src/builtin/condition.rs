use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use agentflow_core::traits::NodeHandler;
use agentflow_core::{HandlerContext, HandlerError, NodeConfig, NodeInputs, Payload};

/// Evaluates the node's `expression` against its inputs.
///
/// The evaluation scope is built from the run input and then each predecessor
/// output in id order: object payloads contribute their fields, any other
/// payload is bound under the predecessor id. Later entries win.
///
/// Output: `{"matched": bool, "expression": ..., "inputs": ...}`.
pub struct ConditionHandler;

impl NodeHandler for ConditionHandler {
    fn name(&self) -> &str {
        "condition"
    }

    fn invoke(
        &self,
        ctx: HandlerContext,
        config: NodeConfig,
        inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>> {
        Box::pin(async move {
            let expr = config
                .get("expression")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| HandlerError::permanent("condition has no expression"))?;

            let scope = build_scope(&ctx.run_input, &inputs);
            let matched = evaluate_condition(expr, &scope);
            debug!(node_id = %ctx.node_id, expression = expr, matched, "Condition evaluated");

            Ok(json!({
                "matched": matched,
                "expression": expr,
                "inputs": Payload::Object(scope),
            }))
        })
    }
}

fn build_scope(run_input: &Payload, inputs: &NodeInputs) -> serde_json::Map<String, Payload> {
    let mut scope = serde_json::Map::new();
    if let Payload::Object(fields) = run_input {
        scope.extend(fields.clone());
    }
    for (id, payload) in inputs {
        match payload {
            Payload::Object(fields) => scope.extend(fields.clone()),
            other => {
                scope.insert(id.to_string(), other.clone());
            }
        }
    }
    scope
}

/// Evaluate a simple conditional expression against a scope.
///
/// Supported expressions:
/// - `key == "value"`
/// - `key != "value"`
/// - `key contains "substr"`
/// - `key exists`
///
/// Keys may be dotted paths into nested objects (`user.name`). Numbers and
/// booleans compare by their JSON text. Unparseable expressions are `false`.
pub fn evaluate_condition(expr: &str, scope: &serde_json::Map<String, Payload>) -> bool {
    let expr = expr.trim();

    if let Some(key) = expr.strip_suffix(" exists") {
        return lookup(scope, key.trim()).is_some_and(|v| !v.is_null());
    }

    if let Some((key, substr)) = parse_operator(expr, " contains ") {
        return lookup(scope, key).is_some_and(|v| match v {
            Payload::String(s) => s.contains(substr),
            Payload::Array(items) => items.iter().any(|i| text_of(i) == substr),
            _ => false,
        });
    }

    if let Some((key, value)) = parse_operator(expr, "!=") {
        return lookup(scope, key).is_some_and(|v| text_of(v) != value);
    }

    if let Some((key, value)) = parse_operator(expr, "==") {
        return lookup(scope, key).is_some_and(|v| text_of(v) == value);
    }

    false
}

/// Parse `key OP "value"`, returning (key, value).
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (key, val) = expr.split_once(op)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, val.trim().trim_matches('"')))
}

fn lookup<'a>(scope: &'a serde_json::Map<String, Payload>, path: &str) -> Option<&'a Payload> {
    let mut parts = path.split('.');
    let mut current = scope.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Payload::Object(fields) => fields.get(part)?,
            Payload::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn text_of(value: &Payload) -> String {
    match value {
        Payload::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn scope(value: Payload) -> serde_json::Map<String, Payload> {
        match value {
            Payload::Object(m) => m,
            _ => panic!("scope must be an object"),
        }
    }

    #[test]
    fn test_condition_equals() {
        let s = scope(json!({"status": "success", "count": 3}));
        assert!(evaluate_condition(r#"status == "success""#, &s));
        assert!(!evaluate_condition(r#"status == "failure""#, &s));
        assert!(evaluate_condition("count == 3", &s));
    }

    #[test]
    fn test_condition_not_equals() {
        let s = scope(json!({"status": "success"}));
        assert!(evaluate_condition(r#"status != "failure""#, &s));
        assert!(!evaluate_condition(r#"status != "success""#, &s));
    }

    #[test]
    fn test_condition_contains() {
        let s = scope(json!({
            "output": "The file was created successfully.",
            "tags": ["rust", "tokio"],
        }));
        assert!(evaluate_condition(r#"output contains "created""#, &s));
        assert!(!evaluate_condition(r#"output contains "deleted""#, &s));
        assert!(evaluate_condition(r#"tags contains "tokio""#, &s));
    }

    #[test]
    fn test_condition_exists_and_paths() {
        let s = scope(json!({"user": {"name": "ada", "email": null}}));
        assert!(evaluate_condition("user.name exists", &s));
        assert!(!evaluate_condition("user.email exists", &s));
        assert!(evaluate_condition(r#"user.name == "ada""#, &s));
        assert!(!evaluate_condition("missing exists", &s));
    }

    #[test]
    fn test_condition_invalid_expr() {
        let s = serde_json::Map::new();
        assert!(!evaluate_condition("this is not valid", &s));
        assert!(!evaluate_condition(r#"== "x""#, &s));
    }

    #[tokio::test]
    async fn test_handler_merges_inputs() {
        let mut ctx = HandlerContext::detached("c");
        ctx.run_input = Arc::new(json!({"status": "draft"}));
        let mut inputs = NodeInputs::new();
        inputs.insert("a".into(), json!({"status": "ready"}));
        inputs.insert("b".into(), json!("plain text"));
        let mut config = NodeConfig::new();
        config.insert("expression".into(), json!(r#"status == "ready""#));

        let out = ConditionHandler.invoke(ctx, config, inputs).await.unwrap();
        assert_eq!(out["matched"], true);
        assert_eq!(out["inputs"]["b"], "plain text");
    }

    #[tokio::test]
    async fn test_missing_expression_is_permanent() {
        let err = ConditionHandler
            .invoke(HandlerContext::detached("c"), NodeConfig::new(), NodeInputs::new())
            .await
            .unwrap_err();
        assert_eq!(err, HandlerError::permanent("condition has no expression"));
    }
}
