//! Tool trait and registry.
//!
//! Tools are registered explicitly at startup; the registry is the only way
//! the orchestrator reaches the cluster. Dispatch never fails: every problem
//! (unknown name, missing argument, tool error, panic, timeout) comes back as
//! a [`ToolResult::Error`] that is shown to the LLM on the next iteration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, instrument, warn};

use opsrag_core::error::Error;
use opsrag_core::types::{ArgValue, ToolArgs, ToolRequest, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// A named read-only data fetch with keyword arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, args: &ToolArgs) -> anyhow::Result<Value>;
}

/// One request and its outcome, in dispatch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub request: ToolRequest,
    pub result: ToolResult,
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Insertion order for deterministic listings
    order: Vec<String>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), order: Vec::new(), timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers `tool`, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool catalogue for the system prompt, one line per tool.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for tool in self.order.iter().filter_map(|n| self.tools.get(n)) {
            let params: Vec<String> = tool
                .params()
                .iter()
                .map(|p| if p.required { p.name.to_string() } else { format!("{}?", p.name) })
                .collect();
            out.push_str(&format!("- {}({}): {}\n", tool.name(), params.join(", "), tool.description()));
        }
        out
    }

    #[instrument(skip_all, fields(tool = %request.tool))]
    pub async fn dispatch(&self, request: &ToolRequest) -> ToolResult {
        let fail = |reason: String| {
            let err = Error::ToolExecution { tool: request.tool.clone(), reason: reason.clone() };
            warn!(error = %err, "tool dispatch failed");
            ToolResult::Error { tool: request.tool.clone(), args: request.args.clone(), reason }
        };

        let Some(tool) = self.get(&request.tool) else {
            return fail(format!("unknown tool `{}`; available: {}", request.tool, self.names().join(", ")));
        };

        if let Some(missing) = tool.params().iter().find(|p| p.required && is_blank(request.args.get(p.name))) {
            return fail(format!("missing required argument `{}`", missing.name));
        }

        // Spawned so a panicking tool surfaces as a join error. The handle
        // aborts the task when dropped, which covers both the timeout and a
        // caller dropping this future on cancellation.
        let args = request.args.clone();
        let task = AbortOnDropHandle::new(tokio::spawn(async move { tool.call(&args).await }));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(payload))) => {
                debug!("tool returned");
                ToolResult::Ok(payload)
            }
            Ok(Ok(Err(e))) => fail(format!("{e:#}")),
            Ok(Err(join)) => fail(format!("tool crashed: {join}")),
            Err(_) => fail(format!("timed out after {}s", self.timeout.as_secs_f32())),
        }
    }
}

fn is_blank(value: Option<&ArgValue>) -> bool {
    match value {
        None | Some(ArgValue::Null) => true,
        Some(ArgValue::Str(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the message back."
        }
        fn params(&self) -> &[ParamSpec] {
            &[ParamSpec { name: "message", required: true, description: "text" }]
        }
        async fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
            Ok(json!({ "echo": args.get("message").map(ToString::to_string) }))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails."
        }
        async fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
            Err(anyhow!("connection refused"))
        }
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "Panics."
        }
        async fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
            panic!("boom")
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Tool for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }
        fn description(&self) -> &str {
            "Sleeps."
        }
        async fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }
    }

    /// Raises `finished` only if its sleep runs to completion.
    struct Flagged {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for Flagged {
        fn name(&self) -> &str {
            "flagged"
        }
        fn description(&self) -> &str {
            "Sleeps, then records that it finished."
        }
        async fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new().with_timeout(Duration::from_millis(50));
        r.register(Arc::new(Echo));
        r.register(Arc::new(Broken));
        r.register(Arc::new(Panics));
        r.register(Arc::new(Sleeper));
        r
    }

    #[tokio::test]
    async fn dispatch_returns_payload() {
        let req = ToolRequest::new("echo").with_arg("message", ArgValue::Str("hi".into()));
        let out = registry().dispatch(&req).await;
        assert_eq!(out, ToolResult::Ok(json!({ "echo": "hi" })));
    }

    #[tokio::test]
    async fn every_failure_is_a_structured_error() {
        let r = registry();
        let unknown = r.dispatch(&ToolRequest::new("get_pods")).await;
        assert!(unknown.error_reason().unwrap().contains("unknown tool"));

        let missing = r.dispatch(&ToolRequest::new("echo").with_arg("message", ArgValue::Str(" ".into()))).await;
        assert!(missing.error_reason().unwrap().contains("message"));

        let failed = r.dispatch(&ToolRequest::new("broken").with_arg("namespace", ArgValue::Str("kube-system".into()))).await;
        match failed {
            ToolResult::Error { tool, args, reason } => {
                assert_eq!(tool, "broken");
                assert_eq!(args.get("namespace"), Some(&ArgValue::Str("kube-system".into())));
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected error, got {other:?}"),
        }

        assert!(r.dispatch(&ToolRequest::new("panics")).await.error_reason().unwrap().contains("crashed"));
        assert!(r.dispatch(&ToolRequest::new("sleeper")).await.error_reason().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn timed_out_tool_is_aborted() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut r = ToolRegistry::new().with_timeout(Duration::from_millis(20));
        r.register(Arc::new(Flagged { finished: finished.clone() }));

        let out = r.dispatch(&ToolRequest::new("flagged")).await;
        assert!(out.error_reason().unwrap().contains("timed out"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst), "tool kept running after the timeout");
    }

    #[tokio::test]
    async fn dropping_dispatch_aborts_the_tool() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut r = ToolRegistry::new().with_timeout(Duration::from_secs(5));
        r.register(Arc::new(Flagged { finished: finished.clone() }));

        let request = ToolRequest::new("flagged");
        let cut_short = tokio::time::timeout(Duration::from_millis(20), r.dispatch(&request)).await;
        assert!(cut_short.is_err());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst), "tool kept running after its caller gave up");
    }

    #[test]
    fn registration_keeps_order_and_replaces_by_name() {
        let mut r = registry();
        r.register(Arc::new(Echo));
        assert_eq!(r.names(), vec!["echo", "broken", "panics", "sleeper"]);
        assert_eq!(r.len(), 4);
        assert!(r.describe().starts_with("- echo(message): Echo the message back.\n"));
    }
}
