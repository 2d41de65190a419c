use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use opsrag_agent::cluster::{register_cluster_tools, ClusterSnapshot, SnapshotCluster};
use opsrag_agent::fallback::{ANALYSIS_MARKER, DATA_MARKER};
use opsrag_agent::llm::{GenerationParams, LlmClient, LlmError};
use opsrag_agent::orchestrator::{AgentConfig, Orchestrator, Session, Termination, APOLOGY, CANCELLED};
use opsrag_agent::prompt::NO_CONTEXT;
use opsrag_agent::tools::{Tool, ToolRegistry};
use opsrag_core::chunker::{chunk_text, ChunkingConfig};
use opsrag_core::config::RetrievalSettings;
use opsrag_core::traits::ContextRetriever;
use opsrag_core::types::{Document, RetrievedChunk, Role, SourceKind, ToolArgs, ToolResult};

const GET_PODS: &str = r#"TOOL_CALL: {"tool": "get_pods", "args": {"namespace": "default"}}"#;

/// Replays canned replies and records every prompt it was sent.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    repeat_last: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), repeat_last: None, prompts: Mutex::default() })
    }

    fn forever(reply: &str) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::default(), repeat_last: Some(reply.into()), prompts: Mutex::default() })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => self.repeat_last.clone().ok_or(LlmError::Empty),
        }
    }
}

struct SlowLlm;

#[async_trait]
impl LlmClient for SlowLlm {
    fn model(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, LlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".into())
    }
}

struct StaticRetriever(Vec<RetrievedChunk>);

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, n: usize, _rerank: bool) -> Result<Vec<RetrievedChunk>> {
        Ok(self.0.iter().take(n).cloned().collect())
    }
}

struct FailingRetriever;

#[async_trait]
impl ContextRetriever for FailingRetriever {
    async fn retrieve(&self, _query: &str, _n: usize, _rerank: bool) -> Result<Vec<RetrievedChunk>> {
        Err(anyhow!("vector store directory missing"))
    }
}

fn knowledge() -> Arc<StaticRetriever> {
    let chunk = chunk_text("# Pods\nCrashLoopBackOff means the container keeps exiting.", "k8s_docs", ChunkingConfig::default())
        .remove(0);
    Arc::new(StaticRetriever(vec![RetrievedChunk {
        id: chunk.id,
        text: chunk.text,
        metadata: chunk.meta,
        score: 0.9,
        origin: SourceKind::Hybrid,
    }]))
}

fn tools() -> Arc<ToolRegistry> {
    let snapshot: ClusterSnapshot = serde_json::from_value(json!({
        "namespaces": [{ "name": "default" }],
        "nodes": [{ "name": "minikube", "status": "Ready" }],
        "pods": [
            { "name": "web-1", "namespace": "default", "status": "Running", "ready": "1/1" },
            { "name": "worker-1", "namespace": "default", "status": "CrashLoopBackOff", "ready": "0/1", "restarts": 9 }
        ]
    }))
    .unwrap();
    let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(5));
    register_cluster_tools(&mut registry, Arc::new(SnapshotCluster::new(snapshot)));
    Arc::new(registry)
}

fn orchestrator(retriever: Arc<dyn ContextRetriever>, llm: Option<Arc<dyn LlmClient>>) -> Orchestrator {
    Orchestrator::new(retriever, llm, tools(), AgentConfig::default())
}

#[tokio::test]
async fn show_pods_dispatches_once_and_embeds_pod_data() {
    let llm = ScriptedLlm::new(vec![Ok(GET_PODS.into()), Ok("One pod is crash looping; inspect its logs.".into())]);
    let agent = orchestrator(knowledge(), Some(llm.clone()));
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "show pods").await;

    assert_eq!(out.termination, Termination::NoToolRequest);
    assert_eq!(out.exchanges.len(), 1);
    assert!(out.exchanges[0].result.is_ok());
    assert_eq!(out.llm_calls, 2);
    assert!(out.fallback_applied);
    assert!(out.answer.starts_with(DATA_MARKER));
    assert!(out.answer.contains("! worker-1: status CrashLoopBackOff"));
    assert!(out.answer.contains(ANALYSIS_MARKER));
    assert!(out.answer.ends_with("One pod is crash looping; inspect its logs."));

    let prompts = llm.prompts();
    assert!(prompts[0].contains("Source: k8s_docs, Section: Pods"));
    assert!(prompts[0].contains("call a tool before answering"));
    assert!(prompts[1].contains("\"worker-1\""));

    assert_eq!(session.history().len(), 2);
    assert_eq!(session.history()[0].role, Role::User);
    assert_eq!(session.history()[1].text, out.answer);
}

#[tokio::test]
async fn adversarial_llm_is_bounded_by_the_tool_budget() {
    let llm = ScriptedLlm::forever(GET_PODS);
    let agent = orchestrator(knowledge(), Some(llm.clone()));
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "show pods").await;

    assert_eq!(out.termination, Termination::ToolBudgetExhausted);
    assert_eq!(out.exchanges.len(), 3);
    assert_eq!(out.llm_calls, 4);
    assert!(llm.prompts()[3].contains("No tool calls remain"));
    assert!(out.answer.contains(DATA_MARKER) && out.answer.contains(ANALYSIS_MARKER));
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model_and_the_turn_finishes() {
    let llm = ScriptedLlm::new(vec![
        Ok(r#"TOOL_CALL: {"tool": "delete_cluster", "args": {}}"#.into()),
        Ok("That operation is not available.".into()),
    ]);
    let agent = orchestrator(knowledge(), Some(llm.clone()));
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "delete everything").await;

    assert_eq!(out.termination, Termination::NoToolRequest);
    match &out.exchanges[0].result {
        ToolResult::Error { tool, reason, .. } => {
            assert_eq!(tool, "delete_cluster");
            assert!(reason.contains("unknown tool"));
        }
        other => panic!("expected a structured error, got {other:?}"),
    }
    assert!(llm.prompts()[1].contains("unknown tool"));
    assert!(out.answer.contains("error: unknown tool"));
}

#[tokio::test]
async fn llm_failure_apologises_and_leaves_the_session_alone() {
    let llm = ScriptedLlm::new(vec![Err(LlmError::Empty)]);
    let agent = orchestrator(knowledge(), Some(llm));
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "why do pods restart?").await;

    assert_eq!(out.termination, Termination::LlmError);
    assert_eq!(out.answer, APOLOGY);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn llm_failure_after_a_tool_still_shows_the_data() {
    let llm = ScriptedLlm::new(vec![Ok(GET_PODS.into()), Err(LlmError::Decode("garbage".into()))]);
    let agent = orchestrator(knowledge(), Some(llm));
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "show pods").await;

    assert_eq!(out.termination, Termination::LlmError);
    assert!(out.answer.starts_with(DATA_MARKER));
    assert!(out.answer.contains("worker-1"));
    assert!(out.answer.ends_with(APOLOGY));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn retrieval_failure_becomes_a_placeholder() {
    let llm = ScriptedLlm::new(vec![Ok("Pods restart when their container exits.".into())]);
    let agent = orchestrator(Arc::new(FailingRetriever), Some(llm.clone()));
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "why do pods restart?").await;

    assert_eq!(out.termination, Termination::NoToolRequest);
    assert!(out.context.is_empty());
    assert!(llm.prompts()[0].contains(NO_CONTEXT));
    assert_eq!(out.answer, "Pods restart when their container exits.");
}

#[tokio::test]
async fn cancelled_turn_leaves_no_trace() {
    let agent = orchestrator(knowledge(), Some(Arc::new(SlowLlm)));
    let mut session = Session::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let out = agent.run_turn_cancellable(&mut session, "show pods", &cancel).await;

    assert_eq!(out.termination, Termination::Cancelled);
    assert_eq!(out.answer, CANCELLED);
    assert!(session.history().is_empty());
}

/// A slow fetch that records whether it ran to completion.
struct SlowFetch {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Tool for SlowFetch {
    fn name(&self) -> &str {
        "get_pods"
    }
    fn description(&self) -> &str {
        "List pods slowly."
    }
    async fn call(&self, _args: &ToolArgs) -> anyhow::Result<serde_json::Value> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(json!({ "pods": [] }))
    }
}

#[tokio::test]
async fn cancelling_during_dispatch_stops_the_tool() {
    let finished = Arc::new(AtomicBool::new(false));
    let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(5));
    registry.register(Arc::new(SlowFetch { finished: finished.clone() }));
    let llm = ScriptedLlm::forever(GET_PODS);
    let agent = Orchestrator::new(knowledge(), Some(llm), Arc::new(registry), AgentConfig::default());
    let mut session = Session::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let out = agent.run_turn_cancellable(&mut session, "show pods", &cancel).await;
    assert_eq!(out.termination, Termination::Cancelled);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!finished.load(Ordering::SeqCst), "tool kept running after the turn was cancelled");
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn slow_llm_times_out() {
    let config = AgentConfig { llm_timeout: Duration::from_millis(50), ..Default::default() };
    let agent = Orchestrator::new(knowledge(), Some(Arc::new(SlowLlm)), tools(), config);
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "why do pods restart?").await;

    assert_eq!(out.termination, Termination::LlmError);
    assert_eq!(out.answer, APOLOGY);
}

#[tokio::test]
async fn without_an_llm_the_turn_is_retrieval_only() {
    let agent = orchestrator(knowledge(), None);
    let mut session = Session::new();

    let out = agent.run_turn(&mut session, "CrashLoopBackOff").await;

    assert_eq!(out.termination, Termination::RetrievalOnly);
    assert_eq!(out.llm_calls, 0);
    assert!(out.answer.contains("CrashLoopBackOff means the container keeps exiting."));
    assert!(out.answer.contains("retrieval-only"));
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn history_carries_into_the_next_prompt() {
    let llm = ScriptedLlm::new(vec![Ok("First answer.".into()), Ok("Second answer.".into())]);
    let agent = orchestrator(knowledge(), Some(llm.clone()));
    let mut session = Session::new();

    agent.run_turn(&mut session, "what is a pod?").await;
    agent.run_turn(&mut session, "and a node?").await;

    let prompts = llm.prompts();
    assert!(!prompts[0].contains("Chat history:"));
    assert!(prompts[1].contains("User: what is a pod?\nAssistant: First answer.\n"));
    assert_eq!(session.history().len(), 4);
}

#[tokio::test]
async fn end_to_end_over_the_hybrid_engine() {
    use opsrag_embed::FakeEmbedder;
    use opsrag_hybrid::HybridSearchEngine;
    use opsrag_text::TantivyLexicalIndex;
    use opsrag_vector::MemoryVectorStore;

    let engine = HybridSearchEngine::new(
        Arc::new(FakeEmbedder::new(64)),
        MemoryVectorStore::new(),
        TantivyLexicalIndex::new().unwrap(),
        RetrievalSettings::default(),
        ChunkingConfig::default(),
    );
    let docs = vec![
        Document {
            id: "nodes".into(),
            source: "k8s_docs".into(),
            resource_type: Some("troubleshooting".into()),
            text: "# Nodes\nA node becomes NotReady when kubelet stops posting heartbeats.".into(),
            metadata: Default::default(),
        },
        Document {
            id: "ingress".into(),
            source: "k8s_docs".into(),
            resource_type: None,
            text: "# Ingress\nIngress controllers terminate TLS for external traffic.".into(),
            metadata: Default::default(),
        },
    ];
    engine.ingest(&docs).await.unwrap();

    let llm = ScriptedLlm::new(vec![Ok("Check the kubelet on that node.".into())]);
    let agent = orchestrator(Arc::new(engine), Some(llm.clone()));
    let mut session = Session::new();
    let out = agent.run_turn(&mut session, "node NotReady kubelet heartbeats").await;

    assert_eq!(out.context[0].metadata.heading, "Nodes");
    assert!(llm.prompts()[0].contains("Document 1 (Source: k8s_docs, Section: Nodes)"));
    assert_eq!(out.answer, "Check the kubelet on that node.");
}

#[tokio::test]
async fn snapshot_file_backs_the_cluster_tools() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.json");
    std::fs::write(&path, r#"{"nodes": [{"name": "n1", "status": "NotReady"}]}"#).unwrap();

    let mut registry = ToolRegistry::new();
    register_cluster_tools(&mut registry, Arc::new(SnapshotCluster::from_file(&path).unwrap()));
    let out = registry.dispatch(&opsrag_core::types::ToolRequest::new("get_nodes")).await;
    assert_eq!(out.payload().unwrap()["nodes"][0]["status"], "NotReady");

    assert!(SnapshotCluster::from_file(&dir.path().join("missing.json")).is_err());
}
