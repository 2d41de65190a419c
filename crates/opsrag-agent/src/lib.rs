//! Agentic question answering over the hybrid retriever: tool registry,
//! cluster tools, tool-directive parsing, prompt and fallback formatting,
//! the LLM client and the bounded orchestration loop.

pub mod cluster;
pub mod directive;
pub mod fallback;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod tools;

pub use cluster::{register_cluster_tools, ClusterData, SnapshotCluster};
pub use llm::{GenerationParams, LlmClient, LlmError, OpenAiCompatClient};
pub use orchestrator::{AgentConfig, Orchestrator, Session, Termination, TurnOutcome};
pub use tools::{Tool, ToolExchange, ToolRegistry};
