use once_cell::sync::Lazy;
use regex::Regex;

use opsrag_core::types::{ConversationTurn, RetrievedChunk};

use crate::directive::DIRECTIVE_TOKEN;
use crate::fallback::{ANALYSIS_MARKER, DATA_MARKER};
use crate::tools::ToolExchange;

pub const NO_CONTEXT: &str = "No relevant information found in the knowledge base.";

/// Tool payloads longer than this are cut in the prompt.
const MAX_RESULT_CHARS: usize = 4000;

static LIVE_DATA_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(show|get|list|display|fetch)\b.*\b(pods?|nodes?|deployments?|services?|namespaces?)\b",
        r"\b(what|which)\b.*\b(pods?|nodes?|deployments?|services?|namespaces?)\b",
        r"\b(status|health|state)\b.*\b(cluster|minikube|pods?|nodes?|deployments?|services?)\b",
        r"\b(running|available)\b.*\b(pods?|nodes?|deployments?|services?)\b",
        r"\blogs?\b.*\b(pod|container)\b",
        r"\b(minikube|kubernetes|k8s|cluster)\b.*\b(status|info|information)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("live data pattern"))
    .collect()
});

/// Whether `query` asks about live cluster state rather than concepts.
pub fn is_live_data_query(query: &str) -> bool {
    let q = query.to_lowercase();
    LIVE_DATA_PATTERNS.iter().any(|re| re.is_match(&q))
}

pub fn system_instruction(tool_catalog: &str) -> String {
    format!(
        "You are a Kubernetes operations assistant. Answer using the knowledge base context and, \
when the question concerns the current state of the cluster, live data fetched with tools.\n\n\
Available tools:\n{tool_catalog}\n\
To call a tool, reply with exactly one line and nothing after it:\n\
{DIRECTIVE_TOKEN} {{\"tool\": \"<name>\", \"args\": {{\"<arg>\": \"<value>\"}}}}\n\
You will then receive the tool result and may call another tool or answer.\n\n\
When your answer uses tool results, structure it in two sections:\n\
{DATA_MARKER}\n<the relevant facts from the tool results>\n\
{ANALYSIS_MARKER}\n<your reasoning, diagnosis and next steps>\n"
    )
}

/// Retrieved chunks annotated with source and heading.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let meta = &c.metadata;
            let heading = if meta.heading.is_empty() { "-" } else { meta.heading.as_str() };
            format!("Document {} (Source: {}, Section: {heading}):\n{}", i + 1, meta.source, c.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_history(history: &[ConversationTurn]) -> String {
    history.iter().map(|t| format!("{}: {}\n", t.role, t.text)).collect()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((at, _)) => format!("{}... [truncated]", &s[..at]),
        None => s.to_string(),
    }
}

fn format_exchanges(exchanges: &[ToolExchange]) -> String {
    let mut out = String::new();
    for (i, ex) in exchanges.iter().enumerate() {
        let request =
            serde_json::to_string(&ex.request).unwrap_or_else(|_| ex.request.tool.clone());
        let result = serde_json::to_string(&ex.result).unwrap_or_default();
        let n = i + 1;
        let result = truncate(&result, MAX_RESULT_CHARS);
        out.push_str(&format!("[{n}] request: {request}\n[{n}] result: {result}\n"));
    }
    out
}

/// Everything the model sees on one iteration.
pub struct PromptParts<'a> {
    pub tool_catalog: &'a str,
    pub context: &'a [RetrievedChunk],
    pub history: &'a [ConversationTurn],
    pub query: &'a str,
    pub exchanges: &'a [ToolExchange],
    pub tool_calls_left: usize,
}

pub fn format_prompt(parts: &PromptParts<'_>) -> String {
    let mut prompt = system_instruction(parts.tool_catalog);

    prompt.push_str("\nRelevant context from the knowledge base:\n");
    prompt.push_str(&format_context(parts.context));
    prompt.push('\n');

    if !parts.history.is_empty() {
        prompt.push_str("\nChat history:\n");
        prompt.push_str(&format_history(parts.history));
    }

    if !parts.exchanges.is_empty() {
        prompt.push_str("\nTool calls so far:\n");
        prompt.push_str(&format_exchanges(parts.exchanges));
        if parts.tool_calls_left == 0 {
            prompt.push_str("No tool calls remain. Answer now from the data above.\n");
        } else {
            prompt.push_str(&format!("Tool calls remaining: {}\n", parts.tool_calls_left));
        }
    } else if is_live_data_query(parts.query) {
        prompt.push_str(
            "\nThis question is about live cluster state: call a tool before answering.\n",
        );
    }

    prompt.push_str(&format!("\nUser query: {}\n\nAnswer:", parts.query));
    prompt
}
