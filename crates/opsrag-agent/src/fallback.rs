//! Deterministic summary of tool results for answers that omit them.
//!
//! When tools ran but the model's answer lacks the data and analysis
//! sections, the raw data is summarised here and placed above the model's
//! narrative, so the user always sees what the cluster actually reported.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::Value;

use opsrag_core::types::ToolResult;

use crate::tools::ToolExchange;

pub const DATA_MARKER: &str = "--- Real-Time Kubernetes Data ---";
pub const ANALYSIS_MARKER: &str = "--- Analysis & Guidance ---";

const HEALTHY: &[&str] = &["running", "succeeded", "completed", "ready", "active"];
const RESTART_WARN: u64 = 5;
const LOG_PREVIEW_LINES: usize = 5;

pub fn has_markers(answer: &str) -> bool {
    answer.contains(DATA_MARKER) && answer.contains(ANALYSIS_MARKER)
}

pub fn needs_fallback(answer: &str, exchanges: &[ToolExchange]) -> bool {
    !exchanges.is_empty() && !has_markers(answer)
}

/// Puts the summarised tool data above `answer` when it is missing.
pub fn compose(answer: &str, exchanges: &[ToolExchange]) -> String {
    if !needs_fallback(answer, exchanges) {
        return answer.to_string();
    }
    format!("{DATA_MARKER}\n{}{ANALYSIS_MARKER}\n{}", summarize_tool_results(exchanges), answer.trim())
}

/// Per-tool summary: item counts, status breakdown, flagged entries, errors.
pub fn summarize_tool_results(exchanges: &[ToolExchange]) -> String {
    let mut by_tool: BTreeMap<&str, Vec<&ToolExchange>> = BTreeMap::new();
    for ex in exchanges {
        by_tool.entry(ex.request.tool.as_str()).or_default().push(ex);
    }

    let mut out = String::new();
    for (tool, calls) in by_tool {
        let _ = writeln!(out, "[{tool}]");
        for ex in calls {
            if !ex.request.args.is_empty() {
                let args: Vec<String> = ex.request.args.iter().map(|(k, v)| format!("{k}={v}")).collect();
                let _ = writeln!(out, "  args: {}", args.join(", "));
            }
            match &ex.result {
                ToolResult::Error { reason, .. } => {
                    let _ = writeln!(out, "  error: {reason}");
                }
                ToolResult::Ok(payload) => summarize_payload(&mut out, payload),
            }
        }
    }
    out
}

fn summarize_payload(out: &mut String, payload: &Value) {
    let Some(obj) = payload.as_object() else {
        let _ = writeln!(out, "  {payload}");
        return;
    };

    let mut listed = false;
    for (key, value) in obj {
        let Some(items) = value.as_array() else { continue };
        listed = true;
        if key == "lines" {
            summarize_logs(out, items);
            continue;
        }
        let _ = writeln!(out, "  {key}: {}", items.len());

        let mut statuses: BTreeMap<String, usize> = BTreeMap::new();
        for item in items {
            if let Some(status) = item.get("status").and_then(Value::as_str) {
                *statuses.entry(status.to_string()).or_default() += 1;
            }
        }
        if !statuses.is_empty() {
            let parts: Vec<String> = statuses.iter().map(|(s, n)| format!("{s}={n}")).collect();
            let _ = writeln!(out, "  status: {}", parts.join(", "));
        }

        for item in items {
            if let Some(reason) = flag(item) {
                let name = item.get("name").and_then(Value::as_str).unwrap_or("?");
                let _ = writeln!(out, "  ! {name}: {reason}");
            }
        }
    }

    if !listed {
        // scalar summaries, e.g. cluster totals
        for (key, value) in obj {
            let _ = writeln!(out, "  {key}: {value}");
        }
    }
}

fn summarize_logs(out: &mut String, lines: &[Value]) {
    let _ = writeln!(out, "  log lines: {}", lines.len());
    let skip = lines.len().saturating_sub(LOG_PREVIEW_LINES);
    for line in &lines[skip..] {
        let _ = writeln!(out, "    {}", line.as_str().unwrap_or_default());
    }
}

/// Why an entry deserves attention, if it does.
fn flag(item: &Value) -> Option<String> {
    if let Some(status) = item.get("status").and_then(Value::as_str) {
        if !HEALTHY.contains(&status.to_lowercase().as_str()) {
            return Some(format!("status {status}"));
        }
    }
    let restarts = item.get("restarts").and_then(Value::as_u64).unwrap_or(0);
    if restarts >= RESTART_WARN {
        return Some(format!("{restarts} restarts"));
    }
    if let (Some(want), Some(ready)) =
        (item.get("replicas").and_then(Value::as_u64), item.get("ready_replicas").and_then(Value::as_u64))
    {
        if ready < want {
            return Some(format!("{ready}/{want} replicas ready"));
        }
    }
    None
}
