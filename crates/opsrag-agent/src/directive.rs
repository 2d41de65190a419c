//! Tool directives in LLM output.
//!
//! The model asks for a tool by writing `TOOL_CALL:` (or opening a
//! ```` ```tool_call ```` fence) followed by a JSON object:
//!
//! ```text
//! TOOL_CALL: {"tool": "get_pods", "args": {"namespace": "default"}}
//! ```
//!
//! Parsing is two-stage. The strict stage reads the object (repairing a
//! truncated one by closing open strings and brackets). The tolerant stage
//! is lossy: it recovers only the tool name and a `namespace` argument with
//! regexes, and logs a warning whenever it is used.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use opsrag_core::error::Error;
use opsrag_core::types::{ArgValue, ToolRequest};

pub const DIRECTIVE_TOKEN: &str = "TOOL_CALL:";

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)TOOL_CALL\s*:|```tool_call").expect("directive token pattern"));
static TOOL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:tool|name|tool_name)"\s*:\s*"([A-Za-z_][A-Za-z0-9_\-]*)""#).expect("tool name pattern")
});
static BARE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)").expect("bare tool name pattern"));
static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""?namespace"?\s*[:=]\s*"?([a-z0-9]([-a-z0-9]*[a-z0-9])?)"#).expect("namespace pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Strict,
    Repaired,
    Tolerant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDirective {
    pub request: ToolRequest,
    pub stage: ParseStage,
}

/// Finds the first tool directive in `text`. `None` means the text is a
/// final answer.
pub fn parse_directive(text: &str) -> Option<ParsedDirective> {
    let found = TOKEN_RE.find(text)?;
    let body = &text[found.end()..];

    match strict(body) {
        Ok(parsed) => return Some(parsed),
        Err(e) => debug!(error = %e, "strict directive parse failed"),
    }

    let request = tolerant(body)?;
    warn!(tool = %request.tool, "tool directive recovered by tolerant parse; arguments other than namespace are lost");
    Some(ParsedDirective { request, stage: ParseStage::Tolerant })
}

/// Text before the first directive, trimmed.
pub fn strip_directive(text: &str) -> &str {
    match TOKEN_RE.find(text) {
        Some(m) => text[..m.start()].trim(),
        None => text.trim(),
    }
}

fn strict(body: &str) -> Result<ParsedDirective, Error> {
    let start = body.find('{').ok_or_else(|| Error::ToolRequestParse("no JSON object after directive".into()))?;
    let rest = &body[start..];
    let (json, stage) = match balanced_object(rest) {
        Some(end) => (rest[..end].to_string(), ParseStage::Strict),
        None => (repair(rest), ParseStage::Repaired),
    };
    let value: Value = serde_json::from_str(&json).map_err(|e| Error::ToolRequestParse(e.to_string()))?;
    let request = request_from_value(&value)?;
    Ok(ParsedDirective { request, stage })
}

fn request_from_value(value: &Value) -> Result<ToolRequest, Error> {
    let obj = value.as_object().ok_or_else(|| Error::ToolRequestParse("directive is not an object".into()))?;
    let tool = ["tool", "name", "tool_name"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::ToolRequestParse("directive names no tool".into()))?;

    let empty = Map::new();
    let args = match ["args", "arguments", "parameters"].iter().find_map(|k| obj.get(*k)) {
        Some(Value::Object(m)) => m,
        Some(Value::Null) | None => &empty,
        Some(_) => return Err(Error::ToolRequestParse("directive arguments are not an object".into())),
    };

    let mut request = ToolRequest::new(tool);
    for (k, v) in args {
        request = request.with_arg(k.clone(), ArgValue::from_json(v));
    }
    Ok(request)
}

/// Byte length of the first complete JSON object in `s` (which starts with
/// `{`), honouring strings and escapes.
fn balanced_object(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Closes whatever a truncated reply left open.
fn repair(s: &str) -> String {
    let s = s.trim_end();
    let s = s.strip_suffix("```").unwrap_or(s).trim_end();
    let mut out = String::with_capacity(s.len() + 8);
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        out.push(c);
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }
    // a dangling `,` or `:` cannot be closed into valid JSON
    while out.ends_with(',') || out.ends_with(':') || out.ends_with(char::is_whitespace) {
        out.pop();
    }
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

fn tolerant(body: &str) -> Option<ToolRequest> {
    let tool = match TOOL_NAME_RE.captures(body) {
        Some(c) => c.get(1)?.as_str().to_string(),
        None if !body.trim_start().starts_with('{') => BARE_NAME_RE.captures(body)?.get(1)?.as_str().to_string(),
        None => return None,
    };
    let mut request = ToolRequest::new(tool);
    if let Some(ns) = NAMESPACE_RE.captures(body).and_then(|c| c.get(1)) {
        request = request.with_arg("namespace", ArgValue::Str(ns.as_str().to_string()));
    }
    Some(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(d: &ParsedDirective) -> Option<&str> {
        d.request.arg_str("namespace")
    }

    #[test]
    fn strict_directive_with_prose_around_it() {
        let text = "Let me check.\nTOOL_CALL: {\"tool\": \"get_pods\", \"args\": {\"namespace\": \"default\"}}\nthanks";
        let d = parse_directive(text).unwrap();
        assert_eq!(d.stage, ParseStage::Strict);
        assert_eq!(d.request.tool, "get_pods");
        assert_eq!(ns(&d), Some("default"));
        assert_eq!(strip_directive(text), "Let me check.");
    }

    #[test]
    fn fenced_directive_with_alias_keys() {
        let text = "```tool_call\n{\"name\": \"get_pod_logs\", \"arguments\": {\"pod\": \"web-1\", \"tail\": 20}}\n```";
        let d = parse_directive(text).unwrap();
        assert_eq!(d.request.tool, "get_pod_logs");
        assert_eq!(d.request.args.get("tail"), Some(&ArgValue::Int(20)));
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let text = r#"TOOL_CALL: {"tool": "get_pods", "args": {"namespace": "a}b"}} trailing }"#;
        let d = parse_directive(text).unwrap();
        assert_eq!(d.stage, ParseStage::Strict);
        assert_eq!(ns(&d), Some("a}b"));
    }

    #[test]
    fn truncated_object_is_repaired() {
        let d = parse_directive(r#"TOOL_CALL: {"tool": "get_services", "args": {"namespace": "kube-sys"#).unwrap();
        assert_eq!(d.stage, ParseStage::Repaired);
        assert_eq!(d.request.tool, "get_services");
        assert_eq!(ns(&d), Some("kube-sys"));

        let d = parse_directive(r#"TOOL_CALL: {"tool": "get_nodes", "args": {"#).unwrap();
        assert_eq!(d.request.tool, "get_nodes");
        assert!(d.request.args.is_empty());
    }

    #[test]
    fn tolerant_stage_recovers_name_and_namespace() {
        let d = parse_directive(r#"TOOL_CALL: {'tool': 'x', "tool": "get_deployments", namespace: "prod" oops}"#).unwrap();
        assert_eq!(d.stage, ParseStage::Tolerant);
        assert_eq!(d.request.tool, "get_deployments");
        assert_eq!(ns(&d), Some("prod"));

        let d = parse_directive("TOOL_CALL: get_cluster_summary").unwrap();
        assert_eq!(d.stage, ParseStage::Tolerant);
        assert_eq!(d.request.tool, "get_cluster_summary");
    }

    #[test]
    fn no_directive_or_no_name_is_a_final_answer() {
        assert!(parse_directive("Pods restart when their container exits.").is_none());
        assert!(parse_directive("TOOL_CALL: {\"args\": {}}").is_none());
    }
}
