//! Model response → typed actions.
//!
//! Dialects, tried in order:
//!
//! 1. `DONE`, exactly
//! 2. `CLICK { ... }` / `MOUSE { ... }` with percent coordinates
//! 3. `TYPE ...`, `SEARCH ...`, `PRESS ...`
//!
//! Keywords are uppercase only, so prose that happens to start with
//! "Type" or "Search" is never mistaken for a command.
//! 4. a JSON operation object or array (`{"operation": "click", ...}`),
//!    coordinates as screen fractions or a detected-element label
//!
//! Nothing in here panics on model output: every failure becomes
//! [`Action::Unknown`] with a [`FailureKind`].
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::agent_engine::state::{Action, ClickAction, FailureKind};
use crate::errors::OperatorError;
use crate::executor::coordinator::{bbox_center_percent, fraction_to_percent, AsPercent};
use crate::perception::types::LabelMap;

static KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(CLICK|MOUSE|TYPE|SEARCH|PRESS)\b\s*(.*)$").expect("static regex"));
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("static regex"));

/// Session facts the parser may need.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub objective: &'a str,
    /// Labels detected on the screenshot this response was produced for.
    pub labels: Option<&'a LabelMap>,
    /// Outcome of the most recent executed action, if any.
    pub last_outcome: Option<&'a str>,
}

impl<'a> ParseContext<'a> {
    pub fn new(objective: &'a str) -> Self {
        Self {
            objective,
            labels: None,
            last_outcome: None,
        }
    }

    /// Summary used when the model just says it is done.
    pub fn done_summary(&self) -> String {
        match self.last_outcome {
            Some(last) => format!("Completed \"{}\". Last action: {last}", self.objective),
            None => format!("Completed \"{}\"", self.objective),
        }
    }
}

/// Parse one model response into the actions to run this turn.
pub fn parse(raw: &str, ctx: &ParseContext<'_>) -> Vec<Action> {
    let text = raw.trim();
    if text.is_empty() {
        return vec![Action::unknown(raw, FailureKind::Parse, "empty response")];
    }

    if is_done(text) {
        return vec![Action::Done {
            summary: ctx.done_summary(),
        }];
    }

    if let Some(caps) = KEYWORD.captures(text) {
        let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
        match &caps[1] {
            "CLICK" => return vec![pointer_command(raw, rest, true)],
            "MOUSE" => return vec![pointer_command(raw, rest, false)],
            "TYPE" => return vec![string_command(raw, rest, |text| Action::Type { text })],
            "SEARCH" => return vec![string_command(raw, rest, |query| Action::Search { query })],
            "PRESS" => return vec![press_command(raw, rest)],
            _ => {}
        }
    }

    if let Some(json) = json_payload(text) {
        return operations(raw, json, ctx);
    }

    vec![Action::unknown(raw, FailureKind::Parse, "unrecognized response format")]
}

fn is_done(text: &str) -> bool {
    text == "DONE"
}

// ── Keyword dialect ──────────────────────────────────────────────────────

/// `CLICK {...}` implies a left click; `MOUSE {...}` only moves unless
/// `left-click` says otherwise.
fn pointer_command(raw: &str, rest: &str, implicit_click: bool) -> Action {
    let Some(body) = outermost_braces(rest) else {
        return Action::unknown(raw, FailureKind::Parse, "missing or unbalanced braces");
    };
    let obj = match object_literal(body) {
        Some(obj) => obj,
        None => return Action::unknown(raw, FailureKind::Parse, "braces do not contain an object"),
    };

    let scroll = match obj.get("vert-scroll").map(as_int).transpose() {
        Ok(v) => v.unwrap_or(0),
        Err(cause) => return Action::unknown(raw, FailureKind::Parse, cause),
    };

    let (x, y) = match (obj.get("x"), obj.get("y")) {
        (Some(x), Some(y)) => (x, y),
        (None, None) if scroll != 0 => return Action::Scroll { clicks: scroll },
        _ => return Action::unknown(raw, FailureKind::Parse, "pointer command needs both x and y"),
    };

    let (x_percent, y_percent) = match (percent_value(x), percent_value(y)) {
        (Ok(x), Ok(y)) => (x, y),
        (Err(e), _) | (_, Err(e)) => return Action::unknown(raw, FailureKind::Coordinate, e.to_string()),
    };

    let left_click = match obj.get("left-click") {
        Some(v) => match as_bool(v) {
            Some(b) => b,
            None => return Action::unknown(raw, FailureKind::Parse, "left-click is not a boolean"),
        },
        None => implicit_click,
    };

    Action::Click(ClickAction {
        x_percent,
        y_percent,
        label: None,
        left_click,
        scroll,
        description: string_field(&obj, "description"),
        reason: string_field(&obj, "reason"),
    })
}

fn string_command(raw: &str, rest: &str, build: impl FnOnce(String) -> Action) -> Action {
    let payload = strip_quotes(rest);
    if payload.is_empty() {
        return Action::unknown(raw, FailureKind::Parse, "command has no payload");
    }
    build(payload.to_string())
}

fn press_command(raw: &str, rest: &str) -> Action {
    let keys = split_keys(strip_quotes(rest));
    if keys.is_empty() {
        return Action::unknown(raw, FailureKind::Parse, "PRESS names no keys");
    }
    Action::Press { keys }
}

/// Remove one pair of matching surrounding quotes, leaving the inside alone.
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn split_keys(s: &str) -> Vec<String> {
    s.split(|c: char| c == '+' || c == ',' || c.is_whitespace())
        .map(|k| k.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|k| !k.is_empty())
        .map(|k| k.to_lowercase())
        .collect()
}

/// The first `{ ... }` block with its nested braces balanced, ignoring
/// braces inside string literals.
fn outermost_braces(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if let Some(q) = in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                _ if c == q => in_string = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// JSON first; then the same text with single quotes, which models emit
/// when imitating Python dict literals.
fn object_literal(body: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(obj)) = serde_json::from_str(body) {
        return Some(obj);
    }
    match serde_json::from_str(&body.replace('\'', "\"")) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn percent_value(v: &Value) -> Result<f64, OperatorError> {
    match v {
        Value::String(s) => s.as_percent(),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN).as_percent(),
        other => Err(OperatorError::MalformedCoordinate(format!("{other} is not a coordinate"))),
    }
}

fn as_int(v: &Value) -> Result<i32, String> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && n.abs() <= i32::MAX as f64 => Ok(n.round() as i32),
        _ => Err(format!("{v} is not an integer")),
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

// ── JSON operation dialect ───────────────────────────────────────────────

/// Locate JSON in the response: the bare text, a fenced block, or the first
/// bracketed span.
fn json_payload(text: &str) -> Option<Value> {
    let candidate = CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim();

    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return matches!(v, Value::Array(_) | Value::Object(_)).then_some(v);
    }

    let start = candidate.find(['[', '{'])?;
    let end = candidate.rfind([']', '}'])?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&candidate[start..=end])
        .ok()
        .filter(|v| matches!(v, Value::Array(_) | Value::Object(_)))
}

/// All-or-nothing: one bad operation rejects the whole response.
fn operations(raw: &str, json: Value, ctx: &ParseContext<'_>) -> Vec<Action> {
    let items = match json {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return vec![Action::unknown(raw, FailureKind::Parse, "expected JSON operations")],
    };
    if items.is_empty() {
        return vec![Action::unknown(raw, FailureKind::Parse, "empty operation list")];
    }

    let mut actions = Vec::with_capacity(items.len());
    for item in &items {
        match operation(item, ctx) {
            Ok(action) => actions.push(action),
            Err((kind, cause)) => return vec![Action::unknown(raw, kind, cause)],
        }
    }
    actions
}

fn operation(item: &Value, ctx: &ParseContext<'_>) -> Result<Action, (FailureKind, String)> {
    let obj = item
        .as_object()
        .ok_or_else(|| (FailureKind::Parse, format!("{item} is not an operation object")))?;
    let op = obj
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| (FailureKind::Parse, "operation field missing".to_string()))?;

    match op.to_ascii_lowercase().as_str() {
        "click" => json_click(obj, ctx),
        "write" | "type" => {
            let text = string_field(obj, "content")
                .or_else(|| string_field(obj, "text"))
                .ok_or_else(|| (FailureKind::Parse, "write has no content".to_string()))?;
            Ok(Action::Type { text })
        }
        "press" => {
            let keys = match obj.get("keys") {
                Some(Value::Array(keys)) => keys
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
                Some(Value::String(s)) => split_keys(s),
                _ => Vec::new(),
            };
            if keys.is_empty() {
                return Err((FailureKind::Parse, "press names no keys".into()));
            }
            Ok(Action::Press { keys })
        }
        "search" => string_field(obj, "content")
            .or_else(|| string_field(obj, "query"))
            .filter(|q| !q.trim().is_empty())
            .map(|query| Action::Search { query })
            .ok_or_else(|| (FailureKind::Parse, "search has no query".to_string())),
        "scroll" => {
            let clicks = obj
                .get("clicks")
                .or_else(|| obj.get("amount"))
                .ok_or_else(|| (FailureKind::Parse, "scroll has no clicks".to_string()))
                .and_then(|v| as_int(v).map_err(|e| (FailureKind::Parse, e)))?;
            Ok(Action::Scroll { clicks })
        }
        "done" => {
            let summary = string_field(obj, "summary")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| ctx.done_summary());
            Ok(Action::Done { summary })
        }
        other => Err((FailureKind::Parse, format!("unknown operation '{other}'"))),
    }
}

fn json_click(obj: &Map<String, Value>, ctx: &ParseContext<'_>) -> Result<Action, (FailureKind, String)> {
    let label = obj
        .get("label")
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(format!("~{n}")),
            _ => None,
        })
        .filter(|l| !l.is_empty());

    let (x_percent, y_percent) = if let Some(label) = &label {
        let labels = ctx
            .labels
            .ok_or_else(|| (FailureKind::MissingLabel, format!("no labels on this screen for {label}")))?;
        let bbox = labels
            .get(label)
            .ok_or_else(|| (FailureKind::MissingLabel, format!("label {label} is not on screen")))?;
        bbox_center_percent(bbox, labels.image_width, labels.image_height)
            .map_err(|e| (FailureKind::Coordinate, e.to_string()))?
    } else {
        let x = obj
            .get("x")
            .ok_or_else(|| (FailureKind::Parse, "click needs x and y or a label".to_string()))?;
        let y = obj
            .get("y")
            .ok_or_else(|| (FailureKind::Parse, "click needs x and y or a label".to_string()))?;
        let x = fraction_to_percent(x).map_err(|e| (FailureKind::Coordinate, e.to_string()))?;
        let y = fraction_to_percent(y).map_err(|e| (FailureKind::Coordinate, e.to_string()))?;
        (x, y)
    };

    Ok(Action::Click(ClickAction {
        x_percent,
        y_percent,
        label,
        left_click: true,
        scroll: 0,
        description: string_field(obj, "text").or_else(|| string_field(obj, "description")),
        reason: string_field(obj, "thought").or_else(|| string_field(obj, "reason")),
    }))
}
