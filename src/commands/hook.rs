//! Hook command handler.
//!
//! Hooks run inside the host agent's session and must never block it: every
//! failure is logged, the response is always `{}`, and the exit code is
//! always 0.

use serde_json::{Map, Value};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::info_span;

use pms::services::EncodeOutcome;
use pms::{EncodeRequest, Encoder, PmsConfig};

use super::encode::{parse_context, run_continuous};
use super::{HookEvent, Status};

/// Payload sent by the host agent on stdin.
#[derive(Debug, Default)]
struct HookInput {
    session_id: Option<String>,
    transcript_path: Option<PathBuf>,
    cwd: Option<PathBuf>,
    context: Option<Value>,
}

/// Hook command.
pub fn cmd_hook(event: HookEvent, project_override: Option<&Path>) -> Status {
    let span = info_span!("pms.hook.invoke", hook = event.as_str());
    let _span_guard = span.enter();

    let input = read_hook_input();
    let project = project_override
        .map(Path::to_path_buf)
        .or_else(|| input.cwd.clone())
        .or_else(|| std::env::current_dir().ok());

    if let Some(project) = project {
        handle(event, &project, input);
    } else {
        tracing::warn!("No project directory available; skipping capture");
    }

    println!("{{}}");
    Status::Success
}

fn handle(event: HookEvent, project: &Path, input: HookInput) {
    let config = PmsConfig::load(project);
    let mut request = EncodeRequest::new(event.trigger());
    if let Some(id) = input.session_id {
        request = request.with_session_id(id);
    }
    if let Some(path) = input.transcript_path {
        request = request.with_transcript(path);
    }
    if let Some(context) = input.context {
        request = request.with_context(context);
    }

    match Encoder::new(&config, project).encode(request) {
        Ok(EncodeOutcome::Encoded(report)) => {
            tracing::info!(
                session_id = %report.session_id,
                mode = %report.encoding_mode,
                "Hook capture complete"
            );
            run_continuous(project, &config);
        },
        Ok(EncodeOutcome::Skipped { trigger }) => {
            tracing::debug!(%trigger, "Hook trigger disabled");
        },
        Ok(EncodeOutcome::AlreadyRecorded { .. }) => {},
        Err(e) => tracing::warn!(error = %e, "Hook capture failed"),
    }
}

/// Reads the hook payload. Anything unreadable becomes an empty payload.
fn read_hook_input() -> HookInput {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        tracing::warn!(error = %e, "Failed to read hook input");
        return HookInput::default();
    }
    parse_hook_input(&input)
}

fn parse_hook_input(input: &str) -> HookInput {
    if input.trim().is_empty() {
        return HookInput::default();
    }
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Object(fields)) => HookInput {
            session_id: string_field(&fields, "session_id"),
            transcript_path: string_field(&fields, "transcript_path").map(PathBuf::from),
            cwd: string_field(&fields, "cwd").map(PathBuf::from),
            context: fields
                .get("context")
                .filter(|v| !v.is_null())
                .cloned()
                .map(|context| match context {
                    Value::String(raw) => parse_context(raw),
                    other => other,
                }),
        },
        Ok(_) | Err(_) => {
            tracing::warn!("Hook input is not a JSON object; ignoring it");
            HookInput::default()
        },
    }
}

/// Reads one string field. A field of another type is dropped on its own;
/// the rest of the payload is kept.
fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(value) => Some(value.clone()),
        Value::Null => None,
        other => {
            let found = match other {
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::Array(_) => "array",
                _ => "object",
            };
            tracing::warn!(field = name, found, "Ignoring hook input field of the wrong type");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hook_input() {
        let input = parse_hook_input(
            r#"{"session_id":"abc","transcript_path":"/t/abc.jsonl","cwd":"/work","hook_event_name":"Stop"}"#,
        );
        assert_eq!(input.session_id.as_deref(), Some("abc"));
        assert_eq!(input.transcript_path, Some(PathBuf::from("/t/abc.jsonl")));
        assert_eq!(input.cwd, Some(PathBuf::from("/work")));
        assert!(input.context.is_none());
    }

    #[test]
    fn test_garbage_hook_input_is_empty() {
        assert!(parse_hook_input("not json").session_id.is_none());
        assert!(parse_hook_input("[1,2]").cwd.is_none());
        assert!(parse_hook_input("").session_id.is_none());
    }

    #[test]
    fn test_mistyped_field_keeps_the_rest() {
        let input = parse_hook_input(
            r#"{"session_id": 5, "transcript_path": null, "cwd": "/work", "context": {"task_summary": "t"}}"#,
        );
        assert!(input.session_id.is_none());
        assert!(input.transcript_path.is_none());
        assert_eq!(input.cwd, Some(PathBuf::from("/work")));
        assert_eq!(input.context.unwrap()["task_summary"], "t");
    }
}
