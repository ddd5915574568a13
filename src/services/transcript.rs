//! Session transcript discovery and best-effort JSONL parsing.
//!
//! Transcripts are newline-delimited JSON written by the host agent. Lines
//! are independent: a malformed line is skipped and counted, never fatal.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::Deadline;
use crate::{Error, Result};

/// Maximum number of lines read from one transcript.
pub const MAX_TRANSCRIPT_LINES: usize = 1000;

/// Number of parse errors kept for diagnostics.
pub const MAX_PARSE_DIAGNOSTICS: usize = 5;

/// Maximum number of files touched reported per session.
pub const MAX_FILES_REPORTED: usize = 20;

/// Maximum number of error messages reported per session.
pub const MAX_ERRORS_REPORTED: usize = 5;

/// Maximum length of the task summary taken from the first user message.
pub const MAX_SUMMARY_CHARS: usize = 200;

const MAX_SCAN_DEPTH: usize = 3;
const MAX_SCAN_ENTRIES: usize = 10_000;

/// A skipped line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    /// 1-based line number.
    pub line: usize,
    /// Parser message.
    pub message: String,
}

/// Valid records of a transcript plus parse statistics.
#[derive(Debug, Clone, Default)]
pub struct ParsedTranscript {
    /// Parsed JSON objects in file order.
    pub records: Vec<Value>,
    /// Lines skipped as malformed.
    pub malformed_lines: usize,
    /// The first few parse failures.
    pub diagnostics: Vec<ParseDiagnostic>,
    /// The line cap was reached before end of file.
    pub truncated: bool,
    /// The deadline expired before end of file.
    pub timed_out: bool,
}

/// Parses up to [`MAX_TRANSCRIPT_LINES`] lines of a JSONL transcript.
///
/// Blank lines are ignored. The deadline is checked before every line; on
/// expiry the records parsed so far are returned with `timed_out` set.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn parse_transcript(path: &Path, deadline: &Deadline) -> Result<ParsedTranscript> {
    let file = File::open(path)
        .map_err(|e| Error::operation("open_transcript", format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut parsed = ParsedTranscript::default();
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        if deadline.expired() {
            parsed.timed_out = true;
            break;
        }
        if line_no >= MAX_TRANSCRIPT_LINES {
            parsed.truncated = has_more(&mut reader);
            break;
        }

        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {},
            Err(e) => {
                tracing::warn!(path = %path.display(), line = line_no + 1, error = %e, "Transcript read failed");
                break;
            },
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                parsed.skip(line_no, format!("invalid UTF-8: {e}"));
                continue;
            },
        };
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(record) if record.is_object() => parsed.records.push(record),
            Ok(_) => parsed.skip(line_no, "line is not a JSON object".to_string()),
            Err(e) => parsed.skip(line_no, e.to_string()),
        }
    }

    if parsed.malformed_lines > 0 {
        tracing::warn!(
            path = %path.display(),
            skipped = parsed.malformed_lines,
            valid = parsed.records.len(),
            "Skipped malformed transcript lines"
        );
        metrics::counter!("pms_transcript_lines_skipped_total")
            .increment(parsed.malformed_lines as u64);
    }
    Ok(parsed)
}

impl ParsedTranscript {
    fn skip(&mut self, line: usize, message: String) {
        self.malformed_lines += 1;
        if self.diagnostics.len() < MAX_PARSE_DIAGNOSTICS {
            tracing::debug!(line, error = %message, "Malformed transcript line");
            self.diagnostics.push(ParseDiagnostic { line, message });
        }
    }
}

fn has_more(reader: &mut impl BufRead) -> bool {
    reader.fill_buf().is_ok_and(|b| !b.is_empty())
}

/// Session facts recovered from transcript records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptDigest {
    /// First user message text, if any.
    pub first_user_message: Option<String>,
    /// Tool names in first-use order.
    pub tools_used: Vec<String>,
    /// Invocations per tool.
    pub tool_counts: BTreeMap<String, u32>,
    /// Unique file paths in first-seen order, capped.
    pub files: Vec<String>,
    /// Error messages in order, capped.
    pub errors: Vec<String>,
}

impl TranscriptDigest {
    /// Extracts tool use, files, errors and the opening user message.
    ///
    /// Understands both flat hook records (`tool_name`, `tool_input`,
    /// `error`) and message records (`message.content[]` items).
    #[must_use]
    pub fn from_records(records: &[Value]) -> Self {
        let mut digest = Self::default();
        for record in records {
            if let Some(name) = record.get("tool_name").and_then(Value::as_str) {
                digest.record_tool(name, record.get("tool_input"));
            }
            if let Some(error) = record.get("error").filter(|e| !e.is_null()) {
                digest.record_error(error);
            }
            if let Some(message) = record.get("message") {
                digest.record_message(record, message);
            }
        }
        digest
    }

    fn record_tool(&mut self, name: &str, input: Option<&Value>) {
        let count = self.tool_counts.entry(name.to_string()).or_insert(0);
        if *count == 0 {
            self.tools_used.push(name.to_string());
        }
        *count += 1;

        let path = input.and_then(|i| {
            ["file_path", "notebook_path", "path"]
                .iter()
                .find_map(|key| i.get(*key).and_then(Value::as_str))
        });
        if let Some(path) = path {
            if self.files.len() < MAX_FILES_REPORTED && !self.files.iter().any(|f| f == path) {
                self.files.push(path.to_string());
            }
        }
    }

    fn record_error(&mut self, error: &Value) {
        if self.errors.len() >= MAX_ERRORS_REPORTED {
            return;
        }
        let text = error
            .as_str()
            .map_or_else(|| error.to_string(), str::to_string);
        if !text.trim().is_empty() {
            self.errors.push(text);
        }
    }

    fn record_message(&mut self, record: &Value, message: &Value) {
        let is_user = message.get("role").and_then(Value::as_str) == Some("user")
            || record.get("type").and_then(Value::as_str) == Some("user");

        match message.get("content") {
            Some(Value::String(text)) if is_user => self.record_user_text(text),
            Some(Value::Array(items)) => {
                for item in items {
                    match item.get("type").and_then(Value::as_str) {
                        Some("tool_use") => {
                            if let Some(name) = item.get("name").and_then(Value::as_str) {
                                self.record_tool(name, item.get("input"));
                            }
                        },
                        Some("tool_result") if item.get("is_error") == Some(&Value::Bool(true)) => {
                            if let Some(content) = item.get("content") {
                                self.record_error(content);
                            }
                        },
                        Some("text") if is_user => {
                            if let Some(text) = item.get("text").and_then(Value::as_str) {
                                self.record_user_text(text);
                            }
                        },
                        _ => {},
                    }
                }
            },
            _ => {},
        }
    }

    fn record_user_text(&mut self, text: &str) {
        let text = text.trim();
        if self.first_user_message.is_none() && !text.is_empty() {
            self.first_user_message = Some(truncate_chars(text, MAX_SUMMARY_CHARS));
        }
    }
}

/// Truncates to `max` characters on a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Directory name the host agent uses for a project's transcripts.
///
/// Every character other than ASCII alphanumerics and `-` becomes `-`, so
/// `/home/dev/app` maps to `-home-dev-app`.
#[must_use]
pub fn project_slug(project_path: &Path) -> String {
    project_path
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Finds the transcript for a session.
///
/// Search order: `<session_id>.jsonl` in the project's transcript
/// directory, `<session_id>.jsonl` anywhere below `transcripts_dir`, the
/// newest `*.jsonl` in the project's directory, the newest `*.jsonl`
/// anywhere below `transcripts_dir`.
#[must_use]
pub fn locate_transcript(
    transcripts_dir: &Path,
    project_path: &Path,
    session_id: &str,
) -> Option<PathBuf> {
    if !transcripts_dir.is_dir() {
        tracing::debug!(dir = %transcripts_dir.display(), "Transcript directory not found");
        return None;
    }

    let project_dir = transcripts_dir.join(project_slug(project_path));
    let file_name = format!("{session_id}.jsonl");

    let direct = project_dir.join(&file_name);
    if direct.is_file() {
        return Some(direct);
    }

    let all = scan_jsonl(transcripts_dir, MAX_SCAN_DEPTH);
    if let Some((path, _)) = all
        .iter()
        .find(|(p, _)| p.file_name().is_some_and(|n| n.to_string_lossy() == file_name))
    {
        return Some(path.clone());
    }

    newest(scan_jsonl(&project_dir, 1)).or_else(|| newest(all))
}

fn scan_jsonl(root: &Path, max_depth: usize) -> Vec<(PathBuf, SystemTime)> {
    if !root.is_dir() {
        return Vec::new();
    }
    walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .take(MAX_SCAN_ENTRIES)
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (e.into_path(), modified)
        })
        .collect()
}

fn newest(mut candidates: Vec<(PathBuf, SystemTime)>) -> Option<PathBuf> {
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    candidates.into_iter().next().map(|(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fmt::Write as _;
    use std::time::Duration;
    use tempfile::TempDir;

    fn deadline() -> Deadline {
        Deadline::start("encode", Duration::from_secs(60))
    }

    #[test]
    fn test_malformed_lines_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        let mut contents = String::new();
        for i in 0..10 {
            writeln!(contents, r#"{{"tool_name": "Read", "n": {i}}}"#).unwrap();
            if i % 4 == 0 {
                contents.push_str("{not json\n");
            }
        }
        contents.push_str("\n\n");
        std::fs::write(&path, contents).unwrap();

        let parsed = parse_transcript(&path, &deadline()).unwrap();

        assert_eq!(parsed.records.len(), 10);
        assert_eq!(parsed.malformed_lines, 3);
        assert_eq!(parsed.diagnostics.len(), 3);
        assert_eq!(parsed.diagnostics[0].line, 2);
        assert!(!parsed.truncated);
    }

    #[test]
    fn test_line_cap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.jsonl");
        let contents = "{\"a\": 1}\n".repeat(MAX_TRANSCRIPT_LINES + 5);
        std::fs::write(&path, contents).unwrap();

        let parsed = parse_transcript(&path, &deadline()).unwrap();
        assert_eq!(parsed.records.len(), MAX_TRANSCRIPT_LINES);
        assert!(parsed.truncated);
    }

    #[test]
    fn test_diagnostics_capped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "x\n[1]\n\"s\"\ny\nz\nw\n").unwrap();

        let parsed = parse_transcript(&path, &deadline()).unwrap();
        assert_eq!(parsed.malformed_lines, 6);
        assert_eq!(parsed.diagnostics.len(), MAX_PARSE_DIAGNOSTICS);
    }

    #[test]
    fn test_expired_deadline_stops_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "{\"a\": 1}\n").unwrap();

        let parsed = parse_transcript(&path, &Deadline::start("encode", Duration::ZERO)).unwrap();
        assert!(parsed.timed_out);
        assert!(parsed.records.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(parse_transcript(&dir.path().join("none.jsonl"), &deadline()).is_err());
    }

    #[test]
    fn test_digest_flat_records() {
        let records = vec![
            json!({"tool_name": "Edit", "tool_input": {"file_path": "src/a.rs"}}),
            json!({"tool_name": "Read", "tool_input": {"file_path": "src/b.rs"}}),
            json!({"tool_name": "Edit", "tool_input": {"file_path": "src/a.rs"}}),
            json!({"error": "compile failed"}),
            json!({"error": {"code": 2}}),
        ];
        let digest = TranscriptDigest::from_records(&records);

        assert_eq!(digest.tools_used, vec!["Edit", "Read"]);
        assert_eq!(digest.tool_counts["Edit"], 2);
        assert_eq!(digest.files, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(digest.errors, vec!["compile failed".to_string(), "{\"code\":2}".to_string()]);
        assert!(digest.first_user_message.is_none());
    }

    #[test]
    fn test_digest_message_records() {
        let records = vec![
            json!({"type": "user", "message": {"role": "user", "content": "Add login rate limiting"}}),
            json!({"type": "assistant", "message": {"role": "assistant", "content": [
                {"type": "text", "text": "Sure"},
                {"type": "tool_use", "name": "Write", "input": {"file_path": "src/limit.rs"}}
            ]}}),
            json!({"type": "user", "message": {"role": "user", "content": [
                {"type": "tool_result", "is_error": true, "content": "permission denied"},
                {"type": "text", "text": "second message"}
            ]}}),
        ];
        let digest = TranscriptDigest::from_records(&records);

        assert_eq!(digest.first_user_message.as_deref(), Some("Add login rate limiting"));
        assert_eq!(digest.tools_used, vec!["Write"]);
        assert_eq!(digest.files, vec!["src/limit.rs"]);
        assert_eq!(digest.errors, vec!["permission denied"]);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_locate_prefers_session_file() {
        let dir = TempDir::new().unwrap();
        let project = Path::new("/work/my.app");
        let project_dir = dir.path().join(project_slug(project));
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("other.jsonl"), "{}\n").unwrap();
        std::fs::write(project_dir.join("s-1.jsonl"), "{}\n").unwrap();

        assert_eq!(project_slug(project), "-work-my-app");
        assert_eq!(
            locate_transcript(dir.path(), project, "s-1"),
            Some(project_dir.join("s-1.jsonl"))
        );
        assert!(locate_transcript(dir.path(), project, "unknown").is_some());
        assert!(locate_transcript(&dir.path().join("missing"), project, "s-1").is_none());
    }
}
