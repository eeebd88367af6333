use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, FailureKind};
use crate::ledger::AnswerStatus;

/// Key that tags the result line a container prints.
pub const RESULT_MARKER: &str = "bounty_data";

static RESULT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#"^\s*\{{\s*"{RESULT_MARKER}"\s*:"#)).expect("result line regex is valid")
});

/// Terminal result of one execution attempt. No error kind means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        rename = "errorType",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<FailureKind>,
}

impl ExecutionOutcome {
    pub fn success(result: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            message: Some(message.into()),
            error: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn status(&self) -> AnswerStatus {
        if self.is_success() {
            AnswerStatus::Success
        } else {
            AnswerStatus::Failure
        }
    }
}

impl From<&ExecutionError> for ExecutionOutcome {
    fn from(err: &ExecutionError) -> Self {
        ExecutionOutcome::failure(err.kind(), err.to_string())
    }
}

#[derive(Deserialize)]
struct ResultLine {
    bounty_data: ResultPayload,
}

#[derive(Deserialize)]
struct ResultPayload {
    result: String,
    message: String,
}

/// First line of `output` that starts with the result marker.
pub fn find_result_line(output: &str) -> Option<&str> {
    output.lines().find(|line| RESULT_LINE_REGEX.is_match(line))
}

/// Decodes a result line into `(result, message)`.
pub fn parse_result_line(line: &str) -> Result<(String, String), ExecutionError> {
    let parsed: ResultLine = serde_json::from_str(line.trim())
        .map_err(|e| ExecutionError::Execution(format!("malformed result: {e}")))?;
    Ok((parsed.bounty_data.result, parsed.bounty_data.message))
}

/// Turns a finished container run into an outcome.
///
/// The result line may appear on either stream, so both are scanned.
pub fn interpret_run(code: i32, stdout: &str, stderr: &str) -> Result<ExecutionOutcome, ExecutionError> {
    let line = find_result_line(stdout).or_else(|| find_result_line(stderr));
    match (code, line) {
        (0, None) => Err(ExecutionError::Execution(
            "container run succeeded, but no result found in container output".into(),
        )),
        (0, Some(line)) => {
            let (result, message) = parse_result_line(line)?;
            Ok(ExecutionOutcome::success(result, message))
        }
        (code, None) => Err(ExecutionError::Execution(format!(
            "container run failed with exit code {code}: {}",
            stderr.trim()
        ))),
        (code, Some(line)) => {
            let (_, message) = parse_result_line(line)?;
            if message.is_empty() {
                Err(ExecutionError::Execution(format!(
                    "container run failed with exit code {code}"
                )))
            } else {
                Err(ExecutionError::Execution(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marker_line_among_noise() {
        let out = "Step 1/3\nhello\n{\"bounty_data\": {\"result\": \"42\", \"message\": \"ok\"}}\nbye";
        assert_eq!(
            find_result_line(out),
            Some("{\"bounty_data\": {\"result\": \"42\", \"message\": \"ok\"}}")
        );
        assert_eq!(find_result_line("{\"other\": 1}"), None);
    }

    #[test]
    fn success_with_result_line() {
        let out = r#"{"bounty_data": {"result": "42", "message": "done"}}"#;
        let outcome = interpret_run(0, out, "").unwrap();
        assert_eq!(outcome, ExecutionOutcome::success("42", "done"));
        assert_eq!(outcome.status(), AnswerStatus::Success);
    }

    #[test]
    fn result_line_on_stderr_counts() {
        let err = r#"{"bounty_data": {"result": "7", "message": ""}}"#;
        let outcome = interpret_run(0, "", err).unwrap();
        assert_eq!(outcome.result, "7");
    }

    #[test]
    fn zero_exit_without_result_line() {
        let err = interpret_run(0, "", "").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Execution);
        assert!(err.to_string().contains("no result found"));
    }

    #[test]
    fn non_zero_exit_without_result_uses_stderr() {
        let err = interpret_run(2, "", "boom\n").unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(err.to_string().contains("exit code 2"));
    }

    #[test]
    fn non_zero_exit_prefers_payload_message() {
        let out = r#"{"bounty_data": {"result": "", "message": "division by zero"}}"#;
        let err = interpret_run(1, out, "trace").unwrap_err();
        assert_eq!(err.to_string(), "division by zero");

        let out = r#"{"bounty_data": {"result": "", "message": ""}}"#;
        let err = interpret_run(3, out, "").unwrap_err();
        assert_eq!(err.to_string(), "container run failed with exit code 3");
    }

    #[test]
    fn malformed_payloads() {
        for line in [
            r#"{"bounty_data": {"result": 42, "message": "x"}}"#,
            r#"{"bounty_data": {"result": "42"}}"#,
            r#"{"bounty_data": not json"#,
        ] {
            let err = interpret_run(0, line, "").unwrap_err();
            assert!(err.to_string().starts_with("malformed result"), "{line}");
        }
    }

    #[test]
    fn outcome_serializes_error_type() {
        let outcome = ExecutionOutcome::failure(FailureKind::Setup, "no manifest");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["errorType"], "SetupError");
        assert_eq!(value["result"], "");
        assert_eq!(outcome.status(), AnswerStatus::Failure);

        let value = serde_json::to_value(ExecutionOutcome::success("1", "ok")).unwrap();
        assert!(value.get("errorType").is_none());
    }
}
