//! Immutable record of what happened during one `execute()` call and its
//! recursive sub-calls: the trace tree, and the top-level result shape.

use crate::budget::Usage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Where the final answer of an [`ExecutionTrace`] node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    /// A literal `FINAL(...)` answer.
    FinalDirect,
    /// A `FINAL_VAR(...)` answer resolved from the sandbox.
    FinalVar,
    /// Synthesized after the iteration budget was exhausted.
    Forced,
    /// The executor terminated via an unrecovered error.
    Error,
}

/// One code block execution, in source order within an [`Iteration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecution {
    pub code: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CodeExecution {
    /// Whether this execution was a timeout (per the "timeout" substring
    /// convention the sandbox contract specifies for `CodeExecution.error`).
    pub fn timed_out(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.to_lowercase().contains("timeout"))
    }
}

/// One LLM turn: the prompt sent, the response received, and the ordered
/// code executions the response's code blocks produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub index: u32,
    pub prompt: String,
    pub prompt_tokens: u64,
    pub response: String,
    pub response_tokens: u64,
    pub cost: f64,
    pub code_executions: Vec<CodeExecution>,
}

/// A node in the recursion tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub depth: u32,
    pub task: String,
    pub iterations: Vec<Iteration>,
    pub subcalls: Vec<ExecutionTrace>,
    pub final_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_source: Option<AnswerSource>,
}

impl ExecutionTrace {
    /// Allocate a fresh trace node for a new executor.
    pub fn new(parent_id: Option<String>, depth: u32, task: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id,
            depth,
            task: task.into(),
            iterations: Vec::new(),
            subcalls: Vec::new(),
            final_answer: String::new(),
            answer_source: None,
        }
    }

    /// A node is terminal iff it carries a non-empty final answer.
    pub fn is_terminal(&self) -> bool {
        !self.final_answer.is_empty()
    }
}

/// The outcome of an `execute()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RLMResult {
    pub success: bool,
    pub output: String,
    pub trace: ExecutionTrace,
    pub usage: Usage,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RLMResult {
    /// Build a successful result; `output` is taken from `trace.final_answer`.
    pub fn success(trace: ExecutionTrace, usage: Usage, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            output: trace.final_answer.clone(),
            trace,
            usage,
            warnings,
            error: None,
        }
    }

    /// Build a failed result carrying a partial trace.
    pub fn failure(
        trace: ExecutionTrace,
        usage: Usage,
        warnings: Vec<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            output: String::new(),
            trace,
            usage,
            warnings,
            error: Some(error.into()),
        }
    }
}

/// Convert a [`Duration`] to milliseconds, saturating at `u64::MAX`.
pub fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Usage;

    #[test]
    fn trace_is_terminal_iff_final_answer_set() {
        let mut trace = ExecutionTrace::new(None, 0, "task");
        assert!(!trace.is_terminal());
        trace.final_answer = "42".to_string();
        assert!(trace.is_terminal());
    }

    #[test]
    fn result_success_output_matches_trace_final_answer() {
        let mut trace = ExecutionTrace::new(None, 0, "task");
        trace.final_answer = "done".to_string();
        let result = RLMResult::success(trace, Usage::default(), vec![]);
        assert_eq!(result.output, "done");
        assert!(result.success);
    }

    #[test]
    fn child_trace_records_parent_id_p8() {
        let parent = ExecutionTrace::new(None, 0, "root");
        let child = ExecutionTrace::new(Some(parent.id.clone()), 1, "sub");
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
    }

    #[test]
    fn code_execution_detects_timeout_by_substring() {
        let exec = CodeExecution {
            code: "while True: pass".to_string(),
            stdout: String::new(),
            stderr: String::new(),
            error: Some("execution timeout after 30000ms".to_string()),
            duration_ms: 30_000,
        };
        assert!(exec.timed_out());
    }
}
