//! Sandbox Session: a stateful interpreter bound to one context, reachable
//! through a small async trait so the executor can swap backends (an
//! out-of-process JSON-RPC interpreter for real runs, an in-process fake
//! for tests) without changing its own control flow.

pub mod embedded;
pub mod helpers;
pub mod native;

use crate::error::Result;
use crate::trace::CodeExecution;
use async_trait::async_trait;
use std::sync::Arc;

/// Callbacks a sandbox's in-interpreter `llm_query`/`rlm_query`/
/// `batch_rlm_query`/`batch_llm_query` functions resolve through. The
/// executor implements this to route sandbox-initiated calls back into
/// the router (depth 0) or into a recursive `execute()` call (depth > 0).
#[async_trait]
pub trait BridgeHandler: Send + Sync {
    /// `llm_query(prompt)` — a single-shot completion at the current depth.
    async fn on_llm_query(&self, prompt: String) -> Result<String>;

    /// `rlm_query(task)` — a recursive sub-call one depth deeper.
    async fn on_rlm_query(&self, task: String) -> Result<String>;

    /// `batch_rlm_query(tasks)` — concurrent recursive sub-calls.
    async fn on_batch_rlm_query(&self, tasks: Vec<String>) -> Result<Vec<String>>;

    /// `batch_llm_query(prompts)` — concurrent single-shot completions.
    async fn on_batch_llm_query(&self, prompts: Vec<String>) -> Result<Vec<String>>;
}

/// A stateful interpreter session bound to one context string.
#[async_trait]
pub trait Sandbox: Send {
    /// Bind the context variable and wire the bridge callbacks. Must be
    /// called exactly once before any `execute`/`get_variable` call.
    async fn initialize(&mut self, context: &str, bridges: Arc<dyn BridgeHandler>) -> Result<()>;

    /// Run one code block against the session's persistent state, with a
    /// per-call timeout. Errors here are non-fatal to the session unless
    /// they indicate the interpreter process itself died.
    async fn execute(&mut self, code: &str, timeout_ms: u64) -> Result<CodeExecution>;

    /// Read a variable's `repr`/string form out of the session, for
    /// resolving `FINAL_VAR(<ident>)`. `Ok(None)` means the name is unbound.
    async fn get_variable(&mut self, name: &str) -> Result<Option<String>>;

    /// Tear the session down. Must be safe to call after a prior fatal
    /// error, and must be called on every exit path by the executor.
    async fn destroy(&mut self) -> Result<()>;
}
