//! In-process sandbox backend: a scriptable fake that implements the
//! [`Sandbox`] contract without spawning a subprocess, so executor tests
//! run deterministically and without a Python installation.

use super::{BridgeHandler, Sandbox};
use crate::error::{Error, Result};
use crate::trace::CodeExecution;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One scripted outcome for a call to [`EmbeddedSandbox::execute`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecution {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    /// Variable bindings this execution should leave behind.
    pub sets: Vec<(String, String)>,
}

impl ScriptedExecution {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.sets.push((name.into(), value.into()));
        self
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A fake session: `execute` pops from a pre-scripted queue (falling back
/// to an empty-stdout success once exhausted), and tracks a plain
/// `HashMap` of variables for `get_variable`.
pub struct EmbeddedSandbox {
    script: Vec<ScriptedExecution>,
    cursor: usize,
    variables: HashMap<String, String>,
    bridges: Option<Arc<dyn BridgeHandler>>,
    initialized_context: Option<String>,
}

impl EmbeddedSandbox {
    pub fn new(script: Vec<ScriptedExecution>) -> Self {
        Self {
            script,
            cursor: 0,
            variables: HashMap::new(),
            bridges: None,
            initialized_context: None,
        }
    }

    /// Directly invoke the bridge for `llm_query`-style in-script calls,
    /// for tests that want to exercise bridge wiring without a real
    /// code-execution step.
    pub async fn call_llm_bridge(&self, prompt: impl Into<String>) -> Result<String> {
        let bridges = self
            .bridges
            .clone()
            .ok_or_else(|| Error::sandbox_fatal("bridge call before initialization"))?;
        bridges.on_llm_query(prompt.into()).await
    }

    /// Directly invoke the bridge for `rlm_query`-style in-script calls,
    /// for tests that want to exercise recursion/fallback wiring without a
    /// real code-execution step.
    pub async fn call_rlm_bridge(&self, task: impl Into<String>) -> Result<String> {
        let bridges = self
            .bridges
            .clone()
            .ok_or_else(|| Error::sandbox_fatal("bridge call before initialization"))?;
        bridges.on_rlm_query(task.into()).await
    }

    pub fn context(&self) -> Option<&str> {
        self.initialized_context.as_deref()
    }
}

#[async_trait]
impl Sandbox for EmbeddedSandbox {
    async fn initialize(&mut self, context: &str, bridges: Arc<dyn BridgeHandler>) -> Result<()> {
        self.initialized_context = Some(context.to_string());
        self.bridges = Some(bridges);
        Ok(())
    }

    async fn execute(&mut self, code: &str, _timeout_ms: u64) -> Result<CodeExecution> {
        let scripted = if self.cursor < self.script.len() {
            let s = self.script[self.cursor].clone();
            self.cursor += 1;
            s
        } else {
            ScriptedExecution::default()
        };

        for (name, value) in &scripted.sets {
            self.variables.insert(name.clone(), value.clone());
        }

        Ok(CodeExecution {
            code: code.to_string(),
            stdout: scripted.stdout,
            stderr: scripted.stderr,
            error: scripted.error,
            duration_ms: 0,
        })
    }

    async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self.variables.get(name).cloned())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.variables.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBridges;

    #[async_trait]
    impl BridgeHandler for NullBridges {
        async fn on_llm_query(&self, prompt: String) -> Result<String> {
            Ok(format!("echo:{prompt}"))
        }
        async fn on_rlm_query(&self, task: String) -> Result<String> {
            Ok(format!("sub:{task}"))
        }
        async fn on_batch_rlm_query(&self, tasks: Vec<String>) -> Result<Vec<String>> {
            Ok(tasks.into_iter().map(|t| format!("sub:{t}")).collect())
        }
        async fn on_batch_llm_query(&self, prompts: Vec<String>) -> Result<Vec<String>> {
            Ok(prompts.into_iter().map(|p| format!("echo:{p}")).collect())
        }
    }

    #[tokio::test]
    async fn replays_scripted_executions_in_order() {
        let mut sandbox = EmbeddedSandbox::new(vec![
            ScriptedExecution::ok("first").setting("x", "1"),
            ScriptedExecution::ok("second"),
        ]);
        sandbox.initialize("ctx", Arc::new(NullBridges)).await.unwrap();

        let first = sandbox.execute("code1", 1000).await.unwrap();
        assert_eq!(first.stdout, "first");
        assert_eq!(sandbox.get_variable("x").await.unwrap(), Some("1".to_string()));

        let second = sandbox.execute("code2", 1000).await.unwrap();
        assert_eq!(second.stdout, "second");
    }

    #[tokio::test]
    async fn exhausted_script_falls_back_to_empty_success() {
        let mut sandbox = EmbeddedSandbox::new(vec![]);
        sandbox.initialize("ctx", Arc::new(NullBridges)).await.unwrap();
        let exec = sandbox.execute("anything", 1000).await.unwrap();
        assert_eq!(exec.stdout, "");
        assert!(exec.error.is_none());
    }

    #[tokio::test]
    async fn unbound_variable_returns_none() {
        let mut sandbox = EmbeddedSandbox::new(vec![]);
        sandbox.initialize("ctx", Arc::new(NullBridges)).await.unwrap();
        assert_eq!(sandbox.get_variable("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn bridge_round_trips_through_handler() {
        let mut sandbox = EmbeddedSandbox::new(vec![]);
        sandbox.initialize("ctx", Arc::new(NullBridges)).await.unwrap();
        let out = sandbox.call_llm_bridge("hello").await.unwrap();
        assert_eq!(out, "echo:hello");
    }
}
