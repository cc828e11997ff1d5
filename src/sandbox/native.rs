//! Out-of-process sandbox backend: spawns a Python interpreter subprocess
//! and speaks newline-delimited JSON-RPC over its stdio, the same
//! transport shape as the teacher's REPL subprocess bridge.

use super::{BridgeHandler, Sandbox};
use crate::context::LoadedContext;
use crate::error::{Error, Result};
use crate::trace::{duration_ms, CodeExecution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Where to find the Python sandbox package, and how to launch it.
#[derive(Debug, Clone)]
pub struct NativeSandboxConfig {
    /// Path to the Python interpreter executable.
    pub python_path: String,
    /// Directory containing the sandbox package, exported on `PYTHONPATH`.
    pub package_path: Option<String>,
    /// How long to wait for the subprocess's `ready` notification.
    pub startup_timeout_ms: u64,
}

impl Default for NativeSandboxConfig {
    fn default() -> Self {
        Self {
            python_path: "python3".to_string(),
            package_path: None,
            startup_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    id: u64,
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResult {
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    error: Option<String>,
}

/// The bundled companion script, used when no `package_path` points at a
/// pre-installed `rlm_sandbox` package. Written to a temp file and run
/// directly (`python3 <path>`) so the native backend works without any
/// install step.
const COMPANION_SCRIPT: &str = include_str!("rlm_sandbox.py");

/// The out-of-process sandbox. Owns the child process and its piped
/// stdio for the lifetime of one session.
pub struct NativeSandbox {
    config: NativeSandboxConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    next_id: AtomicU64,
    bridges: Option<Arc<dyn BridgeHandler>>,
    /// The context last sent via `initialize`, kept so a timeout-triggered
    /// respawn can resurrect the session transparently.
    initialized_context: Option<String>,
    /// Temp file backing the bundled companion script, kept alive for the
    /// lifetime of the session so the interpreter can still read it.
    companion_script: Option<tempfile::TempPath>,
}

impl NativeSandbox {
    pub fn new(config: NativeSandboxConfig) -> Self {
        Self {
            config,
            child: None,
            stdin: None,
            stdout: None,
            next_id: AtomicU64::new(1),
            bridges: None,
            initialized_context: None,
            companion_script: None,
        }
    }

    async fn spawn(&mut self) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.config.python_path);
        match &self.config.package_path {
            Some(package_path) => {
                command.arg("-m").arg("rlm_sandbox").env("PYTHONPATH", package_path);
            }
            None => {
                let path = self.ensure_companion_script()?;
                command.arg(path);
            }
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::SubprocessComm(format!("failed to spawn sandbox: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SubprocessComm("sandbox stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SubprocessComm("sandbox stdout not piped".to_string()))?;

        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);

        self.wait_for_ready().await
    }

    /// Materialize [`COMPANION_SCRIPT`] to a temp file on first use, reusing
    /// it across respawns within the same session.
    fn ensure_companion_script(&mut self) -> Result<std::path::PathBuf> {
        if let Some(path) = &self.companion_script {
            return Ok(path.to_path_buf());
        }
        let mut file = tempfile::Builder::new()
            .prefix("rlm_sandbox")
            .suffix(".py")
            .tempfile()
            .map_err(|e| Error::SubprocessComm(format!("failed to write companion script: {e}")))?;
        use std::io::Write;
        file.write_all(COMPANION_SCRIPT.as_bytes())
            .map_err(|e| Error::SubprocessComm(format!("failed to write companion script: {e}")))?;
        let path = file.into_temp_path();
        let path_buf = path.to_path_buf();
        self.companion_script = Some(path);
        Ok(path_buf)
    }

    /// Kill the current child (if any) and start a fresh one, re-sending
    /// `initialize` with the previously bound context. Used after a
    /// timeout, since the host cannot trust the old process's state.
    async fn respawn(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.stdin = None;
        self.stdout = None;

        self.spawn().await?;

        if let Some(context) = self.initialized_context.clone() {
            self.send_request(
                "initialize",
                serde_json::json!({ "context": context }),
                self.config.startup_timeout_ms,
            )
            .await?;
        }
        Ok(())
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        let deadline = Duration::from_millis(self.config.startup_timeout_ms);
        let line = timeout(deadline, self.read_line())
            .await
            .map_err(|_| Error::SubprocessComm("sandbox did not become ready in time".to_string()))??;

        let response: JsonRpcResponse = serde_json::from_str(&line)?;
        if response.method.as_deref() != Some("ready") {
            return Err(Error::SubprocessComm(format!(
                "expected ready notification, got: {line}"
            )));
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::SubprocessComm("sandbox not started".to_string()))?;
        let mut line = String::new();
        let n = stdout.read_line(&mut line).await?;
        if n == 0 {
            return Err(Error::sandbox_fatal("sandbox closed stdout unexpectedly"));
        }
        Ok(line)
    }

    async fn send_request(&mut self, method: &str, params: Value, timeout_ms: u64) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let stdin = self
                .stdin
                .as_mut()
                .ok_or_else(|| Error::SubprocessComm("sandbox not started".to_string()))?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }

        let deadline = Duration::from_millis(timeout_ms);
        let started = Instant::now();
        loop {
            if started.elapsed() > deadline {
                return Err(Error::timeout(duration_ms(started.elapsed())));
            }
            let remaining = deadline.saturating_sub(started.elapsed());
            let line = timeout(remaining, self.read_line())
                .await
                .map_err(|_| Error::timeout(duration_ms(started.elapsed())))??;

            let response: JsonRpcResponse = serde_json::from_str(&line)?;

            if let Some(bridge_method) = response.method.as_deref() {
                if bridge_method.starts_with("bridge:") {
                    self.handle_bridge_call(bridge_method, response.result.unwrap_or(Value::Null))
                        .await?;
                    continue;
                }
            }

            if response.id == Some(id) {
                if let Some(error) = response.error {
                    return Err(Error::sandbox_fatal(error));
                }
                return Ok(response.result.unwrap_or(Value::Null));
            }
            debug!(?response, "dropping unmatched sandbox response");
        }
    }

    async fn handle_bridge_call(&mut self, method: &str, params: Value) -> Result<()> {
        let bridges = self
            .bridges
            .clone()
            .ok_or_else(|| Error::sandbox_fatal("bridge call before initialization"))?;

        let (reply_method, reply_value) = match method {
            "bridge:llm" => {
                let prompt = params
                    .get("prompt")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content = bridges.on_llm_query(prompt).await?;
                ("bridge_reply:llm", serde_json::json!({ "content": content }))
            }
            "bridge:rlm" => {
                let task = params
                    .get("task")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content = bridges.on_rlm_query(task).await?;
                ("bridge_reply:rlm", serde_json::json!({ "content": content }))
            }
            "bridge:batch_llm" => {
                let prompts: Vec<String> = params
                    .get("prompts")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                let contents = bridges.on_batch_llm_query(prompts).await?;
                ("bridge_reply:batch_llm", serde_json::json!({ "contents": contents }))
            }
            "bridge:batch_rlm" => {
                let tasks: Vec<String> = params
                    .get("tasks")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                let contents = bridges.on_batch_rlm_query(tasks).await?;
                ("bridge_reply:batch_rlm", serde_json::json!({ "contents": contents }))
            }
            other => {
                warn!(method = other, "unknown bridge call from sandbox");
                return Ok(());
            }
        };

        let line = serde_json::to_string(&serde_json::json!({
            "method": reply_method,
            "result": reply_value,
        }))? + "\n";
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::SubprocessComm("sandbox not started".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sandbox for NativeSandbox {
    async fn initialize(&mut self, context: &str, bridges: Arc<dyn BridgeHandler>) -> Result<()> {
        self.bridges = Some(bridges);
        self.spawn().await?;
        let loaded = LoadedContext::load(context);
        let escaped = loaded.escaped();
        self.send_request(
            "initialize",
            serde_json::json!({ "context": escaped }),
            self.config.startup_timeout_ms,
        )
        .await?;
        self.initialized_context = Some(escaped);
        Ok(())
    }

    async fn execute(&mut self, code: &str, timeout_ms: u64) -> Result<CodeExecution> {
        let started = Instant::now();
        let result = self
            .send_request(
                "execute",
                serde_json::json!({ "code": code, "timeout_ms": timeout_ms, "capture_output": true }),
                timeout_ms,
            )
            .await;

        match result {
            Ok(value) => {
                let parsed: ExecuteResult = serde_json::from_value(value)?;
                Ok(CodeExecution {
                    code: code.to_string(),
                    stdout: parsed.stdout,
                    stderr: parsed.stderr,
                    error: parsed.error,
                    duration_ms: duration_ms(started.elapsed()),
                })
            }
            Err(Error::SandboxTimeout { duration_ms: ms }) => {
                // The process is in an unknown state after a timeout; kill
                // it now so the next `execute` doesn't hang against a
                // subprocess that's still chewing on the old request.
                if let Err(e) = self.respawn().await {
                    warn!(error = %e, "failed to respawn sandbox after timeout");
                }
                Ok(CodeExecution {
                    code: code.to_string(),
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(format!("execution timeout after {ms}ms")),
                    duration_ms: ms,
                })
            }
            Err(other) => Err(other),
        }
    }

    async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        let value = self
            .send_request(
                "get_variable",
                serde_json::json!({ "name": name }),
                self.config.startup_timeout_ms,
            )
            .await?;
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.get("found").and_then(Value::as_bool) == Some(false) => Ok(None),
            Value::Object(map) => Ok(map.get("value").and_then(Value::as_str).map(str::to_string)),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn destroy(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.stdin = None;
        self.stdout = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_python3_with_no_package_path() {
        let config = NativeSandboxConfig::default();
        assert_eq!(config.python_path, "python3");
        assert!(config.package_path.is_none());
        assert_eq!(config.startup_timeout_ms, 10_000);
    }

    #[test]
    fn request_serializes_with_method_and_params() {
        let request = JsonRpcRequest {
            id: 1,
            method: "execute".to_string(),
            params: serde_json::json!({ "code": "1 + 1" }),
        };
        let line = serde_json::to_string(&request).unwrap();
        assert!(line.contains("\"id\":1"));
        assert!(line.contains("\"method\":\"execute\""));
        assert!(line.contains("\"code\":\"1 + 1\""));
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let response: JsonRpcResponse = serde_json::from_str(r#"{"method":"ready"}"#).unwrap();
        assert_eq!(response.id, None);
        assert_eq!(response.method.as_deref(), Some("ready"));
        assert!(response.result.is_none());
        assert!(response.error.is_none());
    }

    #[test]
    fn bridge_call_is_recognized_by_method_prefix() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"method":"bridge:llm","result":{"prompt":"hi"}}"#).unwrap();
        assert!(response.method.as_deref().unwrap().starts_with("bridge:"));
    }

    #[test]
    fn execute_result_defaults_stderr_and_error_when_absent() {
        let result: ExecuteResult = serde_json::from_str(r#"{"stdout":"42"}"#).unwrap();
        assert_eq!(result.stdout, "42");
        assert_eq!(result.stderr, "");
        assert!(result.error.is_none());
    }

    #[test]
    fn companion_script_is_nonempty_python() {
        assert!(COMPANION_SCRIPT.contains("def "));
        assert!(COMPANION_SCRIPT.contains("rlm_sandbox"));
    }
}
