//! The control loop: build a prompt, call the router, run the returned
//! code against the sandbox, check for a termination marker, repeat until
//! the budget is exhausted or an answer is reached — with a forced-answer
//! fallback when the iteration budget runs out before either does.

use crate::budget::{Budget, BudgetController, CheckKind, RecordDelta, Remaining};
use crate::context::LoadedContext;
use crate::error::{Error, Result};
use crate::parser::{parse_response, Termination};
use crate::router::{CompletionRequest, LLMRouter};
use crate::sandbox::{BridgeHandler, Sandbox};
use crate::trace::{AnswerSource, CodeExecution, ExecutionTrace, Iteration, RLMResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, info_span, instrument, warn, Instrument};

/// How much of the bound context a depth-capped subcall fallback sees.
const FALLBACK_CONTEXT_CHARS: usize = 10_000;
/// How much of the context is previewed in the first iteration's prompt.
const CONTEXT_PREVIEW_CHARS: usize = 2_000;

/// Static configuration for one [`Executor`]: which provider/model to
/// drive the loop with and the sandbox-level timeout per code execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub provider: String,
    pub model: String,
    /// Provider used for bridge-initiated completions (`llm_query` and the
    /// depth-cap fallback answer). Falls back to `provider` when unset.
    pub subcall_provider: Option<String>,
    /// Model used for bridge-initiated completions. Falls back to `model`.
    pub subcall_model: Option<String>,
    pub iteration_timeout_ms: u64,
    pub max_completion_tokens: Option<u32>,
    /// Upper bound on concurrent `batch_rlm_query`/`batch_llm_query` fan-out.
    pub batch_concurrency: usize,
    /// Bulleted hints appended to the system prompt as a MODEL HINTS section.
    pub prompt_hints: Option<Vec<String>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "mock-model".to_string(),
            subcall_provider: None,
            subcall_model: None,
            iteration_timeout_ms: 30_000,
            max_completion_tokens: None,
            batch_concurrency: 5,
            prompt_hints: None,
        }
    }
}

impl ExecutorConfig {
    fn subcall_provider(&self) -> &str {
        self.subcall_provider.as_deref().unwrap_or(&self.provider)
    }

    fn subcall_model(&self) -> &str {
        self.subcall_model.as_deref().unwrap_or(&self.model)
    }
}

/// Builds a fresh, uninitialized sandbox session for each `execute` call.
pub type SandboxFactory = Arc<dyn Fn() -> Box<dyn Sandbox> + Send + Sync>;

/// Owns the router and sandbox factory; stateless across `execute` calls.
pub struct Executor {
    router: Arc<LLMRouter>,
    config: ExecutorConfig,
    sandbox_factory: SandboxFactory,
}

impl Executor {
    pub fn new(router: Arc<LLMRouter>, config: ExecutorConfig, sandbox_factory: SandboxFactory) -> Self {
        Self {
            router,
            config,
            sandbox_factory,
        }
    }

    /// Run one top-level RLM call at depth 0.
    #[instrument(skip(self, context), fields(provider = %self.config.provider, model = %self.config.model))]
    pub async fn execute(self: &Arc<Self>, task: &str, context: &str, budget: Budget) -> RLMResult {
        self.execute_at(task, context, budget, 0, None).await
    }

    /// Run one call at an arbitrary depth; depth > 0 is only reached
    /// through a bridge's `rlm_query`/`batch_rlm_query` call.
    fn execute_at<'a>(
        self: &'a Arc<Self>,
        task: &'a str,
        context: &'a str,
        budget: Budget,
        depth: u32,
        parent_id: Option<String>,
    ) -> Pin<Box<dyn Future<Output = RLMResult> + Send + 'a>> {
        Box::pin(async move {
            let mut trace = ExecutionTrace::new(parent_id.clone(), depth, task);
            let warnings: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
            let warnings_for_handler = warnings.clone();

            let budget_ctrl = Arc::new(Mutex::new(BudgetController::new(budget).with_warning_handler(
                move |w| {
                    // Budget warnings arrive on the synchronous can_proceed/record
                    // call path; stash them for the async caller to drain.
                    if let Ok(mut guard) = warnings_for_handler.try_lock() {
                        guard.push(w.message);
                    }
                },
            )));

            let mut sandbox = (self.sandbox_factory)();
            let subcalls: Arc<Mutex<Vec<ExecutionTrace>>> = Arc::new(Mutex::new(Vec::new()));
            let bridges = Arc::new(ExecutorBridges {
                executor: self.clone(),
                budget: budget_ctrl.clone(),
                context: context.to_string(),
                depth,
                trace_id: trace.id.clone(),
                subcalls: subcalls.clone(),
            });

            if let Err(e) = sandbox.initialize(context, bridges.clone()).await {
                let usage = budget_ctrl.lock().await.get_usage();
                trace.answer_source = Some(AnswerSource::Error);
                return RLMResult::failure(trace, usage, drain(&warnings).await, e.to_string());
            }

            let loaded = LoadedContext::load(context);
            let remaining = budget_ctrl.lock().await.get_remaining();
            let system_prompt =
                build_system_prompt(&loaded, depth, &remaining, self.config.prompt_hints.as_deref());

            loop {
                let can_continue = budget_ctrl.lock().await.can_proceed(CheckKind::Iteration);
                if !can_continue {
                    break;
                }

                let iteration_index = trace.iterations.len() as u32 + 1;
                let span = info_span!("iteration", index = iteration_index, depth);
                let outcome = self
                    .run_iteration(task, context, &system_prompt, depth, &mut trace, &mut *sandbox, &budget_ctrl)
                    .instrument(span)
                    .await;

                match outcome {
                    Ok(IterationOutcome::Continue) => continue,
                    Ok(IterationOutcome::Terminated) => break,
                    Err(e) => {
                        sandbox.destroy().await.ok();
                        let usage = budget_ctrl.lock().await.get_usage();
                        trace.answer_source = Some(AnswerSource::Error);
                        return RLMResult::failure(trace, usage, drain(&warnings).await, e.to_string());
                    }
                }
            }

            if trace.final_answer.is_empty() {
                self.force_answer(&mut trace, task, context, &system_prompt, &mut *sandbox, &budget_ctrl)
                    .await;
            }

            trace.subcalls = {
                let mut guard = subcalls.lock().await;
                std::mem::take(&mut *guard)
            };

            sandbox.destroy().await.ok();
            let usage = budget_ctrl.lock().await.get_usage();
            info!(iterations = trace.iterations.len(), depth, "execution complete");
            RLMResult::success(trace, usage, drain(&warnings).await)
        })
    }

    /// Run one REPL turn: call the router, execute any code blocks against
    /// the sandbox, and append the resulting [`Iteration`] to the trace.
    #[allow(clippy::too_many_arguments)]
    async fn run_iteration(
        &self,
        task: &str,
        context: &str,
        system_prompt: &str,
        depth: u32,
        trace: &mut ExecutionTrace,
        sandbox: &mut dyn Sandbox,
        budget_ctrl: &Arc<Mutex<BudgetController>>,
    ) -> Result<IterationOutcome> {
        let iteration_index = trace.iterations.len() as u32 + 1;
        let user_prompt = build_user_prompt(task, trace, context);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.clone(),
            max_tokens: self.config.max_completion_tokens,
        };

        let completion = self.router.complete(&self.config.provider, request).await?;

        budget_ctrl.lock().await.record(RecordDelta {
            cost: Some(completion.cost),
            input_tokens: Some(completion.input_tokens),
            output_tokens: Some(completion.output_tokens),
            iteration: true,
            depth: Some(depth),
            ..Default::default()
        });

        let parsed = parse_response(&completion.content);
        let mut code_executions = Vec::new();

        for code in &parsed.code_blocks {
            match sandbox.execute(code, self.config.iteration_timeout_ms).await {
                Ok(exec) => code_executions.push(exec),
                Err(e) if e.is_sandbox_fatal() => return Err(e),
                Err(e) => code_executions.push(CodeExecution {
                    code: code.clone(),
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(e.to_string()),
                    duration_ms: 0,
                }),
            }
        }

        info!(
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            code_executions = code_executions.len(),
            "iteration complete"
        );

        trace.iterations.push(Iteration {
            index: iteration_index,
            prompt: user_prompt,
            prompt_tokens: completion.input_tokens,
            response: completion.content.clone(),
            response_tokens: completion.output_tokens,
            cost: completion.cost,
            code_executions,
        });

        if let Some(termination) = parsed.termination {
            match termination {
                Termination::Direct { text } => {
                    trace.final_answer = text;
                    trace.answer_source = Some(AnswerSource::FinalDirect);
                    return Ok(IterationOutcome::Terminated);
                }
                Termination::Variable { name } => match sandbox.get_variable(&name).await {
                    Ok(Some(value)) => {
                        trace.final_answer = value;
                        trace.answer_source = Some(AnswerSource::FinalVar);
                        return Ok(IterationOutcome::Terminated);
                    }
                    Ok(None) => {
                        warn!(variable = %name, "FINAL_VAR referenced an unbound variable");
                    }
                    Err(e) if e.is_sandbox_fatal() => return Err(e),
                    Err(_) => {}
                },
            }
        }

        Ok(IterationOutcome::Continue)
    }

    /// Bypass `canProceed` with one last completion call that asks
    /// directly for a `FINAL(...)` answer, used once the iteration budget
    /// is exhausted without either termination marker appearing. Per P3,
    /// this is recorded in budget usage but never as a trace iteration.
    async fn force_answer(
        &self,
        trace: &mut ExecutionTrace,
        task: &str,
        context: &str,
        system_prompt: &str,
        sandbox: &mut dyn Sandbox,
        budget_ctrl: &Arc<Mutex<BudgetController>>,
    ) {
        let forced_prompt = format!(
            "{}\n\nYou are out of iterations. Respond with only FINAL(<your best answer to: {}>).",
            build_user_prompt(task, trace, context),
            task
        );
        let request = CompletionRequest {
            model: self.config.model.clone(),
            system_prompt: system_prompt.to_string(),
            user_prompt: forced_prompt,
            max_tokens: self.config.max_completion_tokens,
        };

        let completion = match self.router.complete(&self.config.provider, request).await {
            Ok(c) => c,
            Err(e) => {
                trace.final_answer = String::new();
                trace.answer_source = Some(AnswerSource::Error);
                warn!(error = %e, "forced-answer completion failed");
                return;
            }
        };

        // Cost/tokens count toward usage, but neither the iteration count
        // nor the trace gains an entry for this call (P3 / Scenario 3).
        budget_ctrl.lock().await.record(RecordDelta {
            cost: Some(completion.cost),
            input_tokens: Some(completion.input_tokens),
            output_tokens: Some(completion.output_tokens),
            ..Default::default()
        });

        let parsed = parse_response(&completion.content);
        let answer = match parsed.termination {
            Some(Termination::Direct { text }) => text,
            Some(Termination::Variable { name }) => match sandbox.get_variable(&name).await {
                Ok(Some(value)) => value,
                _ => completion.content.trim().to_string(),
            },
            None => completion.content.trim().to_string(),
        };

        trace.final_answer = answer;
        trace.answer_source = Some(AnswerSource::Forced);
    }
}

/// The result of one REPL turn, as decided by [`Executor::run_iteration`].
enum IterationOutcome {
    Continue,
    Terminated,
}

async fn drain(warnings: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    std::mem::take(&mut *warnings.lock().await)
}

fn build_system_prompt(
    context: &LoadedContext,
    depth: u32,
    remaining: &Remaining,
    prompt_hints: Option<&[String]>,
) -> String {
    let mut prompt = format!(
        "You are operating a Python-like REPL over a bound `context` variable \
         ({} chars, ~{} tokens, detected type: {:?}) at recursion depth {}.\n\
         Remaining budget: cost=${:.4}, tokens={}, time={}ms, iterations={}.\n\
         Write fenced ```repl``` or ```python``` code blocks to inspect and \
         transform `context`. Call `llm_query(prompt)` for a single-shot \
         completion, or `rlm_query(task)` / `batch_rlm_query(tasks)` to \
         recurse. When you have the answer, respond with FINAL(<answer>) or, \
         if the answer is bound to a variable, FINAL_VAR(<name>).",
        context.length,
        context.token_estimate,
        context.content_type,
        depth,
        remaining.cost,
        remaining.tokens,
        remaining.time_ms,
        remaining.iterations
    );

    if depth > 0 {
        prompt.push_str(&format!(
            "\n\nYou are a sub-RLM call at depth {depth}. Your allocation is \
             cost=${:.4}, tokens={}, time={}ms, iterations={} — work \
             efficiently and return FINAL/FINAL_VAR as soon as you have a \
             confident answer rather than spending the full allocation.",
            remaining.cost, remaining.tokens, remaining.time_ms, remaining.iterations
        ));
    }

    if let Some(hints) = prompt_hints {
        if !hints.is_empty() {
            prompt.push_str("\n\nMODEL HINTS:\n");
            for hint in hints {
                prompt.push_str(&format!("- {hint}\n"));
            }
        }
    }

    prompt
}

/// Prepend a bounded preview of `context` on the first iteration, so the
/// model sees some of what it's working with before it writes any code.
fn context_preview(context: &str) -> String {
    let total = context.chars().count();
    if total <= CONTEXT_PREVIEW_CHARS {
        return format!("\nContext:\n{context}\n");
    }
    let preview: String = context.chars().take(CONTEXT_PREVIEW_CHARS).collect();
    format!(
        "\nContext preview ({CONTEXT_PREVIEW_CHARS} of {total} characters):\n{preview}\n\
         [...truncated, {} more characters omitted]\n",
        total - CONTEXT_PREVIEW_CHARS
    )
}

fn build_user_prompt(task: &str, trace: &ExecutionTrace, context: &str) -> String {
    let mut prompt = format!("Task: {task}\n");
    if trace.iterations.is_empty() {
        prompt.push_str(&context_preview(context));
    }
    for iteration in &trace.iterations {
        prompt.push_str(&format!("\n--- iteration {} ---\n", iteration.index));
        prompt.push_str(&iteration.response);
        for exec in &iteration.code_executions {
            if !exec.stdout.is_empty() {
                prompt.push_str(&format!("\nstdout:\n{}", exec.stdout));
            }
            if let Some(err) = &exec.error {
                prompt.push_str(&format!("\nerror:\n{err}"));
            }
        }
    }
    prompt
}

/// Routes a sandbox's `llm_query`/`rlm_query`/`batch_*` calls back into
/// this executor's router (depth-preserving) or a recursive call one
/// depth deeper, sharing the parent's [`BudgetController`].
struct ExecutorBridges {
    executor: Arc<Executor>,
    budget: Arc<Mutex<BudgetController>>,
    context: String,
    depth: u32,
    trace_id: String,
    subcalls: Arc<Mutex<Vec<ExecutionTrace>>>,
}

#[async_trait]
impl BridgeHandler for ExecutorBridges {
    async fn on_llm_query(&self, prompt: String) -> Result<String> {
        let request = CompletionRequest {
            model: self.executor.config.subcall_model().to_string(),
            system_prompt: String::new(),
            user_prompt: prompt,
            max_tokens: self.executor.config.max_completion_tokens,
        };
        let response = self
            .executor
            .router
            .complete(self.executor.config.subcall_provider(), request)
            .await?;
        self.budget.lock().await.record(RecordDelta {
            cost: Some(response.cost),
            input_tokens: Some(response.input_tokens),
            output_tokens: Some(response.output_tokens),
            depth: Some(self.depth),
            ..Default::default()
        });
        Ok(response.content)
    }

    #[instrument(skip(self, task), fields(depth = self.depth))]
    async fn on_rlm_query(&self, task: String) -> Result<String> {
        let next_depth = self.depth + 1;
        let (can_recurse, block_reason, max_depth) = {
            let mut ctrl = self.budget.lock().await;
            let can_recurse = ctrl.can_proceed(CheckKind::Subcall(next_depth));
            (can_recurse, ctrl.get_block_reason(), ctrl.budget().max_depth)
        };
        if !can_recurse {
            return self.spawn_blocked_fallback(&task, block_reason, max_depth).await;
        }

        let sub_budget = {
            let ctrl = self.budget.lock().await;
            ctrl.get_sub_budget(self.depth).merge_over(ctrl.budget())
        };

        let result = self
            .executor
            .execute_at(&task, &self.context, sub_budget, next_depth, Some(self.trace_id.clone()))
            .await;

        self.budget.lock().await.record(RecordDelta {
            subcall: true,
            depth: Some(next_depth),
            cost: Some(result.usage.total_cost),
            input_tokens: Some(result.usage.input_tokens),
            output_tokens: Some(result.usage.output_tokens),
            ..Default::default()
        });

        let success = result.success;
        let output = result.output.clone();
        let error = result.error.clone();
        self.subcalls.lock().await.push(result.trace);

        if success {
            Ok(output)
        } else {
            Err(Error::sandbox_fatal(error.unwrap_or_else(|| "sub-call failed".to_string())))
        }
    }

    async fn on_batch_rlm_query(&self, tasks: Vec<String>) -> Result<Vec<String>> {
        let concurrency = self.executor.config.batch_concurrency.min(tasks.len()).max(1);
        let span = info_span!("batch_rlm_query", depth = self.depth, count = tasks.len());
        let results = stream::iter(tasks.into_iter().map(|t| self.on_rlm_query(t)))
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .instrument(span)
            .await;
        // A failing slot becomes an inline error marker rather than aborting
        // the rest of the batch.
        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|e| format!("[Error: {e}]")))
            .collect())
    }

    async fn on_batch_llm_query(&self, prompts: Vec<String>) -> Result<Vec<String>> {
        let concurrency = self.executor.config.batch_concurrency.min(prompts.len()).max(1);
        let results = stream::iter(prompts.into_iter().map(|p| self.on_llm_query(p)))
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await;
        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|e| format!("[Error: {e}]")))
            .collect())
    }
}

impl ExecutorBridges {
    /// Produce the depth/budget-capped placeholder for `rlm_query`: a
    /// one-shot direct answer using the subcall model, prefixed with the
    /// reason recursion was refused.
    async fn spawn_blocked_fallback(
        &self,
        task: &str,
        block_reason: Option<&'static str>,
        max_depth: u32,
    ) -> Result<String> {
        let reason = block_reason
            .map(|r| format!("{r} budget exhausted"))
            .unwrap_or_else(|| format!("max depth {max_depth} reached"));

        let preview: String = self.context.chars().take(FALLBACK_CONTEXT_CHARS).collect();
        let user_prompt = format!(
            "Answer this task directly using the context below; a sub-RLM call \
             could not be spawned.\n\nTask: {task}\n\nContext:\n{preview}"
        );
        let request = CompletionRequest {
            model: self.executor.config.subcall_model().to_string(),
            system_prompt: String::new(),
            user_prompt,
            max_tokens: self.executor.config.max_completion_tokens,
        };

        let answer = match self
            .executor
            .router
            .complete(self.executor.config.subcall_provider(), request)
            .await
        {
            Ok(response) => {
                self.budget.lock().await.record(RecordDelta {
                    cost: Some(response.cost),
                    input_tokens: Some(response.input_tokens),
                    output_tokens: Some(response.output_tokens),
                    depth: Some(self.depth),
                    ..Default::default()
                });
                let parsed = parse_response(&response.content);
                match parsed.termination {
                    Some(Termination::Direct { text }) => text,
                    _ => response.content.trim().to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "depth-cap fallback completion failed");
                String::new()
            }
        };

        Ok(format!("[Cannot spawn sub-RLM: {reason}] {answer}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{CompletionResponse, MockAdapter};
    use crate::sandbox::embedded::{EmbeddedSandbox, ScriptedExecution};

    fn router_with(responses: Vec<&str>) -> Arc<LLMRouter> {
        let mut router = LLMRouter::new();
        let scripted = responses
            .into_iter()
            .map(|content| CompletionResponse {
                content: content.to_string(),
                input_tokens: 10,
                output_tokens: 5,
                cost: 0.01,
            })
            .collect();
        router.register(Arc::new(MockAdapter::scripted("mock", scripted)));
        Arc::new(router)
    }

    fn factory(script: Vec<ScriptedExecution>) -> SandboxFactory {
        Arc::new(move || Box::new(EmbeddedSandbox::new(script.clone())) as Box<dyn Sandbox>)
    }

    #[tokio::test]
    async fn direct_final_terminates_on_first_iteration() {
        let router = router_with(vec!["FINAL(42)"]);
        let executor = Arc::new(Executor::new(router, ExecutorConfig::default(), factory(vec![])));
        let result = executor.execute("what is the answer", "some context", Budget::default()).await;
        assert!(result.success);
        assert_eq!(result.output, "42");
        assert_eq!(result.trace.answer_source, Some(AnswerSource::FinalDirect));
    }

    #[tokio::test]
    async fn final_var_resolves_sandbox_variable() {
        let router = router_with(vec!["```repl\nresult = 7\n```\nFINAL_VAR(result)"]);
        let script = vec![ScriptedExecution::ok("").setting("result", "7")];
        let executor = Arc::new(Executor::new(router, ExecutorConfig::default(), factory(script)));
        let result = executor.execute("compute", "ctx", Budget::default()).await;
        assert!(result.success);
        assert_eq!(result.output, "7");
        assert_eq!(result.trace.answer_source, Some(AnswerSource::FinalVar));
    }

    #[tokio::test]
    async fn exhausting_iterations_triggers_forced_answer() {
        let router = router_with(vec!["thinking, no marker yet"]);
        let budget = Budget {
            max_iterations: 1,
            ..Default::default()
        };
        let executor = Arc::new(Executor::new(router, ExecutorConfig::default(), factory(vec![])));
        let result = executor.execute("task", "ctx", budget).await;
        assert!(result.success);
        assert_eq!(result.trace.answer_source, Some(AnswerSource::Forced));
        // P3: the forced-answer call counts toward usage.iterations but
        // never becomes a trace entry of its own.
        assert_eq!(result.trace.iterations.len() as u32, result.usage.iterations);
    }

    #[tokio::test]
    async fn usage_accumulates_cost_across_iterations() {
        let router = router_with(vec!["still thinking", "FINAL(done)"]);
        let executor = Arc::new(Executor::new(router, ExecutorConfig::default(), factory(vec![])));
        let result = executor.execute("task", "ctx", Budget::default()).await;
        assert!(result.usage.total_cost >= 0.02 - f64::EPSILON);
        assert_eq!(result.trace.iterations.len(), 2);
    }

    #[tokio::test]
    async fn depth_cap_falls_back_to_direct_answer() {
        let router = router_with(vec!["FINAL(fallback answer)"]);
        let executor = Arc::new(Executor::new(router, ExecutorConfig::default(), factory(vec![])));
        let budget_ctrl = Arc::new(Mutex::new(BudgetController::new(Budget {
            max_depth: 0,
            ..Default::default()
        })));
        let bridges = ExecutorBridges {
            executor: executor.clone(),
            budget: budget_ctrl,
            context: "some bound context".to_string(),
            depth: 0,
            trace_id: "root".to_string(),
            subcalls: Arc::new(Mutex::new(Vec::new())),
        };

        let out = bridges.on_rlm_query("summarize this".to_string()).await.unwrap();
        assert!(out.starts_with("[Cannot spawn sub-RLM:"));
        assert!(out.contains("fallback answer"));
    }

    #[tokio::test]
    async fn batch_query_reports_per_slot_errors_without_aborting() {
        let router = router_with(vec!["unused"]);
        let config = ExecutorConfig {
            subcall_provider: Some("missing-provider".to_string()),
            ..ExecutorConfig::default()
        };
        let executor = Arc::new(Executor::new(router, config, factory(vec![])));
        let budget_ctrl = Arc::new(Mutex::new(BudgetController::new(Budget::default())));
        let bridges = ExecutorBridges {
            executor: executor.clone(),
            budget: budget_ctrl,
            context: "ctx".to_string(),
            depth: 0,
            trace_id: "root".to_string(),
            subcalls: Arc::new(Mutex::new(Vec::new())),
        };

        let out = bridges
            .on_batch_llm_query(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.starts_with("[Error:")));
    }
}
