//! # rlm-engine
//!
//! A Recursive Language Model execution engine: an iterative LLM/sandbox
//! control loop with hierarchical, per-depth budgeting.
//!
//! ## Core Components
//!
//! - [`parser`]: extracts code blocks and `FINAL`/`FINAL_VAR` termination
//!   markers from model output.
//! - [`budget`]: multi-dimensional cost/token/time/depth/iteration tracking
//!   and sub-budget derivation for recursive calls.
//! - [`router`]: a provider-id -> adapter registry for LLM completions.
//! - [`sandbox`]: the stateful interpreter session contract, with an
//!   out-of-process JSON-RPC backend and an in-process test backend.
//! - [`context`]: context-loading heuristics (length, token estimate,
//!   content-type detection, embedding-safe escaping).
//! - [`executor`]: the control loop tying the above together.
//! - [`trace`]: the immutable execution-tree record an `execute()` call
//!   produces.
//! - [`config`]: layered `RunConfig` resolution for the CLI.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rlm_engine::budget::Budget;
//! use rlm_engine::executor::{Executor, ExecutorConfig};
//! use rlm_engine::router::LLMRouter;
//! use rlm_engine::sandbox::embedded::EmbeddedSandbox;
//!
//! # async fn run() {
//! let router = Arc::new(LLMRouter::new());
//! let factory = Arc::new(|| Box::new(EmbeddedSandbox::new(vec![])) as _);
//! let executor = Arc::new(Executor::new(router, ExecutorConfig::default(), factory));
//! let result = executor.execute("summarize this", "some context", Budget::default()).await;
//! println!("{}", result.output);
//! # }
//! ```

pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod parser;
pub mod router;
pub mod sandbox;
pub mod trace;

pub use budget::{Budget, BudgetController, BudgetWarning, PartialBudget, Usage};
pub use config::RunConfig;
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorConfig};
pub use parser::{parse_response, ParsedResponse, Termination};
pub use router::{CompletionRequest, CompletionResponse, LLMAdapter, LLMRouter};
pub use sandbox::{BridgeHandler, Sandbox};
pub use trace::{AnswerSource, CodeExecution, ExecutionTrace, Iteration, RLMResult};
