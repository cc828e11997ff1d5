//! Thin CLI wrapper: loads a context file and a task string, resolves a
//! `RunConfig`, runs one `execute()` call, and prints the resulting
//! `RLMResult` as JSON on stdout.

use clap::Parser;
use rlm_engine::config::{self, SandboxBackend};
use rlm_engine::executor::{Executor, SandboxFactory};
use rlm_engine::router::{LLMAdapter, LLMRouter, LoggingAdapter};
use rlm_engine::sandbox::embedded::EmbeddedSandbox;
use rlm_engine::sandbox::native::{NativeSandbox, NativeSandboxConfig};
use rlm_engine::sandbox::Sandbox;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rlm-engine", about = "Run a Recursive Language Model over a context")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Execute one task against a context file.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the file holding the context text to operate over.
    #[arg(long)]
    context: PathBuf,

    /// The task to accomplish against the context.
    #[arg(long)]
    task: String,

    /// Path to a layered TOML config file (defaults to ./rlm-engine.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured LLM provider id.
    #[arg(long)]
    provider: Option<String>,

    /// Override the configured iteration cap.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Override the configured sandbox backend (native or embedded).
    #[arg(long)]
    backend: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    let mut run_config = match config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&run_config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Some(provider) = args.provider {
        run_config.provider = provider;
    }
    if let Some(max_iterations) = args.max_iterations {
        run_config.max_iterations = max_iterations;
    }
    if let Some(backend) = args.backend.as_deref() {
        run_config.sandbox_backend = match backend {
            "native" => SandboxBackend::Native,
            "embedded" => SandboxBackend::Embedded,
            other => {
                eprintln!("unknown backend '{other}', expected 'native' or 'embedded'");
                return ExitCode::FAILURE;
            }
        };
    }

    let context = match std::fs::read_to_string(&args.context) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("failed to read context file {}: {e}", args.context.display());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(run_config, &context, &args.task));

    match result {
        Ok(rlm_result) => {
            let json = serde_json::to_string_pretty(&rlm_result).expect("RLMResult is always serializable");
            println!("{json}");
            if rlm_result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("execution error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    run_config: config::RunConfig,
    context: &str,
    task: &str,
) -> rlm_engine::error::Result<rlm_engine::trace::RLMResult> {
    let mut router = LLMRouter::new();
    let adapter: Arc<dyn LLMAdapter> = Arc::new(LoggingAdapter::new(anthropic_adapter(&run_config.provider)));
    router.register(adapter);

    let sandbox_factory: SandboxFactory = match run_config.sandbox_backend {
        SandboxBackend::Native => {
            let native_config = NativeSandboxConfig {
                python_path: run_config.python_path.clone(),
                package_path: run_config.sandbox_package_path.clone(),
                ..NativeSandboxConfig::default()
            };
            Arc::new(move || Box::new(NativeSandbox::new(native_config.clone())) as Box<dyn Sandbox>)
        }
        SandboxBackend::Embedded => {
            Arc::new(|| Box::new(EmbeddedSandbox::new(Vec::new())) as Box<dyn Sandbox>)
        }
    };

    let executor = Arc::new(Executor::new(
        Arc::new(router),
        run_config.executor_config(),
        sandbox_factory,
    ));

    Ok(executor.execute(task, context, run_config.budget()).await)
}

/// Placeholder adapter selection until a real provider is wired in; keeps
/// the CLI runnable end-to-end against the mock adapter by default.
fn anthropic_adapter(provider: &str) -> Arc<dyn LLMAdapter> {
    use rlm_engine::router::{CompletionResponse, MockAdapter};
    Arc::new(MockAdapter::constant(
        provider,
        CompletionResponse {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
        },
    ))
}
