use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nexus_orchestrator::{
    Engine, EngineConfig, FactoryCatalog, ModuleFilter, NewTask, Priority, api,
};

#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Module-based task orchestration engine")]
struct Cli {
    /// Path to nexus.json (overrides NEXUS_CONFIG and the default lookup)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Modules directory
    #[arg(long, global = true, env = "NEXUS_MODULES_DIR")]
    modules_dir: Option<PathBuf>,
    /// Number of queue workers
    #[arg(long, global = true, env = "NEXUS_WORKERS")]
    workers: Option<usize>,
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and serve the REST API
    Serve {
        /// Bind address, e.g. 127.0.0.1:8100
        #[arg(long, env = "NEXUS_API_BIND")]
        bind: Option<String>,
    },
    /// Discover modules and print the catalog
    Modules,
    /// Submit one task, optionally waiting for it to settle
    Run {
        #[arg(long = "type")]
        task_type: String,
        /// JSON object of task parameters
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, default_value = "normal")]
        priority: String,
        /// Seconds to wait for the task to settle
        #[arg(long, default_value_t = 60)]
        wait: u64,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::from_default_env().add_directive("nexus_orchestrator=info".parse()?),
    );
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(dir) = &cli.modules_dir {
        config.modules_dir = dir.clone();
    }
    if let Some(workers) = cli.workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.workers = workers;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api_bind = bind;
            }
            let bind = config.api_bind.clone();

            let engine = Arc::new(Engine::new(config, FactoryCatalog::with_builtins()));
            engine.start().await;

            let app = api::create_router(Arc::clone(&engine));
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("API listening on http://{}", bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                })
                .await?;

            engine.shutdown().await;
        }
        Commands::Modules => {
            let engine = Engine::new(config, FactoryCatalog::with_builtins());
            let summary = engine.discover_modules().await;

            let modules = engine.list_modules(&ModuleFilter::default()).await;
            println!("Found {} module(s):", modules.len());
            for module in modules {
                println!(
                    "  {} v{} [{}] priority={}",
                    module.id, module.version, module.module_type, module.priority
                );
                if !module.capabilities.is_empty() {
                    println!("    Capabilities: {}", module.capabilities.join(", "));
                }
            }

            if !summary.errors.is_empty() {
                println!();
                println!("{} manifest error(s):", summary.errors.len());
                for failure in &summary.errors {
                    println!("  {} [{}]: {}", failure.module, failure.code, failure.message);
                }
            }
        }
        Commands::Run {
            task_type,
            params,
            priority,
            wait,
        } => {
            let parameters: serde_json::Value = serde_json::from_str(&params)?;
            let serde_json::Value::Object(parameters) = parameters else {
                anyhow::bail!("--params must be a JSON object");
            };
            let priority: Priority = priority.parse().map_err(anyhow::Error::msg)?;

            let engine = Engine::new(config, FactoryCatalog::with_builtins());
            engine.start().await;

            let mut request = NewTask::new(task_type).with_priority(priority);
            request.parameters = parameters;
            let task = engine.submit(request).await?;
            info!("Submitted task {}", task.id);

            let outcome = engine.wait_task(&task.id, Duration::from_secs(wait)).await;
            engine.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&outcome?)?);
        }
    }

    Ok(())
}
