//! Hermes CLI - tool-augmented chat in the terminal
//!
//! Usage:
//!   hermes chat            - Interactive session
//!   hermes ask <prompt>    - One question, one answer
//!   hermes tools           - Print the tool schemas sent to the model
//!   hermes exec <file>     - Run a file in one of the sandboxes

mod chat;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hermes_core::{tool_schemas, HermesConfig, ToolDispatcher, ToolKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hermes")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Chat with an LLM that can search, call APIs and run code in sandboxes", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.hermes/config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,

    /// Ask a single question and print the reply
    Ask {
        /// The question
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },

    /// Print the tool schemas offered to the model
    Tools,

    /// Run a source file directly in a sandbox
    Exec {
        /// Which sandbox runs the file
        #[arg(long, value_enum, default_value_t = Backend::Script)]
        backend: Backend,

        /// Source file
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Rhai script sandbox
    Script,
    /// WASI Python interpreter
    Python,
}

impl Backend {
    fn tool(self) -> ToolKind {
        match self {
            Backend::Script => ToolKind::ExecuteSandboxA,
            Backend::Python => ToolKind::ExecuteSandboxB,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat => {
            let agent = config.agent()?;
            chat::run(&agent, &config).await?;
        }

        Commands::Ask { prompt } => {
            let agent = config.agent()?;
            chat::ask(&agent, &prompt.join(" ")).await?;
        }

        Commands::Tools => {
            println!("{}", serde_json::to_string_pretty(&tool_schemas())?);
        }

        Commands::Exec { backend, file } => {
            let code = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            exec(&config, backend, &code).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<HermesConfig> {
    let mut config = match path {
        Some(path) => HermesConfig::from_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => HermesConfig::from_file(&path)?,
            _ => HermesConfig::default(),
        },
    };
    config.apply_env()?;
    tracing::debug!(provider = %config.provider, model = %config.model, "configuration loaded");
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".hermes").join("config.json"))
}

async fn exec(config: &HermesConfig, backend: Backend, code: &str) -> anyhow::Result<()> {
    let mut dispatcher = ToolDispatcher::new()
        .with_script(config.script_sandbox())
        .with_timeouts(config.tool_timeouts());
    if let Some(session) = config.interpreter_session() {
        dispatcher = dispatcher.with_interpreter(session);
    }

    let arguments = serde_json::json!({ "code": code }).to_string();
    let dispatch = dispatcher.dispatch(backend.tool().name(), &arguments).await;

    for line in &dispatch.observations {
        eprintln!("│ {}", line);
    }
    println!("{}", serde_json::to_string_pretty(&dispatch.result)?);

    if !dispatch.result.ok {
        std::process::exit(1);
    }
    Ok(())
}
