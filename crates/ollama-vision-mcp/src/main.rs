//! Ollama Vision MCP Server — entry point.

use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use ollama_vision::{is_vision_model, OllamaClient, VisionConfig};
use ollama_vision_mcp::config::load_config;
use ollama_vision_mcp::logging;
use ollama_vision_mcp::protocol::ProtocolHandler;
use ollama_vision_mcp::service::VisionService;
use ollama_vision_mcp::tools::ToolRegistry;
use ollama_vision_mcp::transport::StdioTransport;

#[derive(Parser)]
#[command(
    name = "ollama-vision-mcp",
    about = "MCP server for Ollama Vision — image analysis with local vision models",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve,

    /// Start MCP server over HTTP.
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,
    },

    /// Print server capabilities, tools, and effective config as JSON.
    Info,

    /// List models installed in Ollama and mark the vision-capable ones.
    Models,

    /// Make sure a model is installed, pulling it if needed.
    ///
    /// Defaults to the first entry of `model_preferences`.
    Pull {
        /// Model name, e.g. llava-phi3.
        model: Option<String>,
    },

    /// Write an example config file.
    InitConfig {
        /// Destination path.
        #[arg(default_value = "ollama-vision-config.example.json")]
        path: String,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   ollama-vision-mcp completions bash > ~/.local/share/bash-completion/completions/ollama-vision-mcp
    ///   ollama-vision-mcp completions zsh > ~/.zfunc/_ollama-vision-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_control = logging::init(cli.log_level.as_deref());
    let (config, config_path) = load_config(cli.config.as_deref());
    log_control.apply_config(&config);

    match &config_path {
        Some(path) => tracing::info!("Found config file at: {}", path.display()),
        None => tracing::debug!("No config file found, using defaults and environment"),
    }

    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let service = Arc::new(VisionService::new(config)?);
            if !service.client().check_connection().await {
                tracing::warn!(
                    "Ollama is not reachable at {}; tool calls will fail until it is running",
                    service.client().base_url()
                );
            }
            let handler = ProtocolHandler::new(service);
            let transport = StdioTransport::new(handler);
            transport.run().await?;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp { addr } => {
            use ollama_vision_mcp::transport::SseTransport;

            let service = Arc::new(VisionService::new(config)?);
            tracing::info!("Ollama Vision MCP server (HTTP)");
            let transport = SseTransport::new(ProtocolHandler::new(service));
            transport.run(&addr).await?;
        }

        Commands::Info => {
            let capabilities = ollama_vision_mcp::types::InitializeResult::default_result();
            let tools = ToolRegistry::list_tools();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
                "config_file": config_path.as_ref().map(|p| p.display().to_string()),
                "config": &*config,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Models => {
            let client = OllamaClient::new(&config)?;
            if !client.check_connection().await {
                eprintln!("Cannot reach Ollama at {}", client.base_url());
                std::process::exit(1);
            }

            let models = client.list_models().await?;
            if models.is_empty() {
                println!("No models installed. Try: ollama-vision-mcp pull");
            }
            for model in &models {
                let mut tags = Vec::new();
                if is_vision_model(model) {
                    tags.push("vision");
                }
                if config.model_preferences.iter().any(|p| p == model) {
                    tags.push("preferred");
                }
                if *model == config.default_model {
                    tags.push("default");
                }
                println!("{model:<32} {}", tags.join(", "));
            }
        }

        Commands::Pull { model } => {
            let model = model
                .or_else(|| config.model_preferences.first().cloned())
                .unwrap_or_else(|| config.default_model.clone());
            let client = OllamaClient::new(&config)?;
            if client.ensure_model(&model).await {
                println!("Model {model} is available");
            } else {
                eprintln!("Failed to pull model {model}");
                std::process::exit(1);
            }
        }

        Commands::InitConfig { path } => {
            VisionConfig::write_example(Path::new(&path))?;
            println!("Wrote example config to {path}");
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "ollama-vision-mcp",
                &mut std::io::stdout(),
            );
        }

        Commands::Repl => {
            let service = Arc::new(VisionService::new(config)?);
            let runtime = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || ollama_vision_mcp::repl::run(service, runtime))
                .await??;
        }
    }

    Ok(())
}
