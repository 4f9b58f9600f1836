//! Interactive REPL for the Ollama Vision MCP server.
//!
//! Launch with `ollama-vision-mcp repl` to enter interactive mode.
//! Type `/help` for available commands, Tab for completion.

use std::sync::Arc;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use serde_json::json;
use tokio::runtime::Handle;

use ollama_vision::is_vision_model;
use ollama_vision::normalize::is_supported_extension;

use crate::service::VisionService;
use crate::tools::ToolRegistry;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/analyze", "Analyze an image: /analyze <image> [prompt]"),
    ("/describe", "Describe an image in detail"),
    ("/objects", "List the objects in an image"),
    ("/text", "Read the text in an image"),
    ("/models", "List installed Ollama models"),
    ("/pull", "Pull a model: /pull [model]"),
    ("/tools", "List available MCP tools"),
    ("/info", "Show server capabilities and tools"),
    ("/config", "Show the effective configuration"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// Commands whose first argument is an image path.
const IMAGE_COMMANDS: &[&str] = &["/analyze", "/describe", "/objects", "/text"];

/// REPL helper for tab completion.
#[derive(Default)]
struct VisionHelper;

impl Completer for VisionHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        // Image file completion in the working directory
        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        if IMAGE_COMMANDS.contains(&cmd) && !args.contains(' ') {
            let mut files = Vec::new();
            if let Ok(entries) = std::fs::read_dir(".") {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_file() && is_supported_extension(&path) {
                        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                            files.push(name.to_string());
                        }
                    }
                }
            }
            files.sort();
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = files
                .iter()
                .filter(|f| f.starts_with(args))
                .map(|f| Pair {
                    display: f.clone(),
                    replacement: format!("{f} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for VisionHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for VisionHelper {}
impl Validator for VisionHelper {}
impl Helper for VisionHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Run the interactive REPL.
///
/// Blocks on readline, so call it from a blocking thread; `runtime` drives
/// the async tool calls.
pub fn run(service: Arc<VisionService>, runtime: Handle) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mollama-vision-mcp v{}\x1b[0m \x1b[90m\u{2014} Local image analysis via Ollama\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<VisionHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(VisionHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".ollama_vision_mcp_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mvision>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                let args = args.trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "info" => cmd_info(),
                    "tools" => cmd_tools(),
                    "config" => cmd_config(&service),
                    "models" => cmd_models(&service, &runtime),
                    "pull" => cmd_pull(args, &service, &runtime),
                    "analyze" => cmd_tool("analyze_image", args, true, &service, &runtime),
                    "describe" => cmd_tool("describe_image", args, false, &service, &runtime),
                    "objects" => cmd_tool("identify_objects", args, false, &service, &runtime),
                    "text" => cmd_tool("read_text", args, false, &service, &runtime),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(std::path::Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

/// Build tool arguments from `<image> [prompt]`.
///
/// Returns `None` when no image was given.
fn tool_arguments(args: &str, with_prompt: bool) -> Option<serde_json::Value> {
    let (image, rest) = args.split_once(' ').unwrap_or((args, ""));
    if image.is_empty() {
        return None;
    }
    let mut value = json!({ "image_path": image });
    let rest = rest.trim();
    if with_prompt && !rest.is_empty() {
        value["prompt"] = json!(rest);
    }
    Some(value)
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands and image files.");
    eprintln!();
}

fn cmd_info() {
    let capabilities = crate::types::InitializeResult::default_result();
    let tools = ToolRegistry::list_tools();
    eprintln!();
    eprintln!(
        "  Server:   {} v{}",
        capabilities.server_info.name, capabilities.server_info.version
    );
    eprintln!("  Protocol: {}", capabilities.protocol_version);
    eprintln!("  Tools:    {}", tools.len());
    eprintln!();
}

fn cmd_tools() {
    let tools = ToolRegistry::list_tools();
    eprintln!();
    eprintln!("  {} MCP tools available:", tools.len());
    eprintln!();
    for tool in &tools {
        eprintln!(
            "    {:<28} {}",
            tool.name,
            tool.description.as_deref().unwrap_or("")
        );
    }
    eprintln!();
}

fn cmd_config(service: &VisionService) {
    match serde_json::to_string_pretty(service.config()) {
        Ok(text) => {
            eprintln!();
            for line in text.lines() {
                eprintln!("  {line}");
            }
            eprintln!();
        }
        Err(e) => eprintln!("  Cannot render config: {e}"),
    }
}

fn cmd_models(service: &VisionService, runtime: &Handle) {
    let client = service.client();
    match runtime.block_on(client.list_models()) {
        Ok(models) if models.is_empty() => {
            eprintln!("  No models installed. Try /pull");
        }
        Ok(models) => {
            eprintln!();
            for model in &models {
                let marker = if is_vision_model(model) { "vision" } else { "" };
                eprintln!("    {model:<32} {marker}");
            }
            eprintln!();
        }
        Err(e) => eprintln!("  Cannot list models from {}: {e}", client.base_url()),
    }
}

fn cmd_pull(args: &str, service: &VisionService, runtime: &Handle) {
    let config = service.config();
    let model = match args.split_whitespace().next() {
        Some(name) => name.to_string(),
        None => config
            .model_preferences
            .first()
            .cloned()
            .unwrap_or_else(|| config.default_model.clone()),
    };

    eprintln!("  Ensuring {model} is installed...");
    if runtime.block_on(service.client().ensure_model(&model)) {
        eprintln!("  Model {model} is available");
    } else {
        eprintln!("  Failed to pull model {model}");
    }
}

fn cmd_tool(
    tool: &str,
    args: &str,
    with_prompt: bool,
    service: &VisionService,
    runtime: &Handle,
) {
    let Some(arguments) = tool_arguments(args, with_prompt) else {
        let usage = if with_prompt { " [prompt]" } else { "" };
        eprintln!("  Usage: <image path or URL>{usage}");
        return;
    };

    eprintln!("  \x1b[90mRunning {tool}...\x1b[0m");
    let result = runtime.block_on(ToolRegistry::call(tool, Some(arguments), service));
    println!();
    println!("{}", result.first_text().unwrap_or_default());
    println!();
}
