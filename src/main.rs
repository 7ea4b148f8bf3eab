//! `mcp-bridge`: command-line front end for the MCP client and agent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use mcp_bridge::agent::{AgentOrchestrator, AgentRequest, SmartQueryOptions};
use mcp_bridge::llm::LmStudioClient;
use mcp_bridge::logging;
use mcp_bridge::mcp_client::{McpClient, McpError, SelfCheckReport};
use mcp_bridge::settings::{LogLevel, SettingsFile, SettingsProvider, SETTINGS_ENV_VAR};

/// Talk to the configured MCP servers and ask the model with live MCP data.
#[derive(Parser, Debug)]
#[command(name = "mcp-bridge", version, about, long_about = None)]
struct Args {
    /// Settings file (JSON or YAML). Discovered automatically when omitted.
    #[arg(long, env = SETTINGS_ENV_VAR)]
    settings: Option<PathBuf>,

    /// Write logs to this file (rotated on start) instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Force debug logging regardless of `mcpLogLevel`.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP and model health checklist
    Check,
    /// Print a JSON debug snapshot
    Debug,
    /// List configured servers and their status
    Servers,
    /// List available tools
    Tools,
    /// Call a tool by qualified name (`server:tool`)
    Call {
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Read a resource from a server
    Read { server: String, uri: String },
    /// Render a prompt template from a server
    Prompt {
        server: String,
        name: String,
        /// Prompt arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Ask the model, attaching MCP data
    Ask {
        prompt: String,
        /// Tool to call first (`server:tool`), repeatable
        #[arg(long = "tool")]
        tools: Vec<String>,
        /// Resource to attach (`server:uri`), repeatable
        #[arg(long = "resource")]
        resources: Vec<String>,
        /// Prompt template to attach (`server:prompt`), repeatable
        #[arg(long = "prompt")]
        prompts: Vec<String>,
        /// Arguments for tool calls and prompt renders, as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Pick relevant tools, resources and prompts automatically
        #[arg(long)]
        auto: bool,
        /// Upper bound per capability kind with --auto
        #[arg(long, default_value_t = 3)]
        max_items: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings_file = match &args.settings {
        Some(path) => SettingsFile::at(path),
        None => SettingsFile::discover(&std::env::current_dir().context("no working directory")?),
    };

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        settings_file
            .load()
            .map(|s| s.mcp_log_level)
            .unwrap_or_default()
    };
    logging::init_tracing(level, args.log_file.as_deref()).context("failed to set up logging")?;

    match settings_file.path() {
        Some(path) => tracing::debug!(path = %path.display(), "using settings file"),
        None => tracing::debug!("no settings file found, using defaults"),
    }

    let settings: Arc<dyn SettingsProvider> = Arc::new(settings_file);
    let loaded = settings.load().context("failed to load settings")?;

    let client = Arc::new(McpClient::new(settings.clone()));
    let _events = client.spawn_event_loop();
    let model = Arc::new(LmStudioClient::from_settings(&loaded)?);
    let agent = AgentOrchestrator::new(client.clone(), model, settings);

    report_connect_errors(&agent.initialize().await);

    let outcome = run(&args.command, &agent, &client).await;
    agent.dispose().await;
    outcome
}

async fn run(command: &Commands, agent: &AgentOrchestrator, client: &McpClient) -> Result<()> {
    match command {
        Commands::Check => {
            let report = agent.run_self_check().await;
            print_report(&report);
            if !report.passed {
                bail!("self-check failed");
            }
        }
        Commands::Debug => print_json(&agent.get_debug_info().await)?,
        Commands::Servers => {
            for server in client.get_servers().await {
                println!(
                    "{:<20} {:<12} {}  (tools: {}, resources: {}, prompts: {})",
                    server.config.name,
                    server.status.to_string(),
                    server.config.url,
                    server.tools.len(),
                    server.resources.len(),
                    server.prompts.len(),
                );
                if let Some(err) = &server.last_error {
                    println!("    last error: {err}");
                }
            }
        }
        Commands::Tools => {
            for tool in client.get_available_tools().await {
                println!("{:<32} {}", tool.qualified_name(), tool.description);
            }
        }
        Commands::Call { tool, args } => {
            let arguments = parse_json_arg(args.as_deref())?;
            match client.call_tool(tool, arguments).await {
                Ok(result) => print_json(&result)?,
                Err(e @ McpError::UnknownTool { .. }) => {
                    let suggestions = client.suggest_tools(tool).await;
                    if !suggestions.is_empty() {
                        eprintln!("did you mean: {}", suggestions.join(", "));
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Read { server, uri } => print_json(&client.read_resource(server, uri).await?)?,
        Commands::Prompt { server, name, args } => {
            let arguments = args
                .as_deref()
                .map(|raw| parse_json_arg(Some(raw)))
                .transpose()?;
            print_json(&client.get_prompt(server, name, arguments).await?)?;
        }
        Commands::Ask {
            prompt,
            tools,
            resources,
            prompts,
            args,
            auto,
            max_items,
        } => {
            let context = args
                .as_deref()
                .map(|raw| parse_json_arg(Some(raw)))
                .transpose()?;
            let response = if *auto {
                agent
                    .smart_query(
                        prompt,
                        SmartQueryOptions {
                            auto_select: true,
                            max_items: *max_items,
                            context,
                        },
                    )
                    .await?
            } else {
                let mut request = AgentRequest::new(prompt.as_str());
                request.context = context;
                request.mcp_tools = tools.clone();
                request.mcp_resources = resources.clone();
                request.mcp_prompts = prompts.clone();
                agent.process_request(request).await?
            };

            println!("{}", response.content);
            if !response.mcp_results.is_empty() {
                eprintln!();
                eprintln!("{}", serde_json::to_string_pretty(&response.mcp_results)?);
            }
        }
    }
    Ok(())
}

fn parse_json_arg(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
            if !value.is_object() {
                bail!("--args must be a JSON object");
            }
            Ok(value)
        }
        None => Ok(Value::Object(Default::default())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &SelfCheckReport) {
    for finding in &report.findings {
        println!("{finding}");
    }
    println!();
    println!("{}", if report.passed { "PASSED" } else { "FAILED" });
}

fn report_connect_errors(errors: &[(String, McpError)]) {
    for (server, err) in errors {
        eprintln!("warning: {server}: {err}");
    }
}
