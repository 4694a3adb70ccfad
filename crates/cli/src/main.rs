//! CLI entrypoint and subcommand orchestration.

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use agent::{
    AgentContext, AgentRunner, AnthropicClient, FilePromptStore, LlmClient, OpenAiClient,
    PromptTemplate, SystemPrompt, ToolRegistry, prompt,
};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use config::{Config, ProviderKind};
use proto::{AgentRunResult, ToolContext};
use tokio_util::sync::CancellationToken;
use tools::UtilityProvider;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful community concierge. \
Use the available tools to answer questions about members and the server. \
Be concise, and never invent tool results.";

/// Top-level command-line arguments for the concierge application.
#[derive(Parser)]
#[command(name = "concierge")]
#[command(about = "Tool-calling LLM agent runtime", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Also write debug-level logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent turn and print the answer
    Ask {
        /// The user message
        message: String,
        /// Requesting user id
        #[arg(short, long, default_value = "cli")]
        user_id: String,
        /// Guild (server) scope
        #[arg(short, long)]
        guild_id: Option<String>,
        /// Channel scope
        #[arg(long)]
        channel_id: Option<String>,
        /// Role held by the requesting user (repeatable)
        #[arg(short, long = "role")]
        roles: Vec<String>,
        /// Extra system prompt placeholder, KEY=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered tool providers and their tools
    Tools {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect prompt templates
    Prompt {
        #[command(subcommand)]
        command: PromptCommands,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    /// Render a template with the configured placeholder policy
    Render {
        /// Template path under the prompts directory
        path: String,
        /// Placeholder value, KEY=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// List the placeholders a template uses
    Vars {
        /// Template path under the prompts directory
        path: String,
    },
}

/// Parses a `KEY=VALUE` argument.
fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let mut _file_guard: Option<tracing_appender::non_blocking::WorkerGuard> = None;

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    match cli.log_file.as_deref() {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("--log-file must name a file")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            _file_guard = Some(guard);
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug,hyper_util=info,rustls=info,reqwest=info"));
            tracing_subscriber::registry()
                .with(console)
                .with(file)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(console).init();
        }
    }

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Ask {
            message,
            user_id,
            guild_id,
            channel_id,
            roles,
            vars,
            json,
        } => {
            let mut tool_context = ToolContext::new(user_id).with_roles(roles);
            if let Some(guild) = guild_id {
                tool_context = tool_context.with_guild(guild);
            }
            if let Some(channel) = channel_id {
                tool_context = tool_context.with_channel(channel);
            }
            cmd_ask(config, message, tool_context, vars.into_iter().collect(), json).await
        }
        Commands::Tools { json } => cmd_tools(&config, json),
        Commands::Prompt { command } => match command {
            PromptCommands::Render { path, vars } => {
                cmd_prompt_render(&config, &path, vars.into_iter().collect()).await
            }
            PromptCommands::Vars { path } => cmd_prompt_vars(&config, &path).await,
        },
    }
}

/// Builds the LLM client selected by `agent.provider`.
fn build_llm(config: &Config) -> anyhow::Result<Arc<dyn LlmClient>> {
    let kind = config.agent.provider_kind()?;
    let model = config.agent.effective_model()?;
    let api_key = config.agent.api_key.clone();
    if api_key.is_empty() {
        bail!(
            "no API key configured for {}; set agent.api_key, CONCIERGE_API_KEY, or {}",
            kind.name(),
            kind.api_key_env()
        );
    }
    let retry = config.agent.retry.policy();

    let client: Arc<dyn LlmClient> = match (kind, config.agent.effective_base_url()) {
        (ProviderKind::Anthropic, Some(url)) => {
            Arc::new(AnthropicClient::with_base_url(api_key, url, model).with_retry(retry))
        }
        (ProviderKind::Anthropic, None) => {
            Arc::new(AnthropicClient::new(api_key, model).with_retry(retry))
        }
        (ProviderKind::OpenAi, Some(url)) => {
            Arc::new(OpenAiClient::with_base_url(api_key, url, model).with_retry(retry))
        }
        (ProviderKind::OpenAi, None) => {
            Arc::new(OpenAiClient::new(api_key, model).with_retry(retry))
        }
    };
    Ok(client)
}

/// Registers the built-in providers and applies `tools.disabled`.
fn build_registry(config: &Config) -> anyhow::Result<Arc<ToolRegistry>> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register_provider(UtilityProvider::new())?;

    for name in &config.tools.disabled {
        if let Err(e) = registry.disable_provider(name) {
            warn!(provider = %name, error = %e, "Cannot disable tool provider");
        }
    }
    Ok(registry)
}

fn prompt_template(config: &Config) -> PromptTemplate {
    PromptTemplate::new(Arc::new(FilePromptStore::new(&config.prompts.dir)))
        .with_policy(config.prompts.placeholders)
}

/// Placeholders every system prompt can use, plus caller extras.
fn context_placeholders(
    tool_context: &ToolContext,
    extra: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut values = HashMap::from([
        ("user_id".to_string(), tool_context.user_id.clone()),
        (
            "guild_id".to_string(),
            tool_context.guild_id.clone().unwrap_or_default(),
        ),
        (
            "channel_id".to_string(),
            tool_context.channel_id.clone().unwrap_or_default(),
        ),
        ("user_roles".to_string(), tool_context.user_roles.join(", ")),
    ]);
    values.extend(extra);
    values
}

/// Runs one agent turn; Ctrl-C cancels it.
async fn cmd_ask(
    config: Config,
    message: String,
    tool_context: ToolContext,
    vars: HashMap<String, String>,
    json: bool,
) -> anyhow::Result<()> {
    let llm = build_llm(&config)?;
    let registry = build_registry(&config)?;
    let runner = AgentRunner::new(llm, config.agent.runner_config())
        .with_prompts(prompt_template(&config));

    let system_prompt = if config.prompts.system.is_empty() {
        SystemPrompt::Inline(DEFAULT_SYSTEM_PROMPT.to_string())
    } else {
        SystemPrompt::Template {
            path: config.prompts.system.clone(),
            placeholders: context_placeholders(&tool_context, vars),
        }
    };
    let ctx = AgentContext {
        system_prompt,
        tool_registry: registry,
        tool_context,
        max_tokens: config.agent.max_tokens,
        temperature: config.agent.temperature,
        enable_prompt_caching: config.agent.enable_prompt_caching,
        history: Vec::new(),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let result = runner.run(&message, &ctx, cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&config, &result);
    }

    if result.success {
        Ok(())
    } else {
        bail!(
            "run ended with {:?}: {}",
            result.outcome,
            result.error_message.as_deref().unwrap_or("unknown error")
        )
    }
}

fn print_result(config: &Config, result: &AgentRunResult) {
    if result.success {
        println!("{}", result.response);
    }
    let usage = &result.total_usage;
    let mut summary = format!(
        "[{:?}] {} tool round(s), {} input / {} output tokens",
        result.outcome, result.loop_count, usage.input_tokens, usage.output_tokens
    );
    if let Some(pricing) = config.agent.pricing {
        summary.push_str(&format!(
            ", ~${:.4}",
            usage.cost_usd(pricing.input_per_mtok, pricing.output_per_mtok)
        ));
    }
    if result.truncated {
        summary.push_str(" (truncated)");
    }
    eprintln!("{summary}");
}

fn cmd_tools(config: &Config, json: bool) -> anyhow::Result<()> {
    let registry = build_registry(config)?;
    let providers = registry.providers();
    if json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(());
    }
    for provider in providers {
        let state = if provider.enabled { "enabled" } else { "disabled" };
        println!("{} ({state}): {}", provider.name, provider.description);
        for tool in provider.tools {
            println!("  - {tool}");
        }
    }
    Ok(())
}

async fn cmd_prompt_render(
    config: &Config,
    path: &str,
    vars: HashMap<String, String>,
) -> anyhow::Result<()> {
    let rendered = prompt_template(config)
        .render(path, &vars)
        .await
        .with_context(|| format!("rendering prompt '{path}'"))?;
    println!("{rendered}");
    Ok(())
}

async fn cmd_prompt_vars(config: &Config, path: &str) -> anyhow::Result<()> {
    let template = prompt_template(config)
        .load(path)
        .await
        .with_context(|| format!("loading prompt '{path}'"))?;
    for name in prompt::placeholders_in(&template) {
        println!("{name}");
    }
    Ok(())
}
