use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use ansari_agent::{Agent, AgentSettings};
use ansari_channels::whatsapp::WhatsAppChannel;
use ansari_channels::{Channel, render_answer};
use ansari_core::config::{Config, data_dir};
use ansari_core::history::{MessageRow, from_rows, to_row};
use ansari_core::message::{Message, SourceDoc};
use ansari_core::prompts::PromptStore;
use ansari_core::store::{JsonlThreadStore, MessageLogger, ThreadStore};
use ansari_gateway::{AppState, start_gateway};
use ansari_providers::anthropic::AnthropicProvider;
use ansari_providers::openai::OpenAiProvider;
use ansari_providers::{Credentials, LlmProvider};
use ansari_tools::ToolRegistry;
use ansari_tools::hadith::SearchHadith;
use ansari_tools::mawsuah::SearchMawsuah;
use ansari_tools::quran::SearchQuran;
use ansari_tools::tafsir::SearchTafsir;

#[derive(Parser)]
#[command(
    name = "ansari",
    about = "Ansari — an Islamic-knowledge assistant backed by Quran, hadith, fiqh, and tafsir search",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server (and any configured channels)
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Chat with Ansari on the terminal (one-shot or interactive)
    Chat {
        /// Message to send (omit for interactive mode)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Answer a file of questions, one per line
    Batch {
        /// Input file path
        input: String,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("config.json5"));
    let config = Arc::new(Config::load(&config_path)?);

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Chat { message } => chat(config, message).await,
        Commands::Batch { input, output } => batch(config, &input, output.as_deref()).await,
    }
}

/// Pick the configured provider: Anthropic first, then OpenAI.
fn build_provider(config: &Config) -> anyhow::Result<(Arc<dyn LlmProvider>, Credentials)> {
    if let Some(providers) = &config.providers {
        if let Some(anthropic) = &providers.anthropic {
            if let Some(api_key) = anthropic.resolve_api_key() {
                return Ok((
                    Arc::new(AnthropicProvider::new(anthropic.base_url.as_deref())),
                    Credentials::ApiKey { api_key },
                ));
            }
        }
        if let Some(openai) = &providers.openai {
            if let Some(api_key) = openai.resolve_api_key() {
                return Ok((
                    Arc::new(OpenAiProvider::new(openai.base_url.as_deref())),
                    Credentials::ApiKey { api_key },
                ));
            }
        }
    }
    anyhow::bail!(
        "no LLM provider configured — set providers.anthropic.api_key_env or providers.openai.api_key_env"
    )
}

/// Register every tool whose backend is configured.
fn build_tools(config: &Config) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    if let Some(tools) = &config.tools {
        if let Some(kalimat) = &tools.kalimat {
            match SearchQuran::new(kalimat) {
                Ok(tool) => registry.register(Box::new(tool)),
                Err(e) => warn!(%e, "search_quran unavailable"),
            }
            match SearchHadith::new(kalimat) {
                Ok(tool) => registry.register(Box::new(tool)),
                Err(e) => warn!(%e, "search_hadith unavailable"),
            }
        }
        if let Some(vectara) = &tools.vectara {
            match SearchMawsuah::new(vectara) {
                Ok(tool) => registry.register(Box::new(tool)),
                Err(e) => warn!(%e, "search_mawsuah unavailable"),
            }
            match SearchTafsir::new(vectara) {
                Ok(tool) => registry.register(Box::new(tool)),
                Err(e) => warn!(%e, "search_tafsir unavailable"),
            }
        }
    }

    if registry.is_empty() {
        warn!("No search tools configured; Ansari will answer from the model alone");
    }
    Arc::new(registry)
}

fn build_state(config: Arc<Config>) -> anyhow::Result<(Arc<AppState>, Option<ansari_core::prompts::PromptWatcher>)> {
    let (provider, credentials) = build_provider(&config)?;
    let tools = build_tools(&config);
    let store: Arc<dyn ThreadStore> = Arc::new(JsonlThreadStore::new(config.storage_dir()));
    let prompts = PromptStore::load(config.prompts_dir())?;

    let watcher = if config.prompts_hot_reload() {
        Some(prompts.watch()?)
    } else {
        None
    };

    Ok((
        Arc::new(AppState {
            config,
            provider,
            credentials,
            tools,
            store,
            prompts,
        }),
        watcher,
    ))
}

async fn serve(config: Arc<Config>, port: Option<u16>) -> anyhow::Result<()> {
    let (state, _prompt_watcher) = build_state(config.clone())?;

    // WhatsApp webhook, when configured, feeds the same agent pipeline.
    // The handle must outlive the server or the listener shuts down.
    let mut _whatsapp_handle = None;
    if let Some(whatsapp_config) = config.channels.as_ref().and_then(|c| c.whatsapp.clone()) {
        match WhatsAppChannel::new(whatsapp_config) {
            Ok(channel) => {
                let channel = Arc::new(channel);
                let (mut inbound, handle) = channel.start().await?;
                _whatsapp_handle = Some(handle);
                let state = state.clone();
                let channel_out = channel.clone();
                tokio::spawn(async move {
                    let mut threads: HashMap<String, uuid::Uuid> = HashMap::new();
                    while let Some(query) = inbound.recv().await {
                        let thread_id = match threads.get(&query.sender_id) {
                            Some(id) => *id,
                            None => match state.store.create().await {
                                Ok(meta) => {
                                    threads.insert(query.sender_id.clone(), meta.id);
                                    meta.id
                                }
                                Err(e) => {
                                    error!(%e, "Failed to create WhatsApp thread");
                                    continue;
                                }
                            },
                        };
                        let answer = answer_on_thread(&state, thread_id, &query.text).await;
                        if let Err(e) = channel_out.send(&query.chat_id, &answer).await {
                            error!(%e, "WhatsApp delivery failed");
                        }
                    }
                });
                info!("WhatsApp channel attached");
            }
            Err(e) => warn!(%e, "WhatsApp channel not started"),
        }
    }

    let bind = config.gateway_bind();
    let port = port.unwrap_or_else(|| config.gateway_port());
    start_gateway(state, &bind, port).await
}

/// Run one turn against a stored thread and return the rendered answer,
/// including the citation trailer.
async fn answer_on_thread(state: &AppState, thread_id: uuid::Uuid, text: &str) -> String {
    let rows = match state.store.load(thread_id).await {
        Ok(Some(record)) => record.rows,
        _ => Vec::new(),
    };
    let seen = rows.len();

    let user = Message::user(text);
    if let Err(e) = state.store.append_row(thread_id, &to_row(&user)).await {
        error!(%e, "Failed to persist user message");
    }
    let mut history = from_rows(&rows);
    history.push(user);

    let agent = state.build_agent(thread_id);
    let mut stream = agent.replace_message_history(history);
    let mut answer = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => answer.push_str(&fragment),
            Err(e) => {
                error!(%e, "Agent turn failed");
                return "Something went wrong while answering. Please try again.".into();
            }
        }
    }

    // Gather the references this turn produced for the citation trailer.
    let references: Vec<SourceDoc> = match state.store.load(thread_id).await {
        Ok(Some(record)) => from_rows(&record.rows)
            .iter()
            .skip(seen + 1)
            .flat_map(|m| m.references().into_iter().cloned().collect::<Vec<_>>())
            .collect(),
        _ => Vec::new(),
    };
    let refs: Vec<&SourceDoc> = references.iter().collect();
    render_answer(&answer, &refs)
}

/// In-memory row log for the interactive REPL.
struct MemoryLogger {
    rows: Arc<tokio::sync::Mutex<Vec<MessageRow>>>,
}

#[async_trait::async_trait]
impl MessageLogger for MemoryLogger {
    async fn log(&self, row: &MessageRow) {
        self.rows.lock().await.push(row.clone());
    }
}

async fn chat(config: Arc<Config>, message: Option<String>) -> anyhow::Result<()> {
    let (provider, credentials) = build_provider(&config)?;
    let tools = build_tools(&config);
    let prompts = PromptStore::load(config.prompts_dir())?;
    let system_prompt = prompts
        .render("system_msg", &[])
        .unwrap_or_else(|_| ansari_gateway::state::DEFAULT_SYSTEM_PROMPT.to_string());

    let rows = Arc::new(tokio::sync::Mutex::new(Vec::<MessageRow>::new()));

    let one_shot = message.is_some();
    let mut pending = message;
    loop {
        let text = match pending.take() {
            Some(text) => text,
            None => {
                let input: String = dialoguer::Input::new()
                    .with_prompt("you")
                    .allow_empty(true)
                    .interact_text()?;
                if input.trim().is_empty() || input.trim() == "/exit" {
                    break;
                }
                input
            }
        };

        let agent = Agent::new(
            system_prompt.clone(),
            Arc::clone(&provider),
            credentials.clone(),
            Arc::clone(&tools),
            Some(Arc::new(MemoryLogger { rows: rows.clone() })),
            AgentSettings::from_config(&config),
        );

        let mut history = from_rows(&rows.lock().await.clone());
        let user = Message::user(text);
        rows.lock().await.push(to_row(&user));
        history.push(user);

        let mut stream = agent.replace_message_history(history);
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    use std::io::Write;
                    print!("{fragment}");
                    let _ = std::io::stdout().flush();
                }
                Err(e) => {
                    error!(%e, "Agent turn failed");
                    println!("Something went wrong while answering. Please try again.");
                    break;
                }
            }
        }
        println!();

        if one_shot {
            break;
        }
    }

    Ok(())
}

async fn batch(config: Arc<Config>, input: &str, output: Option<&str>) -> anyhow::Result<()> {
    let (provider, credentials) = build_provider(&config)?;
    let tools = build_tools(&config);
    let prompts = PromptStore::load(config.prompts_dir())?;
    let system_prompt = prompts
        .render("system_msg", &[])
        .unwrap_or_else(|_| ansari_gateway::state::DEFAULT_SYSTEM_PROMPT.to_string());

    let questions = tokio::fs::read_to_string(input).await?;
    let mut answers = String::new();

    for question in questions.lines().filter(|l| !l.trim().is_empty()) {
        info!(question, "Batch question");
        let agent = Agent::new(
            system_prompt.clone(),
            Arc::clone(&provider),
            credentials.clone(),
            Arc::clone(&tools),
            None,
            AgentSettings::from_config(&config),
        );

        let mut stream = agent.process_input(question);
        let mut answer = String::new();
        let mut failed = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => answer.push_str(&fragment),
                Err(e) => {
                    error!(%e, question, "Batch question failed");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            answer = "(failed)".into();
        }

        answers.push_str(&format!("Q: {question}\nA: {answer}\n\n"));
    }

    match output {
        Some(path) => {
            tokio::fs::write(path, answers.as_bytes()).await?;
            info!(path, "Batch answers written");
        }
        None => print!("{answers}"),
    }

    Ok(())
}
