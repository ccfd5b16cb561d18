use std::collections::HashSet;
use std::path::PathBuf;

use agent_activity::{
    ActivityConfig, ActivitySnapshot, ActivitySubscription, AgentClient, ConnectionState,
    FileConfig, WebSocketTransport,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "activity")]
#[command(about = "Watch a remote agent's live activity feed")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./activity.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the feed of an existing session
    Watch {
        /// Session identifier returned by the agent
        session: String,
    },

    /// Submit a prompt and stream the agent's thinking while it works
    Ask {
        prompt: String,

        /// Agent to address (defaults to [agent].agent_id)
        #[arg(long)]
        agent_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "agent_activity=debug,activity=debug,info"
    } else {
        "agent_activity=info,activity=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let file_config = FileConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let transport = WebSocketTransport::new(file_config.feed.url_template.clone());
    // Fail fast on a template without a session placeholder
    transport
        .feed_url("probe")
        .context("Invalid [feed].url_template")?;
    let config = ActivityConfig::from_file(&file_config);

    match cli.command {
        Commands::Watch { session } => watch_command(transport, config, session, cli.format).await,
        Commands::Ask { prompt, agent_id } => {
            let agent_id = agent_id
                .or_else(|| file_config.agent.agent_id.clone())
                .context("No agent id: pass --agent-id or set [agent].agent_id")?;
            let client = AgentClient::new(
                file_config.agent.endpoint.clone(),
                file_config.agent.api_key.clone(),
            );
            ask_command(transport, config, client, &prompt, &agent_id, cli.format).await
        }
    }
}

async fn watch_command(
    transport: WebSocketTransport,
    config: ActivityConfig,
    session: String,
    format: OutputFormat,
) -> Result<()> {
    let mut sub = ActivitySubscription::new(transport, config);
    let mut rx = sub.watch();
    sub.set_session(Some(session));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_snapshot(&snapshot, format)?;

                if sub.connection_state() == ConnectionState::Closed && !snapshot.is_connected() {
                    warn!("feed closed");
                    break;
                }
            }
        }
    }

    sub.close();
    Ok(())
}

async fn ask_command(
    transport: WebSocketTransport,
    config: ActivityConfig,
    client: AgentClient,
    prompt: &str,
    agent_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let mut sub = ActivitySubscription::new(transport, config);

    // Open the feed before submitting so thinking arrives while we wait
    sub.set_session(Some(session_id.clone()));
    sub.set_processing(true);
    let printer = tokio::spawn(print_thinking(sub.watch(), format));

    let result = client.submit(prompt, agent_id, Some(&session_id)).await;
    sub.set_processing(false);
    printer.abort();

    let reply = result.context("Failed to reach the agent")?;
    if let Some(returned) = reply.session_id.as_deref() {
        if returned != session_id {
            info!(requested = %session_id, returned, "agent assigned a different session");
        }
    }

    if !reply.success {
        bail!("{}", reply.error_text());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reply)?),
        OutputFormat::Text => println!(
            "{}",
            reply
                .response_text()
                .unwrap_or_else(|| "(empty response)".to_string())
        ),
    }

    sub.close();
    Ok(())
}

/// Print each accepted thinking fragment once.
async fn print_thinking(mut rx: watch::Receiver<ActivitySnapshot>, format: OutputFormat) {
    let mut printed: HashSet<(String, u64)> = HashSet::new();
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        for fragment in snapshot.thinking_events() {
            if !printed.insert((fragment.agent_id.clone(), fragment.sequence)) {
                continue;
            }
            match format {
                OutputFormat::Json => {
                    if let Ok(line) = serde_json::to_string(fragment) {
                        eprintln!("{line}");
                    }
                }
                OutputFormat::Text => eprintln!("  … {}", fragment.text),
            }
        }
    }
}

fn print_snapshot(snapshot: &ActivitySnapshot, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(snapshot)?),
        OutputFormat::Text => {
            let link = if snapshot.is_connected() { "connected" } else { "disconnected" };
            let agent = match (snapshot.active_agent_name(), snapshot.active_agent_id()) {
                (Some(name), _) if !name.is_empty() => name.to_string(),
                (_, Some(id)) => id.to_string(),
                _ => "-".to_string(),
            };
            let status = if snapshot.is_processing() { "processing" } else { "idle" };
            match snapshot.last_thinking_message() {
                Some(thought) => println!("[{link}] {status} agent={agent} thinking: {thought}"),
                None => println!("[{link}] {status} agent={agent}"),
            }
        }
    }
    Ok(())
}
