use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use difykit_core::{
    DifyClient, DifyConfig, StreamSummary,
    files::FileUpload,
    model::{ChatEventKind, ChatRequest, ChatStreamEvent, WorkflowRequest, WorkflowStreamEvent},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Dify API smoke tool", long_about = None)]
struct Cli {
    /// Connector config (JSON or TOML). Without it, API_KEY / API_BASE_URL are read from the env.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "difykit-cli")]
    user: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat message and print the answer
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Stream a chat answer (prints deltas live; Ctrl-C cancels)
    ChatStream {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Run a workflow with `key=value` inputs
    Workflow {
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
    },
    /// Run a workflow and print each event as it arrives
    WorkflowStream {
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
    },
    /// Upload a local file for use in chat or workflow inputs
    Upload { path: PathBuf },
    /// List knowledge datasets
    Datasets,
}

fn parse_input(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn workflow_request(user: &str, inputs: Vec<(String, String)>) -> WorkflowRequest {
    inputs
        .into_iter()
        .fold(WorkflowRequest::new(user), |req, (k, v)| req.input(k, v))
}

/// Token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

fn report(summary: &StreamSummary) {
    eprintln!(
        "[done: {:?}, events={}, malformed={}]",
        summary.completion, summary.events_dispatched, summary.malformed_records
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DifyConfig::from_path(path)?,
        None => DifyConfig::from_env()?,
    };
    let client = DifyClient::new(config)?;
    tracing::debug!(base = %client.config().api_base_url, "client ready");

    match cli.command {
        Commands::Chat {
            message,
            conversation_id,
        } => {
            let mut req = ChatRequest::new(message, cli.user);
            req.conversation_id = conversation_id;
            let resp = client.send_message(req).await?;
            println!("{}", resp.answer);
            eprintln!("[conversation: {}]", resp.conversation_id);
        }
        Commands::ChatStream {
            message,
            conversation_id,
        } => {
            let mut req = ChatRequest::new(message, cli.user);
            req.conversation_id = conversation_id;
            let sink = |ev: ChatStreamEvent| match ev.event {
                ChatEventKind::Message | ChatEventKind::AgentMessage => {
                    if let Some(delta) = ev.answer {
                        print!("{delta}");
                        io::stdout().flush().ok();
                    }
                }
                ChatEventKind::MessageEnd => println!(),
                ChatEventKind::Error => {
                    eprintln!("[error: {}]", ev.message.unwrap_or_default());
                }
                _ => {}
            };
            let summary = client
                .send_streaming_message_cancellable(req, sink, cancel_on_ctrl_c())
                .await?;
            report(&summary);
        }
        Commands::Workflow { inputs } => {
            let resp = client.run_workflow(workflow_request(&cli.user, inputs)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::WorkflowStream { inputs } => {
            let sink = |ev: WorkflowStreamEvent| {
                println!("{} {}", ev.event.as_str(), ev.data);
            };
            let summary = client
                .run_workflow_streaming_cancellable(
                    workflow_request(&cli.user, inputs),
                    sink,
                    cancel_on_ctrl_c(),
                )
                .await?;
            report(&summary);
        }
        Commands::Upload { path } => {
            let uploaded = client.upload_file(FileUpload::from_path(path, cli.user)).await?;
            println!("{}", serde_json::to_string_pretty(&uploaded)?);
        }
        Commands::Datasets => {
            for ds in client.list_datasets().await? {
                println!("{}  {}", ds.id, ds.name);
            }
        }
    }

    Ok(())
}
