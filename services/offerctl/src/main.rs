use std::path::PathBuf;

use admin_ipc::{send_request, AdminRequest, DEFAULT_SOCKET_PATH};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use offers::OfferRecord;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "ADMIN_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Status,
    Pause,
    Resume,
    /// Zero the session's offer counters.
    ResetCounts,
    /// Submit a JSON array of offers as one scrape batch.
    Submit { file: PathBuf },
    /// Apply a JSON settings patch, e.g. '{"minAmount": 10}'.
    Set { patch: String },
    TestTelegram {
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        chat_id: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
}

fn build_request(command: Command) -> Result<AdminRequest> {
    Ok(match command {
        Command::Status => AdminRequest::Status,
        Command::Pause => AdminRequest::Pause,
        Command::Resume => AdminRequest::Resume,
        Command::ResetCounts => AdminRequest::ResetCounts,
        Command::Submit { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let offers: Vec<OfferRecord> =
                serde_json::from_str(&raw).context("offers file must be a JSON array of offers")?;
            AdminRequest::SubmitOffers(offers)
        }
        Command::Set { patch } => {
            AdminRequest::UpdateSettings(serde_json::from_str(&patch).context("patch must be JSON")?)
        }
        Command::TestTelegram {
            token,
            chat_id,
            message,
        } => AdminRequest::TestTelegram {
            token,
            chat_id,
            message,
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let req = build_request(cli.command)?;
    let resp = send_request(&cli.socket, &req).await?;
    println!("{}", serde_json::to_string(&resp)?);
    Ok(())
}
