use tokio::net::UnixStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use chrono::{DateTime, Utc};
use common::CredentialSnapshot;
use colored::*;

#[derive(Parser)]
#[command(name = "evwatch-cli", about = "Query a running evwatch agent")]
struct Cli {
    /// Agent IPC socket
    #[arg(long, default_value = "/run/evwatch/evwatch.sock")]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poller state, last cycle and token expiry
    Status,
    /// Liveness check
    Health,
    /// Client secret expiry and warnings already issued
    SecretExpiry,
}

#[derive(Serialize)]
struct IpcRequest {
    method: String,
}

#[derive(Deserialize)]
struct IpcResponse {
    success: bool,
    data: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (method, printer): (&str, fn(&serde_json::Value)) = match cli.command {
        Command::Status => ("status", print_status),
        Command::Health => ("health", print_health),
        Command::SecretExpiry => ("secret_expiry", print_secret_expiry),
    };

    let response = send_request(&cli.socket, method)
        .await
        .with_context(|| format!("Could not reach agent at {}", cli.socket))?;

    if !response.success {
        let error = response.data.get("error").and_then(|e| e.as_str()).unwrap_or("Unknown error");
        eprintln!("{} {}", "Error:".red().bold(), error);
        std::process::exit(1);
    }

    printer(&response.data);
    Ok(())
}

async fn send_request(socket_path: &str, method: &str) -> Result<IpcResponse> {
    let mut stream = UnixStream::connect(socket_path).await?;

    let request = IpcRequest { method: method.to_string() };

    let request_json = serde_json::to_string(&request)?;
    stream.write_all(request_json.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer).await?;

    let response: IpcResponse = serde_json::from_slice(&buffer)?;
    Ok(response)
}

fn print_health(data: &serde_json::Value) {
    println!("{} {}", "Agent:".bright_cyan(), data.as_str().unwrap_or("unknown").bright_green().bold());
}

fn print_status(data: &serde_json::Value) {
    let status = data["status"].as_str().unwrap_or("unknown");
    let status_colored = if status == "running" { status.bright_green().bold() } else { status.yellow().bold() };

    println!("\n{}", "evwatch agent".bright_cyan().bold());
    println!("{} {}", "  Status:  ".bright_cyan(), status_colored);
    println!("{} {}", "  Uptime:  ".bright_cyan(), format_duration(data["uptime_seconds"].as_i64().unwrap_or(0)));
    println!("{} {}", "  Interval:".bright_cyan(), format_duration(data["interval_seconds"].as_i64().unwrap_or(0)));

    let cycle = &data["last_cycle"];
    if cycle.is_null() {
        println!("{} {}", "  Last poll:".bright_cyan(), "never".dimmed());
    } else {
        let started = cycle["started_at"].as_str().map(format_instant).unwrap_or_else(|| "?".to_string());
        let outcome = match cycle["outcome"]["status"].as_str() {
            Some("succeeded") => "succeeded".bright_green().to_string(),
            _ => format!("failed: {}", cycle["outcome"]["reason"].as_str().unwrap_or("unknown")).as_str().red().to_string(),
        };
        println!("{} {} ({} ms) {}", "  Last poll:".bright_cyan(), started, cycle["duration_ms"], outcome);
    }

    if let Ok(snapshot) = serde_json::from_value::<CredentialSnapshot>(data["credentials"].clone()) {
        println!();
        print_snapshot(&snapshot);
    }
    println!();
}

fn print_secret_expiry(data: &serde_json::Value) {
    match serde_json::from_value::<CredentialSnapshot>(data.clone()) {
        Ok(snapshot) => {
            println!();
            print_snapshot(&snapshot);
            println!();
        }
        Err(e) => eprintln!("{} {}", "Unexpected response:".red().bold(), e),
    }
}

fn print_snapshot(snapshot: &CredentialSnapshot) {
    println!("{}", "Credentials".bright_cyan().bold());
    let token = if snapshot.has_token { "held".bright_green() } else { "none".yellow() };
    println!("{} {}", "  Token:        ".bright_cyan(), token);
    println!("{} {}", "  Token expires:".bright_cyan(), snapshot.token_expires_at.map(format_datetime).unwrap_or_else(|| "-".to_string()));
    println!("{} {}", "  Secret expires:".bright_cyan(), snapshot.secret_expires_at.map(format_datetime).unwrap_or_else(|| "-".to_string()));

    if let Some(left) = snapshot.secret_seconds_left {
        let left_str = format_duration(left);
        let left_str = left_str.as_str();
        let colored_left = if left < 86_400 { left_str.red().bold() } else if left < 604_800 { left_str.yellow() } else { left_str.bright_green() };
        println!("{} {}", "  Secret left:  ".bright_cyan(), colored_left);
    }

    if snapshot.notified_thresholds.is_empty() {
        println!("{} {}", "  Warnings sent:".bright_cyan(), "none".dimmed());
    } else {
        println!("{} {}", "  Warnings sent:".bright_cyan(), snapshot.notified_thresholds.join(", ").as_str().yellow());
    }
}

fn format_duration(seconds: i64) -> String {
    if seconds < 0 {
        return format!("expired {} ago", format_duration(-seconds));
    }
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_instant(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| format_datetime(dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| raw.to_string())
}
