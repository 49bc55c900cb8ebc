//! cowrite: headless CoWrite participant.
//!
//! Joins a document on a relay, prints what other participants do, and
//! appends every line typed on stdin to the end of the shared document.
//!
//! ```text
//! /doc          print the document
//! /cursor <n>   move the local caret to index n
//! /quit         leave the session
//! ```

use clap::Parser;
use log::info;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use cowrite_sync::{
    logical_length, Applied, ClientConfig, ClientError, ClientHandle, DeltaOp, SyncClient, SyncEvent,
    TextBuffer,
};

#[derive(Parser)]
#[command(name = "cowrite", about = "Headless CoWrite participant", version)]
struct Cli {
    /// Relay URL (can also be set via COWRITE_SERVER env var)
    #[arg(short, long, env = "COWRITE_SERVER", default_value = "ws://127.0.0.1:8080/ws")]
    server: String,

    /// Participant name, unique within the document (or COWRITE_NAME)
    #[arg(short, long, env = "COWRITE_NAME")]
    name: String,

    /// Delay between reconnection attempts in milliseconds
    #[arg(long, default_value = "3000")]
    reconnect_interval_ms: u64,

    /// Reconnection attempts before giving up
    #[arg(long, default_value = "10")]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = ClientConfig::new(cli.server, cli.name).with_reconnect(
        Duration::from_millis(cli.reconnect_interval_ms),
        cli.max_attempts,
    );
    let mut client = SyncClient::new(config, TextBuffer::new());
    if let Some(events) = client.take_event_rx() {
        tokio::spawn(print_events(events));
    }

    info!(
        "Joining {} as {}",
        client.server_url(),
        client.engine().client_name()
    );
    let input = tokio::spawn(read_stdin(client.handle()));
    let result = tokio::spawn(client.run()).await;
    input.abort();

    match result {
        Ok(Ok(engine)) => {
            info!("Session ended ({} characters)", logical_length(engine.surface()));
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("cowrite: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("cowrite: client task failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Feed stdin to the client until `/quit` or end of input.
async fn read_stdin(handle: ClientHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let result = match line.trim() {
            "/quit" => break,
            "/doc" => handle.document().await.map(|doc| println!("{doc}")),
            cmd if cmd.starts_with("/cursor") => match cmd["/cursor".len()..].trim().parse() {
                Ok(index) => handle.move_cursor(Some(index)).await,
                Err(_) => {
                    eprintln!("usage: /cursor <index>");
                    Ok(())
                }
            },
            _ => append_line(&handle, &line).await,
        };
        if result.is_err() {
            return;
        }
    }

    let _ = handle.shutdown().await;
}

async fn append_line(handle: &ClientHandle, line: &str) -> Result<(), ClientError> {
    // A remote edit can land between these two commands; the append point
    // is then off by that edit and the relay's range check decides.
    let len = handle.document().await?.chars().count();
    handle
        .edit(vec![DeltaOp::retain(len), DeltaOp::insert(format!("{line}\n"))])
        .await
}

async fn print_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Connected => println!("* connected"),
            SyncEvent::Disconnected => println!("* disconnected"),
            SyncEvent::DocumentReplaced { content } => {
                println!("* document ({} characters)", content.chars().count());
                println!("{content}");
            }
            SyncEvent::RemoteEdit(Applied::Inserted { at, len }) => {
                println!("* {len} characters inserted at {at}")
            }
            SyncEvent::RemoteEdit(Applied::Deleted { from, len }) => {
                println!("* {len} characters deleted at {from}")
            }
            SyncEvent::RemoteEdit(Applied::Skipped) => {}
            SyncEvent::RosterChanged(roster) => {
                let names: Vec<String> = roster
                    .iter()
                    .map(|entry| format!("{} ({})", entry.name, entry.color))
                    .collect();
                println!("* participants: {}", names.join(", "));
            }
            SyncEvent::CursorMoved { name, index: Some(index), line, .. } => {
                let line = line.unwrap_or_default() + 1;
                println!("* {name} is at {index} (line {line})");
            }
            SyncEvent::CursorMoved { .. } => {}
            SyncEvent::ResyncRequested => println!("* out of sync, requesting the document"),
            SyncEvent::Notice(notice) => eprintln!("! {notice}"),
        }
    }
}
