//! Stdin/stdout JSON-lines bridge around one [`Session`].
//!
//! Each input line is a [`SessionCommand`]. Output lines carry a `kind`
//! tag: `status` for stage updates, `session` for turn prompts, outcomes
//! and the final report, and `error` for input that could not be parsed.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::error::{Result, SphinxError};
use crate::session::{Session, SessionCommand, SessionEvent, SessionReport};
use crate::sinks::{BroadcastStatusSink, StatusUpdate};

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 128;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutputLine<'a> {
    Status(&'a StatusUpdate),
    Session(&'a SessionEvent),
    Error { message: String },
}

/// Run `session` over the process's stdin and stdout.
///
/// # Errors
///
/// Session faults, or an unreadable stdin / unwritable stdout.
pub async fn run_stdio_bridge(session: Session) -> Result<SessionReport> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    run_bridge(session, stdin, tokio::io::stdout()).await
}

/// Run `session`, reading commands from `input` and writing JSON lines to
/// `output`. Returns once input reaches EOF or an `end` command, and the
/// session has finished.
///
/// # Errors
///
/// Session faults, or I/O failures on either stream.
pub async fn run_bridge<R, W>(session: Session, input: R, output: W) -> Result<SessionReport>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let status = BroadcastStatusSink::new(EVENT_CAPACITY);
    let status_rx = status.subscribe();
    let session = session.with_status_sink(Arc::new(status));
    let events_rx = session.subscribe();

    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));
    let forwarder = tokio::spawn(forward_output(status_rx, events_rx, Arc::clone(&writer)));

    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let session_task = tokio::spawn(session.run(rx));

    let read_result = run_reader(input, tx, Arc::clone(&writer)).await;

    let report = session_task
        .await
        .map_err(|e| SphinxError::Channel(format!("session task failed: {e}")))??;
    if let Err(e) = forwarder.await {
        tracing::warn!(error = %e, "output forwarder failed");
    }
    read_result?;
    Ok(report)
}

async fn run_reader<R, W>(
    mut input: R,
    commands: mpsc::Sender<SessionCommand>,
    writer: SharedWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = input
            .read_line(&mut line)
            .await
            .map_err(|e| SphinxError::Channel(format!("failed to read command: {e}")))?;
        if bytes_read == 0 {
            tracing::info!("input closed (EOF); ending session");
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let command: SessionCommand = match serde_json::from_str(trimmed) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command");
                let message = format!("failed to parse command: {e}");
                write_output(&writer, &OutputLine::Error { message }).await?;
                continue;
            }
        };

        let is_end = command == SessionCommand::End;
        if commands.send(command).await.is_err() {
            tracing::info!("session already finished; ignoring further input");
            return Ok(());
        }
        if is_end {
            return Ok(());
        }
    }
}

async fn forward_output<W>(
    mut status: broadcast::Receiver<StatusUpdate>,
    mut events: broadcast::Receiver<SessionEvent>,
    writer: SharedWriter<W>,
) where
    W: AsyncWrite + Unpin,
{
    let mut status_open = true;
    let mut events_open = true;
    while status_open || events_open {
        let written = tokio::select! {
            update = status.recv(), if status_open => match update {
                Ok(update) => write_output(&writer, &OutputLine::Status(&update)).await,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "status output lagged; updates dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    status_open = false;
                    continue;
                }
            },
            event = events.recv(), if events_open => match event {
                Ok(event) => write_output(&writer, &OutputLine::Session(&event)).await,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "session output lagged; events dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    events_open = false;
                    continue;
                }
            },
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write output; stopping forwarder");
            break;
        }
    }
}

async fn write_output<W>(writer: &SharedWriter<W>, line: &OutputLine<'_>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(line)
        .map_err(|e| SphinxError::Channel(format!("failed to serialize output: {e}")))?;
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| SphinxError::Channel(format!("failed to write output: {e}")))?;
    w.write_all(b"\n")
        .await
        .map_err(|e| SphinxError::Channel(format!("failed to write newline: {e}")))?;
    w.flush()
        .await
        .map_err(|e| SphinxError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
