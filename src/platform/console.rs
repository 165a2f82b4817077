// ABOUTME: Console transport: stdin lines in, assistant replies out on stdout
// ABOUTME: Always connected and owns the single chat id "console"

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_core::{InboundMessage, Transport};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

/// Chat id used for everything typed on the console
pub const CONSOLE_CHAT_ID: &str = "console";

pub struct ConsoleTransport {
    assistant_name: String,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ConsoleTransport {
    pub fn stdout(assistant_name: impl Into<String>) -> Self {
        Self::with_writer(assistant_name, Box::new(tokio::io::stdout()))
    }

    pub fn with_writer(assistant_name: impl Into<String>, writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, _destination: &str, text: &str) -> Result<()> {
        let line = format!("{}: {}\n", self.assistant_name, text);
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to write reply")?;
        writer.flush().await.context("Failed to flush console")?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn owns_destination(&self, destination: &str) -> bool {
        destination == CONSOLE_CHAT_ID
    }
}

/// Forward each non-empty line from `reader` as an inbound console message.
///
/// Returns when the input ends, `/quit` is typed, or the receiver goes away.
pub async fn read_lines<R>(reader: R, sender: &str, tx: mpsc::Sender<InboundMessage>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read console input")? {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if content == "/quit" {
            tracing::info!("Console input closed by /quit");
            break;
        }
        let msg = InboundMessage::new(CONSOLE_CHAT_ID, sender, content)
            .with_id(uuid::Uuid::new_v4().to_string());
        if tx.send(msg).await.is_err() {
            tracing::warn!("Inbound receiver dropped, stopping console input");
            break;
        }
    }
    Ok(())
}
