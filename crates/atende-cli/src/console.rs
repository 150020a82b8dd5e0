//! Terminal stand-in for the chat transport: stdin lines become inbound
//! messages, replies are printed and attachments saved to the outbox.

use anyhow::{Context, Result};
use async_trait::async_trait;
use atende_core::{AtendeRuntime, OutboundTransport};
use atende_ipc::{InboundBatch, InboundEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};

pub struct ConsoleTransport {
    outbox: PathBuf,
    stdout: Mutex<tokio::io::Stdout>,
}

impl ConsoleTransport {
    pub fn new(outbox: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&outbox)
            .with_context(|| format!("Failed to create outbox {}", outbox.display()))?;
        Ok(Self {
            outbox,
            stdout: Mutex::new(tokio::io::stdout()),
        })
    }

    async fn print(&self, line: &str) -> Result<()> {
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<(String, PathBuf)> {
        let id = uuid::Uuid::new_v4().to_string();
        let path = self.outbox.join(format!("{}-{}", id, sanitize(file_name)));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok((id, path))
    }
}

fn sanitize(file_name: &str) -> String {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("anexo");
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl OutboundTransport for ConsoleTransport {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String> {
        self.print(&format!("[bot → {}]\n{}\n", chat_id, text)).await?;
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn send_image(&self, chat_id: &str, bytes: Vec<u8>, caption: Option<&str>) -> Result<String> {
        let (id, path) = self.save("qrcode.png", &bytes).await?;
        self.print(&format!(
            "[bot → {}] imagem: {} {}\n",
            chat_id,
            path.display(),
            caption.unwrap_or("")
        ))
        .await?;
        Ok(id)
    }

    async fn send_document(
        &self,
        chat_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        let (id, path) = self.save(file_name, &bytes).await?;
        self.print(&format!(
            "[bot → {}] documento: {} {}\n",
            chat_id,
            path.display(),
            caption.unwrap_or("")
        ))
        .await?;
        Ok(id)
    }
}

/// Publishes each input line to the runtime's event bus as a message from
/// one chat and runs the runtime until the input ends. `/estado` prints the
/// chat's dialogue state instead of sending it.
pub async fn run_console<R>(
    runtime: Arc<AtendeRuntime>,
    input: R,
    chat_id: &str,
    push_name: &str,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let inbound_rx = runtime.event_bus().subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            runtime
                .serve(inbound_rx, async move {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/estado" {
            let ctx = runtime
                .pipeline()
                .contexts()
                .get(chat_id)
                .unwrap_or_default();
            println!(
                "menu={} step={} ignore_until_menu={}",
                ctx.state.menu(),
                ctx.state.step().unwrap_or("-"),
                ctx.ignore_until_menu
            );
            continue;
        }
        let event = InboundEvent::text(chat_id, &line).with_push_name(push_name);
        runtime.event_bus().publish(InboundBatch::single(event))?;
    }

    let _ = stop_tx.send(());
    runner.await.context("Runtime task failed")??;
    Ok(())
}
