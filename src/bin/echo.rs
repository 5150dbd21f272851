//! Echo bot: replies with whatever it received — text is echoed back,
//! images are decrypted and returned through the closing stream reply.
//!
//! Configuration comes from the environment: `WECOM_TOKEN`,
//! `WECOM_ENCODING_AES_KEY`, `WECOM_CORP_ID` and optionally `LISTEN_ADDR`
//! (default `0.0.0.0:8080`).

use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};
use wecom_aibot::{
    build_stream_image_item_from_bytes, Bot, Chunk, Context, Handler, HandlerFn, MixedItem,
};

/// The platform caps stream-reply images at 10 MB before Base64.
const IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;

async fn echo(ctx: Context, tx: mpsc::Sender<Chunk>) {
    let msg = &ctx.message;

    match msg.msg_type.as_str() {
        "image" => {
            // The dispatcher already downloaded and decrypted the bytes.
            let Some(data) = msg.image.as_ref().and_then(|img| img.data.clone()) else {
                let _ = tx
                    .send(Chunk::final_text("图片下载或解密失败，无法回显"))
                    .await;
                return;
            };
            if data.len() > IMAGE_MAX_BYTES {
                let _ = tx
                    .send(Chunk::final_text(format!("图片过大: {} bytes", data.len())))
                    .await;
                return;
            }
            let item = build_stream_image_item_from_bytes(&data);
            let _ = tx.send(Chunk::final_empty().with_msg_items(vec![item])).await;
        }
        "mixed" => {
            let mut text_parts = Vec::new();
            let mut items: Vec<MixedItem> = Vec::new();
            if let Some(mixed) = msg.mixed.as_ref() {
                for entry in &mixed.items {
                    match entry.msg_type.as_str() {
                        "text" => {
                            if let Some(text) = entry.text.as_ref() {
                                if !text.content.trim().is_empty() {
                                    text_parts.push(text.content.clone());
                                }
                            }
                        }
                        "image" => {
                            let Some(data) = entry.image.as_ref().and_then(|img| img.data.clone())
                            else {
                                continue;
                            };
                            if data.len() <= IMAGE_MAX_BYTES {
                                items.push(build_stream_image_item_from_bytes(&data));
                            }
                        }
                        _ => {}
                    }
                }
            }

            let content = if text_parts.is_empty() {
                String::new()
            } else {
                format!("收到消息: {}", text_parts.join("\n"))
            };
            let _ = tx
                .send(Chunk::final_text(content).with_msg_items(items))
                .await;
        }
        _ => {
            let text = msg
                .text
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default();
            let _ = tx.send(Chunk::final_text(format!("收到消息: {text}"))).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")?;

    let token = std::env::var("WECOM_TOKEN").unwrap_or_default();
    let encoding_aes_key = std::env::var("WECOM_ENCODING_AES_KEY").unwrap_or_default();
    let corp_id = std::env::var("WECOM_CORP_ID").unwrap_or_default();
    let listen_addr =
        std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    if token.is_empty() || encoding_aes_key.is_empty() || corp_id.is_empty() {
        bail!("WECOM_TOKEN, WECOM_ENCODING_AES_KEY and WECOM_CORP_ID must be set");
    }

    let handler: Arc<dyn Handler> = Arc::new(HandlerFn(|ctx: Context| {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(echo(ctx, tx));
        Some(rx)
    }));

    let bot = Bot::new(&token, &encoding_aes_key, &corp_id, Some(handler))?;
    tracing::info!("echo bot starting on {listen_addr}");
    bot.serve(&listen_addr, None).await
}
