//! Server-side SDK for the WeCom (Enterprise WeChat) AI Bot callback
//! protocol.
//!
//! The bot terminates the encrypted callback channel, decodes inbound
//! messages and events, runs a host-supplied [`Handler`] that yields a lazy
//! sequence of output fragments, and relays them back as cumulative
//! "typewriter" stream replies under the platform's poll-based refresh
//! model.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wecom_aibot::{Bot, Chunk, Context, Handler, HandlerFn};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let handler: Arc<dyn Handler> = Arc::new(HandlerFn(|ctx: Context| {
//!     let (tx, rx) = tokio::sync::mpsc::channel(16);
//!     tokio::spawn(async move {
//!         let text = ctx
//!             .message
//!             .text
//!             .map(|t| t.content)
//!             .unwrap_or_default();
//!         let _ = tx.send(Chunk::final_text(format!("echo: {text}"))).await;
//!     });
//!     Some(rx)
//! }));
//!
//! let bot = Bot::new("token", "43-char-encoding-aes-key", "corp-id", Some(handler))?;
//! bot.serve("0.0.0.0:8080", None).await
//! # }
//! ```

#![warn(clippy::all)]

pub mod bot;
pub mod config;
pub mod crypt;
pub mod handler;
pub mod message;
pub mod stream;
pub mod template_card;

pub use bot::{Bot, BotHandle};
pub use crypt::{calc_signature, Crypt, CryptError};
pub use handler::{Chunk, Context, Handler, HandlerFn, ReplyPayload};
pub use message::{
    build_stream_image_item_from_bytes, build_stream_reply, build_stream_reply_with_msg_items,
    EncryptedRequest, EncryptedResponse, MarkdownMessage, Message, MixedItem, StreamReply,
    StreamWithTemplateCardMessage, TemplateCardMessage, TextMessage, UpdateTemplateCardMessage,
};
pub use stream::{Stream, StreamManager};
pub use template_card::TemplateCard;
