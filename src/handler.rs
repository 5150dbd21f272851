//! The capability a host supplies to the bot: given a decoded request
//! context, produce a lazy sequence of output fragments over a channel.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bot::BotHandle;
use crate::message::{
    Message, MixedItem, StreamWithTemplateCardMessage, TemplateCardMessage, TextMessage,
    UpdateTemplateCardMessage,
};

/// One fragment of handler output.
///
/// `content` is the incremental text delta from the handler's point of view;
/// the stream manager maintains the cumulative form the platform requires.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub content: String,
    /// Mixed items (images) for the closing reply.
    pub msg_items: Vec<MixedItem>,
    /// Non-stream reply delivered in place of the stream reply.
    pub payload: Option<ReplyPayload>,
    pub is_final: bool,
}

impl Chunk {
    /// Text delta fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Closing fragment with the last text delta.
    pub fn final_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_final: true,
            ..Self::default()
        }
    }

    /// Closing empty fragment; unblocks the refresh poller.
    pub fn final_empty() -> Self {
        Self {
            is_final: true,
            ..Self::default()
        }
    }

    pub fn with_msg_items(mut self, items: Vec<MixedItem>) -> Self {
        self.msg_items = items;
        self
    }

    pub fn with_payload(mut self, payload: ReplyPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// True when the fragment carries nothing worth publishing.
    pub(crate) fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.payload.is_none()
            && self.msg_items.is_empty()
            && !self.is_final
    }
}

/// A non-stream reply carried by a [`Chunk`].
#[derive(Debug, Clone)]
pub enum ReplyPayload {
    /// Sentinel: end the session with no visible reply at all. Used by
    /// handlers that deliver their answer through the active-push path.
    NoResponse,
    Text(TextMessage),
    TemplateCard(TemplateCardMessage),
    StreamWithTemplateCard(StreamWithTemplateCardMessage),
    UpdateTemplateCard(UpdateTemplateCardMessage),
    /// Escape hatch for reply shapes the typed variants do not cover.
    Raw(Value),
}

impl ReplyPayload {
    /// Serialize the reply for direct encryption. [`ReplyPayload::NoResponse`]
    /// is intercepted by the dispatcher and never reaches the wire.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::NoResponse => Ok(Value::Null),
            Self::Text(msg) => serde_json::to_value(msg),
            Self::TemplateCard(msg) => serde_json::to_value(msg),
            Self::StreamWithTemplateCard(msg) => serde_json::to_value(msg),
            Self::UpdateTemplateCard(msg) => serde_json::to_value(msg),
            Self::Raw(value) => Ok(value.clone()),
        }
    }

    pub fn is_no_response(&self) -> bool {
        matches!(self, Self::NoResponse)
    }
}

/// Per-invocation context handed to the handler.
#[derive(Clone)]
pub struct Context {
    /// The decoded inbound message, with image data already decrypted where
    /// the download succeeded.
    pub message: Message,
    /// Session id of the streaming conversation this invocation feeds.
    pub stream_id: String,
    /// One-shot active-reply URL, when the callback carried one.
    pub response_url: Option<String>,
    /// Capability handle for active replies and attachment decryption.
    pub bot: BotHandle,
}

/// Business handler supplied by the host. Invoked once per new inbound
/// callback; the returned receiver is drained concurrently by the bot and
/// treated as closed when the handler drops its sender. Returning `None`
/// means the handler declines the message entirely.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context) -> Option<mpsc::Receiver<Chunk>>;
}

/// Adapter that lets a plain closure act as a [`Handler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(Context) -> Option<mpsc::Receiver<Chunk>> + Send + Sync,
{
    async fn handle(&self, ctx: Context) -> Option<mpsc::Receiver<Chunk>> {
        (self.0)(ctx)
    }
}
