//! Callback dispatcher: terminates the encrypted HTTP channel, reconciles
//! the platform's two-phase stream model (first packet acknowledges and
//! launches the handler; refresh packets fetch the latest cumulative
//! snapshot) and relays active replies.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{resolve_duration, ENV_BOT_HTTP_TIMEOUT};
use crate::crypt::{Crypt, CryptError};
use crate::handler::{Chunk, Context, Handler, ReplyPayload};
use crate::message::{
    build_stream_reply, build_stream_reply_with_msg_items, EncryptedRequest, EncryptedResponse,
    ImagePayload, MarkdownMessage, Message, TemplateCardMessage,
};
use crate::stream::StreamManager;
use crate::template_card::TemplateCard;

const DEFAULT_CALLBACK_PATH: &str = "/callback/command";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    msg_signature: Option<String>,
    timestamp: Option<String>,
    nonce: Option<String>,
    echostr: Option<String>,
}

impl CallbackQuery {
    fn signature_params(&self) -> Option<(&str, &str, &str)> {
        Some((
            non_empty(self.msg_signature.as_deref())?,
            non_empty(self.timestamp.as_deref())?,
            non_empty(self.nonce.as_deref())?,
        ))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// The callback endpoint. Cheap to clone; all state lives behind one `Arc`.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

struct BotInner {
    crypt: Arc<Crypt>,
    streams: StreamManager,
    client: reqwest::Client,
    handler: Option<Arc<dyn Handler>>,
}

/// Narrow capability handle given to handlers (and available from the bot)
/// for active replies and attachment decryption. Holding this instead of the
/// whole [`Bot`] keeps handler and bot from owning each other.
#[derive(Clone)]
pub struct BotHandle {
    crypt: Arc<Crypt>,
    client: reqwest::Client,
}

impl Bot {
    /// Build a bot with default stream tuning (60 s TTL, 500 ms refresh
    /// wait, both overridable through the environment).
    pub fn new(
        token: &str,
        encoding_aes_key: &str,
        receive_id: &str,
        handler: Option<Arc<dyn Handler>>,
    ) -> Result<Self> {
        Self::with_options(token, encoding_aes_key, receive_id, None, None, handler)
    }

    /// Build a bot with explicit session tuning. `None` durations defer to
    /// the `BOT_STREAM_TTL` / `BOT_STREAM_WAIT_TIMEOUT` environment
    /// variables and then the defaults.
    pub fn with_options(
        token: &str,
        encoding_aes_key: &str,
        receive_id: &str,
        stream_ttl: Option<Duration>,
        stream_wait_timeout: Option<Duration>,
        handler: Option<Arc<dyn Handler>>,
    ) -> Result<Self> {
        let crypt = Crypt::new(token, encoding_aes_key, receive_id)?;
        let timeout = resolve_duration(None, ENV_BOT_HTTP_TIMEOUT, DEFAULT_HTTP_TIMEOUT);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            inner: Arc::new(BotInner {
                crypt: Arc::new(crypt),
                streams: StreamManager::new(stream_ttl, stream_wait_timeout),
                client,
                handler,
            }),
        })
    }

    /// Capability handle for active replies and attachment decryption.
    pub fn handle(&self) -> BotHandle {
        self.inner.handle()
    }

    /// Router exposing the callback endpoint at `callback_path`
    /// (default `/callback/command`).
    pub fn router(&self, callback_path: Option<&str>) -> Router {
        let path = callback_path
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_CALLBACK_PATH);
        Router::new()
            .route(path, get(handle_verify).post(handle_callback))
            .with_state(self.inner.clone())
    }

    /// Bind `listen_addr` and serve the callback endpoint until the server
    /// exits.
    pub async fn serve(&self, listen_addr: &str, callback_path: Option<&str>) -> Result<()> {
        if listen_addr.is_empty() {
            bail!("listen addr is required");
        }
        let app = self.router(callback_path);
        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("bind {listen_addr}"))?;
        tracing::info!("wecom bot listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// POST a reply to a handler-supplied `response_url`. The URL is valid
    /// for one hour and usable exactly once; that contract is the caller's
    /// to honor.
    pub async fn response<T: Serialize + ?Sized + Sync>(
        &self,
        response_url: &str,
        msg: &T,
    ) -> Result<()> {
        self.handle().response(response_url, msg).await
    }

    pub async fn response_markdown(&self, response_url: &str, content: &str) -> Result<()> {
        self.handle().response_markdown(response_url, content).await
    }

    pub async fn response_template_card(
        &self,
        response_url: &str,
        card: TemplateCard,
    ) -> Result<()> {
        self.handle().response_template_card(response_url, card).await
    }

    /// Decrypt the raw bytes served by the platform's file-download URLs.
    pub fn decrypt_downloaded_file(&self, cipher: &[u8]) -> Result<Vec<u8>, CryptError> {
        self.inner.crypt.decrypt_downloaded_file(cipher)
    }
}

impl BotInner {
    fn handle(&self) -> BotHandle {
        BotHandle {
            crypt: self.crypt.clone(),
            client: self.client.clone(),
        }
    }

    /// First packet: register the session, kick off the handler in the
    /// background, and acknowledge with an empty stream reply so the
    /// platform starts polling.
    async fn initial(
        self: &Arc<Self>,
        msg: &Message,
        timestamp: &str,
        nonce: &str,
    ) -> Result<Option<EncryptedResponse>, CryptError> {
        let (stream, is_new) = self.streams.create_or_get(msg);

        if is_new {
            if let Some(handler) = self.handler.clone() {
                let ctx = Context {
                    message: msg.clone(),
                    stream_id: stream.stream_id().to_string(),
                    response_url: msg.response_url.clone(),
                    bot: self.handle(),
                };
                if let Some(rx) = handler.handle(ctx).await {
                    let inner = self.clone();
                    let stream_id = stream.stream_id().to_string();
                    tokio::spawn(async move {
                        inner.consume_handler_output(rx, stream_id).await;
                    });
                }
            }
        }

        let reply = build_stream_reply(stream.stream_id(), "", false);
        self.crypt.encrypt_response(&reply, timestamp, nonce).map(Some)
    }

    /// Refresh packet: hand back the newest cumulative snapshot, a
    /// keep-alive when nothing is pending yet, or the terminating form for
    /// id-less packets.
    async fn refresh(
        &self,
        msg: &Message,
        timestamp: &str,
        nonce: &str,
    ) -> Result<Option<EncryptedResponse>, CryptError> {
        let stream_id = msg.stream.as_ref().map_or("", |s| s.id.as_str());
        if stream_id.is_empty() {
            let reply = build_stream_reply("", "", true);
            return self.crypt.encrypt_response(&reply, timestamp, nonce).map(Some);
        }

        let Some(chunk) = self.streams.get_latest_chunk(stream_id).await else {
            let reply = build_stream_reply(stream_id, "", false);
            return self.crypt.encrypt_response(&reply, timestamp, nonce).map(Some);
        };
        if chunk.is_final {
            self.streams.mark_finished(stream_id);
        }

        // A carried payload replaces the stream reply outright.
        if let Some(payload) = chunk.payload.as_ref() {
            if payload.is_no_response() {
                return Ok(None);
            }
            let value = payload.to_value()?;
            return self.crypt.encrypt_response(&value, timestamp, nonce).map(Some);
        }

        if chunk.is_final && !chunk.msg_items.is_empty() {
            let reply =
                build_stream_reply_with_msg_items(stream_id, &chunk.content, true, &chunk.msg_items);
            return self.crypt.encrypt_response(&reply, timestamp, nonce).map(Some);
        }

        let reply = build_stream_reply(stream_id, &chunk.content, chunk.is_final);
        self.crypt.encrypt_response(&reply, timestamp, nonce).map(Some)
    }

    /// Drain the handler's fragment sequence into the session queue. The
    /// polling side must always observe a terminal fragment, so sequences
    /// that end without publishing anything get one synthesized.
    async fn consume_handler_output(&self, mut rx: mpsc::Receiver<Chunk>, stream_id: String) {
        let mut published = false;
        while let Some(chunk) = rx.recv().await {
            if chunk
                .payload
                .as_ref()
                .is_some_and(ReplyPayload::is_no_response)
            {
                self.streams.publish(&stream_id, Chunk::final_empty()).await;
                return;
            }
            if chunk.is_empty() {
                continue;
            }
            if self.streams.publish(&stream_id, chunk).await {
                published = true;
            }
        }

        if !published {
            self.streams.publish(&stream_id, Chunk::final_empty()).await;
        }
    }

    /// Inbound image URLs point at AES-encrypted files. Fetch and decrypt
    /// them up front so handlers see usable bytes; failures are best-effort
    /// (the handler sees `data = None` and can still reply with text).
    async fn decrypt_message_images(&self, msg: &mut Message) {
        if msg.msg_type == "image" {
            if let Some(image) = msg.image.as_mut() {
                self.decrypt_image_payload(image).await;
            }
        }

        if msg.msg_type == "mixed" {
            if let Some(mixed) = msg.mixed.as_mut() {
                for item in &mut mixed.items {
                    if item.msg_type == "image" {
                        if let Some(image) = item.image.as_mut() {
                            self.decrypt_image_payload(image).await;
                        }
                    }
                }
            }
        }
    }

    async fn decrypt_image_payload(&self, image: &mut ImagePayload) {
        let Some(url) = image.url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };

        let cipher = match self.download(url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("image download failed: {err:#}");
                return;
            }
        };

        match self.crypt.decrypt_downloaded_file(&cipher) {
            Ok(plain) => image.data = Some(plain),
            Err(err) => tracing::warn!("image decrypt failed: {err}"),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("download attachment")?;
        let status = resp.status();
        if status != StatusCode::OK {
            bail!("download attachment: status={status}");
        }
        Ok(resp.bytes().await.context("read attachment body")?.to_vec())
    }
}

impl BotHandle {
    /// POST a JSON reply to a `response_url` (one hour validity, one shot).
    pub async fn response<T: Serialize + ?Sized + Sync>(
        &self,
        response_url: &str,
        msg: &T,
    ) -> Result<()> {
        if response_url.is_empty() {
            bail!("response_url is empty");
        }

        let resp = self
            .client
            .post(response_url)
            .json(msg)
            .send()
            .await
            .context("send active reply")?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            bail!("wecom api error: status={status} body={body}");
        }
        Ok(())
    }

    pub async fn response_markdown(&self, response_url: &str, content: &str) -> Result<()> {
        self.response(response_url, &MarkdownMessage::new(content))
            .await
    }

    pub async fn response_template_card(
        &self,
        response_url: &str,
        card: TemplateCard,
    ) -> Result<()> {
        self.response(response_url, &TemplateCardMessage::new(card))
            .await
    }

    /// Decrypt the raw bytes served by the platform's file-download URLs.
    pub fn decrypt_downloaded_file(&self, cipher: &[u8]) -> Result<Vec<u8>, CryptError> {
        self.crypt.decrypt_downloaded_file(cipher)
    }
}

async fn handle_verify(
    State(inner): State<Arc<BotInner>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(((sig, ts, nonce), echostr)) = query
        .signature_params()
        .zip(non_empty(query.echostr.as_deref()))
    else {
        return (StatusCode::BAD_REQUEST, "missing parameters").into_response();
    };

    match inner.crypt.verify_url(sig, ts, nonce, echostr) {
        Ok(plain) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], plain).into_response(),
        Err(err) => {
            tracing::warn!("url verification failed: {err}");
            (StatusCode::FORBIDDEN, "forbidden").into_response()
        }
    }
}

async fn handle_callback(
    State(inner): State<Arc<BotInner>>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> Response {
    inner.streams.cleanup();

    let Some((sig, ts, nonce)) = query.signature_params() else {
        return (StatusCode::BAD_REQUEST, "missing parameters").into_response();
    };

    let Ok(req) = serde_json::from_slice::<EncryptedRequest>(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
    };
    if req.encrypt.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing encrypt").into_response();
    }

    let mut msg = match inner.crypt.decrypt_message(sig, ts, nonce, &req) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!("callback decrypt failed: {err}");
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    inner.decrypt_message_images(&mut msg).await;

    // Feedback events only accept an empty acknowledgment; never route them
    // to the handler.
    if is_feedback_event(&msg) {
        return StatusCode::OK.into_response();
    }

    let outcome = if msg.msg_type == "stream" {
        inner.refresh(&msg, ts, nonce).await
    } else {
        inner.initial(&msg, ts, nonce).await
    };

    match outcome {
        Ok(Some(resp)) => match serde_json::to_vec(&resp) {
            Ok(body) => (
                [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(err) => {
                tracing::error!("response serialization failed: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        },
        Ok(None) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::error!("reply encryption failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

fn is_feedback_event(msg: &Message) -> bool {
    msg.msg_type == "event"
        && msg.event.as_ref().is_some_and(|event| {
            event.feedback_event.is_some() || event.event_type == "feedback_event"
        })
}
