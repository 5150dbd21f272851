//! Streaming session state: per-callback conversations holding handler
//! output as cumulative snapshots, drained by refresh polls with
//! blocking-wait-then-timeout semantics, and swept by TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::TryRngCore;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{resolve_duration, ENV_BOT_STREAM_TTL, ENV_BOT_STREAM_WAIT_TIMEOUT};
use crate::handler::Chunk;
use crate::message::Message;

/// Pending-snapshot queue depth; a full queue blocks the publisher, which
/// is the backpressure contract against runaway producers.
const QUEUE_CAPACITY: usize = 16;

const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// One streaming conversation, owned by the [`StreamManager`].
pub struct Stream {
    stream_id: String,
    msg_id: String,
    chat_id: String,
    user_id: String,
    response_url: Option<String>,
    created_at: Instant,
    message: Message,
    tx: mpsc::Sender<Chunk>,
    rx: AsyncMutex<mpsc::Receiver<Chunk>>,
    state: Mutex<StreamState>,
}

struct StreamState {
    last_access: Instant,
    finished: bool,
    last_chunk: Option<Chunk>,
}

impl Stream {
    fn new(stream_id: String, msg: &Message) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            stream_id,
            msg_id: msg.msg_id.clone(),
            chat_id: msg.chat_id.clone(),
            user_id: msg.from.user_id.clone(),
            response_url: msg.response_url.clone(),
            created_at: Instant::now(),
            message: msg.clone(),
            tx,
            rx: AsyncMutex::new(rx),
            state: Mutex::new(StreamState {
                last_access: Instant::now(),
                finished: false,
                last_chunk: None,
            }),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn response_url(&self) -> Option<&str> {
        self.response_url.as_deref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Snapshot of the message that opened the session.
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn finished(&self) -> bool {
        self.state.lock().finished
    }

    fn touch(&self) {
        self.state.lock().last_access = Instant::now();
    }

    fn set_finished(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        state.last_access = Instant::now();
    }

    /// Turn an incremental chunk into the cumulative snapshot the protocol
    /// requires and remember it as the latest state.
    fn absorb(&self, chunk: Chunk) -> Chunk {
        let mut state = self.state.lock();
        state.last_access = Instant::now();

        let mut full = chunk;
        if full.payload.is_some() {
            // Non-stream replies must not mix with text or msg_item.
            full.content = String::new();
            full.msg_items = Vec::new();
        } else if let Some(last) = state.last_chunk.as_ref() {
            full.content = format!("{}{}", last.content, full.content);
        }

        state.last_chunk = Some(full.clone());
        full
    }
}

/// Owns every live [`Stream`] plus the msg-id index binding callbacks to
/// their session.
pub struct StreamManager {
    tables: RwLock<Tables>,
    ttl: Duration,
    wait_timeout: Duration,
}

#[derive(Default)]
struct Tables {
    streams: HashMap<String, Arc<Stream>>,
    msg_index: HashMap<String, String>,
}

impl StreamManager {
    /// Build a manager; `None` values fall back to the `BOT_STREAM_TTL` /
    /// `BOT_STREAM_WAIT_TIMEOUT` environment variables and then to the
    /// 60 s / 500 ms defaults.
    pub fn new(ttl: Option<Duration>, wait_timeout: Option<Duration>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            ttl: resolve_duration(ttl, ENV_BOT_STREAM_TTL, DEFAULT_TTL),
            wait_timeout: resolve_duration(
                wait_timeout,
                ENV_BOT_STREAM_WAIT_TIMEOUT,
                DEFAULT_WAIT_TIMEOUT,
            ),
        }
    }

    /// Return the session bound to `msg.msg_id`, refreshing its liveness, or
    /// create and register a fresh one. The flag reports whether a new
    /// session was created.
    pub fn create_or_get(&self, msg: &Message) -> (Arc<Stream>, bool) {
        if !msg.msg_id.is_empty() {
            let existing = {
                let tables = self.tables.read();
                tables
                    .msg_index
                    .get(&msg.msg_id)
                    .and_then(|stream_id| tables.streams.get(stream_id))
                    .cloned()
            };
            if let Some(stream) = existing {
                stream.touch();
                return (stream, false);
            }
        }

        let stream = Arc::new(Stream::new(generate_stream_id(), msg));
        let mut tables = self.tables.write();
        tables
            .streams
            .insert(stream.stream_id.clone(), stream.clone());
        if !msg.msg_id.is_empty() {
            tables
                .msg_index
                .insert(msg.msg_id.clone(), stream.stream_id.clone());
        }
        (stream, true)
    }

    /// Publish one fragment into a session's queue. Blocks while the queue
    /// is full; returns false when the session does not exist (e.g. already
    /// swept).
    pub async fn publish(&self, stream_id: &str, chunk: Chunk) -> bool {
        let Some(stream) = self.stream(stream_id) else {
            return false;
        };

        let full = stream.absorb(chunk);
        let finished = full.is_final;
        if stream.tx.send(full).await.is_err() {
            return false;
        }
        if finished {
            stream.set_finished();
        }
        true
    }

    /// Blocking coalescing read: wait up to the configured timeout for the
    /// first pending snapshot, then drain whatever else is immediately
    /// available and return the newest one, with the final flag folded
    /// across everything seen. On timeout the cached snapshot is returned
    /// only for already-finished sessions; `None` tells the caller to send
    /// a keep-alive.
    pub async fn get_latest_chunk(&self, stream_id: &str) -> Option<Chunk> {
        let stream = self.stream(stream_id)?;
        stream.touch();

        let mut rx = stream.rx.lock().await;
        match tokio::time::timeout(self.wait_timeout, rx.recv()).await {
            Ok(Some(first)) => {
                let mut latest = first;
                let mut final_seen = latest.is_final;
                while let Ok(next) = rx.try_recv() {
                    final_seen |= next.is_final;
                    latest = next;
                }
                if final_seen {
                    latest.is_final = true;
                }

                let mut state = stream.state.lock();
                state.last_access = Instant::now();
                state.last_chunk = Some(latest.clone());
                if latest.is_final {
                    state.finished = true;
                }
                Some(latest)
            }
            // The stream holds its own sender, so a closed queue can only
            // mean teardown; treat it like a timeout.
            Ok(None) | Err(_) => {
                let mut state = stream.state.lock();
                state.last_access = Instant::now();
                if state.finished {
                    state.last_chunk.clone()
                } else {
                    None
                }
            }
        }
    }

    /// Mark a session finished and keep it alive for the closing polls.
    pub fn mark_finished(&self, stream_id: &str) {
        if let Some(stream) = self.stream(stream_id) {
            stream.set_finished();
        }
    }

    /// First-packet snapshot for a session, if it is still live.
    pub fn first_message(&self, stream_id: &str) -> Option<Message> {
        self.stream(stream_id).map(|s| s.message.clone())
    }

    /// Session id bound to a platform message id.
    pub fn stream_id_by_msg(&self, msg_id: &str) -> Option<String> {
        if msg_id.is_empty() {
            return None;
        }
        self.tables.read().msg_index.get(msg_id).cloned()
    }

    /// Evict every session idle longer than the TTL, along with its msg-id
    /// index entry when that entry still points at the evicted session.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut tables = self.tables.write();

        let expired: Vec<Arc<Stream>> = tables
            .streams
            .values()
            .filter(|stream| now.duration_since(stream.state.lock().last_access) > self.ttl)
            .cloned()
            .collect();

        for stream in expired {
            tables.streams.remove(&stream.stream_id);
            if !stream.msg_id.is_empty() {
                if let Some(mapped) = tables.msg_index.get(&stream.msg_id) {
                    if mapped == &stream.stream_id {
                        tables.msg_index.remove(&stream.msg_id);
                    }
                }
            }
        }
    }

    fn stream(&self, stream_id: &str) -> Option<Arc<Stream>> {
        if stream_id.is_empty() {
            return None;
        }
        self.tables.read().streams.get(stream_id).cloned()
    }
}

/// 32-hex-char random session id; falls back to a nanosecond timestamp when
/// the OS RNG is unavailable, trading unpredictability for uniqueness.
fn generate_stream_id() -> String {
    let mut raw = [0u8; 16];
    if OsRng.try_fill_bytes(&mut raw).is_err() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        return nanos.to_string();
    }
    hex::encode(raw)
}
