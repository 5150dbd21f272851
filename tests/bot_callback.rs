//! End-to-end callback dispatcher tests: these drive the public router with
//! real encrypted envelopes, the way the platform does, and check the
//! decrypted replies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aes::Aes256;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use wecom_aibot::{
    calc_signature, Bot, Chunk, Context, Crypt, Handler, HandlerFn, ReplyPayload,
};

const TOKEN: &str = "QDG6eK";
const ENCODING_AES_KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C";
const CORP_ID: &str = "wx5823bf96d3bd56c7";
const TIMESTAMP: &str = "1700000000";
const NONCE: &str = "test-nonce";

fn crypt() -> Crypt {
    Crypt::new(TOKEN, ENCODING_AES_KEY, CORP_ID).unwrap()
}

fn bot_with(handler: Option<Arc<dyn Handler>>) -> Bot {
    Bot::with_options(
        TOKEN,
        ENCODING_AES_KEY,
        CORP_ID,
        Some(Duration::from_secs(60)),
        Some(Duration::from_millis(200)),
        handler,
    )
    .unwrap()
}

/// Percent-encode the Base64 characters that query parsing would mangle.
fn query_escape(value: &str) -> String {
    value.replace('+', "%2B").replace('=', "%3D")
}

fn post_request(inbound: &Value) -> Request<Body> {
    let encrypt = crypt().encrypt(inbound.to_string().as_bytes()).unwrap();
    let signature = calc_signature(TOKEN, TIMESTAMP, NONCE, &encrypt);
    let uri = format!(
        "/callback/command?msg_signature={signature}&timestamp={TIMESTAMP}&nonce={NONCE}"
    );
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json!({ "encrypt": encrypt }).to_string()))
        .unwrap()
}

async fn send(bot: &Bot, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = bot.router(None).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn decrypt_reply(body: &[u8]) -> Value {
    let envelope: Value = serde_json::from_slice(body).unwrap();
    let encrypt = envelope["encrypt"].as_str().unwrap();

    // The reply envelope must carry a valid signature over its own fields.
    let signature = calc_signature(
        TOKEN,
        envelope["timestamp"].as_str().unwrap(),
        envelope["nonce"].as_str().unwrap(),
        encrypt,
    );
    assert_eq!(envelope["msgsignature"].as_str().unwrap(), signature);

    let plain = crypt().decrypt(encrypt).unwrap();
    serde_json::from_slice(&plain).unwrap()
}

fn text_message(msg_id: &str, content: &str) -> Value {
    json!({
        "msgid": msg_id,
        "aibotid": "bot-1",
        "chatid": "chat-1",
        "chattype": "single",
        "from": {"userid": "u1"},
        "msgtype": "text",
        "text": {"content": content}
    })
}

fn refresh_message(stream_id: &str) -> Value {
    json!({
        "msgtype": "stream",
        "from": {"userid": "u1"},
        "stream": {"id": stream_id}
    })
}

fn streaming_handler(chunks: Vec<Chunk>) -> Arc<dyn Handler> {
    Arc::new(HandlerFn(move |_ctx: Context| {
        let chunks = chunks.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Some(rx)
    }))
}

#[tokio::test]
async fn get_verification_round_trips() {
    let bot = bot_with(None);
    let echostr = crypt().encrypt(b"roundtrip-payload").unwrap();
    let signature = calc_signature(TOKEN, TIMESTAMP, NONCE, &echostr);
    let uri = format!(
        "/callback/command?msg_signature={signature}&timestamp={TIMESTAMP}&nonce={NONCE}&echostr={}",
        query_escape(&echostr)
    );

    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(&bot, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"roundtrip-payload");
}

#[tokio::test]
async fn get_verification_survives_unescaped_query_values() {
    let bot = bot_with(None);

    // Find a ciphertext containing '+', then submit it raw so query parsing
    // turns the '+' into a space. A '=' inside a query value survives form
    // parsing untouched, so only '+' needs hunting for.
    let mut echostr = String::new();
    for i in 0..512 {
        let cipher = crypt().encrypt(format!("payload-{i}").as_bytes()).unwrap();
        if cipher.contains('+') {
            echostr = cipher;
            break;
        }
    }
    assert!(!echostr.is_empty(), "no ciphertext with '+' in 512 attempts");

    let signature = calc_signature(TOKEN, TIMESTAMP, NONCE, &echostr);
    let uri = format!(
        "/callback/command?msg_signature={signature}&timestamp={TIMESTAMP}&nonce={NONCE}&echostr={echostr}"
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(&bot, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"payload-"));
}

#[tokio::test]
async fn get_verification_rejects_missing_params_and_bad_signatures() {
    let bot = bot_with(None);

    let request = Request::builder()
        .uri("/callback/command?msg_signature=sig&timestamp=1&nonce=n")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&bot, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let echostr = crypt().encrypt(b"payload").unwrap();
    let uri = format!(
        "/callback/command?msg_signature=forged&timestamp={TIMESTAMP}&nonce={NONCE}&echostr={}",
        query_escape(&echostr)
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, _) = send(&bot, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn post_rejects_malformed_requests() {
    let bot = bot_with(None);

    // Missing query parameters.
    let request = Request::builder()
        .method("POST")
        .uri("/callback/command")
        .body(Body::from("{\"encrypt\":\"x\"}"))
        .unwrap();
    let (status, _) = send(&bot, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unparseable body.
    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/callback/command?msg_signature=s&timestamp={TIMESTAMP}&nonce={NONCE}"
        ))
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&bot, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Tampered ciphertext fails the signature check.
    let encrypt = crypt().encrypt(b"{}").unwrap();
    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/callback/command?msg_signature=forged&timestamp={TIMESTAMP}&nonce={NONCE}"
        ))
        .body(Body::from(json!({ "encrypt": encrypt }).to_string()))
        .unwrap();
    let (status, _) = send(&bot, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn first_packet_acks_and_registers_the_session() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let handler: Arc<dyn Handler> = Arc::new(HandlerFn(move |_ctx: Context| {
        counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx.send(Chunk::final_text("hi")).await;
        });
        Some(rx)
    }));
    let bot = bot_with(Some(handler));

    let (status, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = decrypt_reply(&body);
    assert_eq!(reply["msgtype"], "stream");
    assert_eq!(reply["stream"]["finish"], false);
    assert_eq!(reply["stream"]["content"], "");
    let stream_id = reply["stream"]["id"].as_str().unwrap().to_string();
    assert!(!stream_id.is_empty());

    // A duplicate first packet reuses the session and does not re-run the
    // handler.
    let (status, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["id"].as_str().unwrap(), stream_id);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_coalesces_bursts_into_the_newest_snapshot() {
    let handler = streaming_handler(vec![
        Chunk::text("H"),
        Chunk::text("el"),
        Chunk::text("lo"),
        Chunk::final_text("!"),
    ]);
    let bot = bot_with(Some(handler));

    let (_, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    let stream_id = decrypt_reply(&body)["stream"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, body) = send(&bot, post_request(&refresh_message(&stream_id))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["id"].as_str().unwrap(), stream_id);
    assert_eq!(reply["stream"]["content"], "Hello!");
    assert_eq!(reply["stream"]["finish"], true);
}

#[tokio::test]
async fn refresh_before_output_returns_a_keep_alive() {
    let handler: Arc<dyn Handler> = Arc::new(HandlerFn(|_ctx: Context| {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = tx.send(Chunk::final_text("slow")).await;
        });
        Some(rx)
    }));
    let bot = bot_with(Some(handler));

    let (_, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    let stream_id = decrypt_reply(&body)["stream"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = send(&bot, post_request(&refresh_message(&stream_id))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["content"], "");
    assert_eq!(reply["stream"]["finish"], false);
}

#[tokio::test]
async fn refresh_without_stream_id_terminates() {
    let bot = bot_with(None);
    let (status, body) = send(&bot, post_request(&refresh_message(""))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["id"], "");
    assert_eq!(reply["stream"]["finish"], true);
}

#[tokio::test]
async fn no_response_sentinel_closes_the_session_silently() {
    let handler = streaming_handler(vec![
        Chunk::default().with_payload(ReplyPayload::NoResponse)
    ]);
    let bot = bot_with(Some(handler));

    let (_, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    let stream_id = decrypt_reply(&body)["stream"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) = send(&bot, post_request(&refresh_message(&stream_id))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["content"], "");
    assert_eq!(reply["stream"]["finish"], true);
}

#[tokio::test]
async fn handler_without_output_still_unblocks_polling() {
    let handler = streaming_handler(Vec::new());
    let bot = bot_with(Some(handler));

    let (_, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    let stream_id = decrypt_reply(&body)["stream"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, body) = send(&bot, post_request(&refresh_message(&stream_id))).await;
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["finish"], true);
    assert_eq!(reply["stream"]["content"], "");
}

#[tokio::test]
async fn payload_chunks_replace_the_stream_reply() {
    let handler = streaming_handler(vec![Chunk::default().with_payload(ReplyPayload::Raw(
        json!({"msgtype": "text", "text": {"content": "card-free reply"}}),
    ))]);
    let bot = bot_with(Some(handler));

    let (_, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    let stream_id = decrypt_reply(&body)["stream"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, body) = send(&bot, post_request(&refresh_message(&stream_id))).await;
    let reply = decrypt_reply(&body);
    assert_eq!(reply["msgtype"], "text");
    assert_eq!(reply["text"]["content"], "card-free reply");
}

#[tokio::test]
async fn final_msg_items_ride_on_the_closing_reply() {
    let item = wecom_aibot::build_stream_image_item_from_bytes(b"hello");
    let handler = streaming_handler(vec![
        Chunk::text("look: "),
        Chunk::final_empty().with_msg_items(vec![item]),
    ]);
    let bot = bot_with(Some(handler));

    let (_, body) = send(&bot, post_request(&text_message("M1", "hi"))).await;
    let stream_id = decrypt_reply(&body)["stream"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let (_, body) = send(&bot, post_request(&refresh_message(&stream_id))).await;
    let reply = decrypt_reply(&body);
    assert_eq!(reply["stream"]["finish"], true);
    assert_eq!(reply["stream"]["content"], "look: ");
    assert_eq!(reply["stream"]["msg_item"][0]["image"]["base64"], "aGVsbG8=");
    assert_eq!(
        reply["stream"]["msg_item"][0]["image"]["md5"],
        "5d41402abc4b2a76b9719d911017c592"
    );
}

#[tokio::test]
async fn feedback_events_short_circuit_with_an_empty_body() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let handler: Arc<dyn Handler> = Arc::new(HandlerFn(move |_ctx: Context| {
        counter.fetch_add(1, Ordering::SeqCst);
        None
    }));
    let bot = bot_with(Some(handler));

    let inbound = json!({
        "msgid": "FB1",
        "msgtype": "event",
        "from": {"userid": "u1"},
        "event": {
            "eventtype": "feedback_event",
            "feedback_event": {"id": "fb_1", "type": 2, "content": "off"}
        }
    });
    let (status, body) = send(&bot, post_request(&inbound)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

/// Encrypt bytes the way the platform's file-download endpoint does:
/// PKCS#7 at a 32-byte grain, AES-256-CBC, IV = key[..16], no Base64.
fn encrypt_file_bytes(plain: &[u8]) -> Vec<u8> {
    let engine = base64::engine::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::general_purpose::GeneralPurposeConfig::new()
            .with_decode_allow_trailing_bits(true),
    );
    let key: [u8; 32] = engine
        .decode(format!("{ENCODING_AES_KEY}="))
        .unwrap()
        .try_into()
        .unwrap();

    let mut buf = plain.to_vec();
    let pad = 32 - buf.len() % 32;
    buf.extend(std::iter::repeat(pad as u8).take(pad));
    let len = buf.len();
    cbc::Encryptor::<Aes256>::new((&key).into(), key[..16].into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn inbound_image_urls_are_downloaded_and_decrypted() {
    const IMAGE_BYTES: &[u8] = b"fake-png-bytes";

    // Local stand-in for the platform's encrypted file-download endpoint.
    let file_server = Router::new().route(
        "/img",
        get(|| async { encrypt_file_bytes(IMAGE_BYTES) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/img", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, file_server).await.unwrap();
    });

    let seen: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let capture = seen.clone();
    let handler: Arc<dyn Handler> = Arc::new(HandlerFn(move |ctx: Context| {
        *capture.lock().unwrap() = ctx.message.image.as_ref().and_then(|img| img.data.clone());
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx.send(Chunk::final_empty()).await;
        });
        Some(rx)
    }));
    let bot = bot_with(Some(handler));

    let inbound = json!({
        "msgid": "IMG1",
        "msgtype": "image",
        "from": {"userid": "u1"},
        "image": {"url": url}
    });
    let (status, _) = send(&bot, post_request(&inbound)).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().as_deref(), Some(IMAGE_BYTES));
}
