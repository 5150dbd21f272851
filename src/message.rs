//! Wire types for the WeCom AI Bot callback protocol: decoded inbound
//! messages and events, encrypted envelopes, and outbound reply builders.

use serde::{Deserialize, Serialize};

use crate::template_card::{FeedbackInfo, TemplateCard};

// ──────────────────────────── inbound ────────────────────────────

/// One decoded callback payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msgid", default)]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,
    #[serde(rename = "aibotid", default)]
    pub aibot_id: String,
    #[serde(rename = "chatid", default)]
    pub chat_id: String,
    /// `single` or `group`.
    #[serde(rename = "chattype", default)]
    pub chat_type: String,
    #[serde(default)]
    pub from: MessageSender,
    /// Asynchronous reply URL, valid for one hour and usable once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    /// text, image, voice, file, mixed, stream or event.
    #[serde(rename = "msgtype", default)]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoicePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FilePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed: Option<MixedPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<QuotePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageSender {
    #[serde(rename = "userid", default)]
    pub user_id: String,
    #[serde(rename = "corpid", default, skip_serializing_if = "Option::is_none")]
    pub corp_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextPayload {
    #[serde(default)]
    pub content: String,
}

/// Image content. On inbound messages `url` points at an encrypted file;
/// `data` holds the decrypted bytes once the dispatcher has fetched them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Decrypted image bytes; never on the wire.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

/// Voice content carries the server-side transcript, not audio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoicePayload {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilePayload {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixedPayload {
    #[serde(rename = "msg_item", default)]
    pub items: Vec<MixedItem>,
}

/// A single text or image entry inside a mixed message or stream reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixedItem {
    #[serde(rename = "msgtype", default)]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
}

/// Refresh-packet marker carried by `msgtype == "stream"` callbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub finish: bool,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "msg_item", default, skip_serializing_if = "Vec::is_empty")]
    pub msg_item: Vec<MixedItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotePayload {
    #[serde(rename = "msgtype", default)]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed: Option<MixedPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoicePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FilePayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "eventtype", default)]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enter_chat: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_card_event: Option<TemplateCardEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_event: Option<FeedbackEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCardEvent {
    #[serde(default)]
    pub card_type: String,
    #[serde(default)]
    pub event_key: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_items: Option<SelectedItems>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedItems {
    #[serde(default)]
    pub selected_item: Vec<SelectedItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedItem {
    #[serde(default)]
    pub question_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_ids: Option<OptionIds>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionIds {
    #[serde(default)]
    pub option_id: Vec<String>,
}

/// User feedback on a bot reply. `kind`: 1 accurate, 2 inaccurate, 3 retracted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inaccurate_reason_list: Vec<i32>,
}

/// Smart-app callback attachment actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub callback_id: String,
    #[serde(default)]
    pub actions: Vec<AttachmentAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// POST callback body: `{"encrypt": "<base64>"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptedRequest {
    #[serde(default)]
    pub encrypt: String,
}

// ──────────────────────────── outbound ────────────────────────────

/// Encrypted reply envelope returned to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedResponse {
    pub encrypt: String,
    #[serde(rename = "msgsignature")]
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
}

/// Typewriter-style streaming reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamReply {
    #[serde(rename = "msgtype")]
    pub msg_type: String,
    pub stream: StreamReplyBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamReplyBody {
    pub id: String,
    pub finish: bool,
    pub content: String,
    /// Only legal on the closing reply; must stay off the wire otherwise.
    #[serde(rename = "msg_item", default, skip_serializing_if = "Vec::is_empty")]
    pub msg_item: Vec<MixedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    #[serde(rename = "msgtype")]
    pub msg_type: String,
    pub text: TextPayload,
}

impl TextMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            msg_type: "text".to_string(),
            text: TextPayload {
                content: content.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCardMessage {
    #[serde(rename = "msgtype")]
    pub msg_type: String,
    pub template_card: TemplateCard,
}

impl TemplateCardMessage {
    pub fn new(card: TemplateCard) -> Self {
        Self {
            msg_type: "template_card".to_string(),
            template_card: card,
        }
    }
}

/// Streaming reply that carries a template card alongside the text body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamWithTemplateCardMessage {
    #[serde(rename = "msgtype")]
    pub msg_type: String,
    pub stream: StreamReplyBody,
    pub template_card: TemplateCard,
}

/// In-place update of a previously delivered template card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTemplateCardMessage {
    pub response_type: String,
    #[serde(rename = "userids", default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<String>,
    pub template_card: TemplateCard,
}

impl UpdateTemplateCardMessage {
    pub fn new(card: TemplateCard, user_ids: Vec<String>) -> Self {
        Self {
            response_type: "update_template_card".to_string(),
            user_ids,
            template_card: card,
        }
    }
}

/// Markdown reply; only valid on the active-push path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownMessage {
    #[serde(rename = "msgtype")]
    pub msg_type: String,
    pub markdown: MarkdownPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkdownPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackInfo>,
}

impl MarkdownMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            msg_type: "markdown".to_string(),
            markdown: MarkdownPayload {
                content: content.into(),
                feedback: None,
            },
        }
    }
}

/// Assemble a bare stream reply.
pub fn build_stream_reply(stream_id: &str, content: &str, finish: bool) -> StreamReply {
    StreamReply {
        msg_type: "stream".to_string(),
        stream: StreamReplyBody {
            id: stream_id.to_string(),
            finish,
            content: content.to_string(),
            msg_item: Vec::new(),
            feedback: None,
        },
    }
}

/// Assemble a stream reply carrying mixed items. The platform only accepts
/// `msg_item` on the closing reply, so the items are attached only when
/// `finish` is set; they are copied so later caller mutation cannot leak
/// into the published reply.
pub fn build_stream_reply_with_msg_items(
    stream_id: &str,
    content: &str,
    finish: bool,
    items: &[MixedItem],
) -> StreamReply {
    let mut reply = build_stream_reply(stream_id, content, finish);
    if finish && !items.is_empty() {
        reply.stream.msg_item = items.to_vec();
    }
    reply
}

/// Build an image entry for the closing stream reply from raw image bytes:
/// standard Base64 body plus a lowercase hex md5. No size or format checks
/// happen here; the platform caps images at 10 MB, JPG/PNG.
pub fn build_stream_image_item_from_bytes(img: &[u8]) -> MixedItem {
    use base64::Engine as _;

    let digest = md5::compute(img);
    MixedItem {
        msg_type: "image".to_string(),
        text: None,
        image: Some(ImagePayload {
            url: None,
            base64: Some(base64::engine::general_purpose::STANDARD.encode(img)),
            md5: Some(format!("{digest:x}")),
            data: None,
        }),
    }
}
