//! Template card message bodies: text_notice, news_notice,
//! button_interaction, vote_interaction and multiple_interaction cards,
//! shared by passive replies, active replies and card updates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCard {
    /// text_notice, news_notice, button_interaction, vote_interaction or
    /// multiple_interaction.
    pub card_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_menu: Option<ActionMenu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_title: Option<MainTitle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emphasis_content: Option<EmphasisContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_area: Option<QuoteArea>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_title_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertical_content_list: Vec<VerticalContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub horizontal_content_list: Vec<HorizontalContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jump_list: Vec<JumpAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_action: Option<CardAction>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_image: Option<CardImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_text_area: Option<ImageTextArea>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_selection: Option<SelectionItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub button_list: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkbox: Option<Checkbox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_button: Option<SubmitButton>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_list: Vec<SelectionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// 0 grey (default), 1 black, 2 red, 3 green.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub desc_color: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMenu {
    pub desc: String,
    pub action_list: Vec<ActionItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainTitle {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmphasisContent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteArea {
    /// 0 none, 1 url, 2 mini-program.
    #[serde(rename = "type", default, skip_serializing_if = "is_zero")]
    pub kind: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "appid", default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(rename = "pagepath", default, skip_serializing_if = "String::is_empty")]
    pub page_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quote_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HorizontalContent {
    /// 0 plain text, 1 url, 3 member detail.
    #[serde(rename = "type", default, skip_serializing_if = "is_zero")]
    pub kind: i32,
    #[serde(rename = "keyname")]
    pub key_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "userid", default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerticalContent {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JumpAction {
    /// 0 none, 1 url, 2 mini-program, 3 smart-reply question.
    #[serde(rename = "type", default, skip_serializing_if = "is_zero")]
    pub kind: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub question: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "appid", default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(rename = "pagepath", default, skip_serializing_if = "String::is_empty")]
    pub page_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardAction {
    /// 1 url, 2 mini-program.
    #[serde(rename = "type")]
    pub kind: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "appid", default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(rename = "pagepath", default, skip_serializing_if = "String::is_empty")]
    pub page_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardImage {
    pub url: String,
    /// Width/height ratio, 1.3 to 2.25.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub aspect_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageTextArea {
    #[serde(rename = "type", default, skip_serializing_if = "is_zero")]
    pub kind: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "appid", default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(rename = "pagepath", default, skip_serializing_if = "String::is_empty")]
    pub page_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    /// 1 through 4.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub style: i32,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionItem {
    pub question_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selected_id: String,
    pub option_list: Vec<SelectOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkbox {
    pub question_key: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable: bool,
    /// 0 single choice, 1 multiple choice.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mode: i32,
    pub option_list: Vec<CheckboxOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckboxOption {
    pub id: String,
    pub text: String,
    pub is_checked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitButton {
    pub text: String,
    pub key: String,
}

/// Feedback control attached to active replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}
