//! Message renderer
//!
//! Pure conversion of an event into chat blocks. The layout is the same for
//! every state; only the header prefix and the icon differ. Blocks are plain
//! structs and enums (no maps), so serialization is byte-for-byte stable.

use crate::event::{AlarmState, AlarmTransitionEvent};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

const ICON_BASE_URL: &str = "https://a.slack-edge.com/production-standard-emoji-assets/14.0/apple-large";

/// Text composition object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

/// Section accessory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Accessory {
    Image { image_url: String, alt_text: String },
}

/// Layout block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        text: TextObject,
    },
    Divider,
    Section {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<TextObject>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accessory: Option<Accessory>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<TextObject>,
    },
}

/// Destination-agnostic alert body, built once per event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    /// Plain fallback shown in notifications
    pub text: String,
    pub blocks: Vec<Block>,
}

impl RenderedMessage {
    /// Canonical JSON encoding of the blocks
    pub fn blocks_json(&self) -> String {
        serde_json::to_string(&self.blocks).unwrap_or_default()
    }
}

/// Per-state header prefix and icon
struct StateStyle {
    prefix: &'static str,
    icon: &'static str,
    alt_text: &'static str,
}

fn style_for(state: AlarmState) -> StateStyle {
    match state {
        AlarmState::Alarm => StateStyle {
            prefix: "Alarm",
            icon: "1f6a8",
            alt_text: "Siren",
        },
        AlarmState::Ok => StateStyle {
            prefix: "Resolved",
            icon: "1f389",
            alt_text: "Tada",
        },
        AlarmState::InsufficientData => StateStyle {
            prefix: "Insufficient data",
            icon: "2049-fe0f",
            alt_text: "Question",
        },
    }
}

fn code(value: &str) -> TextObject {
    TextObject::mrkdwn(format!("`{}`", value))
}

/// Render an event into its chat message
pub fn render(event: &AlarmTransitionEvent) -> RenderedMessage {
    let style = style_for(event.new_state);
    let header = format!("{}: {}", style.prefix, event.alarm_name);
    let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

    let blocks = vec![
        Block::Header {
            text: TextObject::plain(header.clone()),
        },
        Block::Divider,
        Block::Section {
            text: Some(TextObject::mrkdwn(event.reason.clone())),
            accessory: Some(Accessory::Image {
                image_url: format!("{}/{}@2x.png", ICON_BASE_URL, style.icon),
                alt_text: style.alt_text.to_string(),
            }),
            fields: Vec::new(),
        },
        Block::Divider,
        Block::Section {
            text: None,
            accessory: None,
            fields: vec![
                TextObject::mrkdwn("*Account*"),
                TextObject::mrkdwn("*Region*"),
                code(&event.account_id),
                code(&event.region),
                TextObject::mrkdwn("*ARN*"),
                TextObject::mrkdwn("*Timestamp*"),
                code(&event.identities.joined(", ")),
                code(&timestamp),
            ],
        },
    ];

    RenderedMessage {
        text: header,
        blocks,
    }
}
