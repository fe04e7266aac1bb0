//! View models for the message list and the message detail pane.
//!
//! Pure data transformation: the host decides how rows and bodies are
//! drawn, these types only decide what is shown.

use chrono::{DateTime, Local};

use crate::download::{format_size, AttachmentKind};
use crate::frame::{FrameDocument, Theme};
use crate::models::{Attachment, MessageDetail, MessageSummary};
use crate::sanitize::{render_plain_text, sanitize_html};

pub const NO_SUBJECT: &str = "(no subject)";
pub const UNKNOWN_SENDER: &str = "Unknown sender";

fn sender_name(name: &str, address: &str) -> String {
    let name = name.trim();
    if !name.is_empty() {
        name.to_string()
    } else if !address.trim().is_empty() {
        address.trim().to_string()
    } else {
        UNKNOWN_SENDER.to_string()
    }
}

fn subject_or_default(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        NO_SUBJECT.to_string()
    } else {
        subject.to_string()
    }
}

/// First letter of the sender, uppercased; `?` when there is none.
pub fn avatar_letter(name: &str, address: &str) -> String {
    name.trim()
        .chars()
        .chain(address.trim().chars())
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}

/// Local, human readable timestamp; the raw value if it does not parse.
pub fn format_received(received_at: Option<&str>) -> String {
    let Some(raw) = received_at else {
        return String::new();
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Local).format("%d/%m/%Y %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// One line of the inbox list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: u64,
    pub sender: String,
    pub sender_address: String,
    pub subject: String,
    pub preview: String,
    pub avatar: String,
    pub unread: bool,
    pub has_attachments: bool,
    /// Full sender and subject for the hover/long-press popover.
    pub popover: String,
}

impl MessageRow {
    pub fn from_summary(msg: &MessageSummary) -> Self {
        let sender = sender_name(&msg.from_name, &msg.from_address);
        let subject = subject_or_default(&msg.subject);
        let popover = if msg.from_address.is_empty() || sender == msg.from_address {
            format!("{sender}\n{subject}")
        } else {
            format!("{sender} <{}>\n{subject}", msg.from_address)
        };
        Self {
            id: msg.id,
            avatar: avatar_letter(&msg.from_name, &msg.from_address),
            sender,
            sender_address: msg.from_address.clone(),
            subject,
            preview: msg.text_preview.trim().to_string(),
            unread: !msg.is_read,
            has_attachments: msg.has_attachments,
            popover,
        }
    }
}

/// Rows in server order; never re-sorted.
pub fn message_rows(messages: &[MessageSummary]) -> Vec<MessageRow> {
    messages.iter().map(MessageRow::from_summary).collect()
}

/// Body ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Escaped, linkified and sanitized plain text, safe to inline.
    Plain(String),
    /// HTML body, only ever shown inside the sandboxed frame.
    Frame(FrameDocument),
    Empty,
}

impl MessageBody {
    pub fn build(text: &str, html: &str, theme: Theme) -> Self {
        if !html.trim().is_empty() {
            let clean = sanitize_html(html);
            if !clean.html.trim().is_empty() {
                return MessageBody::Frame(FrameDocument::build(clean, theme));
            }
        }
        if !text.trim().is_empty() {
            return MessageBody::Plain(render_plain_text(text));
        }
        MessageBody::Empty
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentView {
    pub id: String,
    pub filename: String,
    pub kind: AttachmentKind,
    pub icon: &'static str,
    pub size: String,
}

impl AttachmentView {
    pub fn from_attachment(att: &Attachment) -> Self {
        let kind = AttachmentKind::detect(&att.content_type, &att.filename);
        Self {
            id: att.id.clone(),
            filename: if att.filename.is_empty() {
                format!("attachment-{}", att.id)
            } else {
                att.filename.clone()
            },
            kind,
            icon: kind.icon(),
            size: format_size(att.size),
        }
    }
}

/// The open-message pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: u64,
    pub sender: String,
    pub sender_address: String,
    pub avatar: String,
    pub subject: String,
    pub date: String,
    pub body: MessageBody,
    pub attachments: Vec<AttachmentView>,
}

impl MessageView {
    pub fn build(detail: &MessageDetail, theme: Theme) -> Self {
        Self {
            id: detail.id,
            sender: sender_name(&detail.from_name, &detail.from_address),
            sender_address: detail.from_address.clone(),
            avatar: avatar_letter(&detail.from_name, &detail.from_address),
            subject: subject_or_default(&detail.subject),
            date: format_received(detail.received_at.as_deref()),
            body: MessageBody::build(&detail.text, &detail.html, theme),
            attachments: detail
                .attachments
                .iter()
                .map(AttachmentView::from_attachment)
                .collect(),
        }
    }
}
