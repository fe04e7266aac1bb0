pub mod alert;
pub mod backoff;
pub mod client;
pub mod constants;
pub mod csrf;
pub mod download;
pub mod error;
pub mod frame;
pub mod images;
pub mod links;
pub mod models;
pub mod popover;
pub mod render;
pub mod sanitize;
pub mod session;
pub mod toast;
pub mod username;
pub mod view;

#[cfg(test)]
mod testing;

pub use client::{MailApi, TempMailClient, TempMailClientBuilder};
pub use constants::{default_headers, default_timeout, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
pub use error::{Error, Result};
pub use frame::{FrameDocument, FrameMessage, Theme};
pub use models::{
    Attachment, CacheClearResult, Config, Download, EmailSession, HistoryEntry, MessageDetail,
    MessageSummary,
};
pub use render::{MessageBody, MessageRow, MessageView};
pub use session::{Command, InboxSession, Phase, SessionState, Visibility};
pub use username::generate_random_username;
pub use view::InboxView;
