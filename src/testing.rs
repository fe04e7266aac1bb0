//! In-memory API and recording view shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::alert::TitleAlert;
use crate::client::MailApi;
use crate::download::DownloadPrompt;
use crate::error::{Error, Result};
use crate::frame::{FrameMessage, FrameSize};
use crate::links::LinkConfirmation;
use crate::popover::Placement;
use crate::models::{Download, EmailSession, HistoryEntry, MessageDetail, MessageSummary};
use crate::render::{MessageRow, MessageView};
use crate::toast::Toast;

pub fn session(email: &str, expires_in: u64) -> EmailSession {
    EmailSession {
        email: email.to_string(),
        expires_in,
        session_start: None,
        is_new_session: true,
        message: None,
    }
}

/// `n` unread summaries, newest first.
pub fn summaries(n: u64) -> Vec<MessageSummary> {
    (1..=n)
        .rev()
        .map(|id| MessageSummary {
            id,
            from_name: format!("Sender {id}"),
            from_address: format!("sender{id}@example.com"),
            subject: format!("Subject {id}"),
            is_read: false,
            has_attachments: false,
            text_preview: "preview".into(),
            received_at: Some("2025-03-01T12:00:00Z".into()),
        })
        .collect()
}

pub fn detail(id: u64, html: &str) -> MessageDetail {
    MessageDetail {
        id,
        from_name: format!("Sender {id}"),
        from_address: format!("sender{id}@example.com"),
        to_addresses: Vec::new(),
        subject: format!("Subject {id}"),
        text: "hello".into(),
        html: html.into(),
        is_read: false,
        received_at: None,
        attachments: Vec::new(),
    }
}

fn not_found() -> Error {
    Error::Status {
        status: StatusCode::NOT_FOUND,
        body: String::new(),
    }
}

#[derive(Default)]
struct FakeState {
    session: Option<EmailSession>,
    messages: Vec<MessageSummary>,
    details: HashMap<u64, MessageDetail>,
    images: HashMap<String, (Vec<u8>, String)>,
    image_fetches: HashMap<String, usize>,
    list_results: VecDeque<Result<Vec<MessageSummary>>>,
    reset_results: VecDeque<Result<EmailSession>>,
    calls: HashMap<&'static str, usize>,
    resets: usize,
    list_gate: Option<Arc<Notify>>,
    reset_gate: Option<Arc<Notify>>,
}

/// Scriptable [`MailApi`]: canned answers, call counters and one-shot
/// gates that hold the next request until released.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn with_session(email: &str, expires_in: u64) -> Self {
        let api = Self::default();
        api.lock().session = Some(session(email, expires_in));
        api
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn count(&self, name: &'static str) {
        *self.lock().calls.entry(name).or_default() += 1;
    }

    pub fn calls(&self, name: &str) -> usize {
        self.lock().calls.get(name).copied().unwrap_or(0)
    }

    /// Swap the mailbox the server hands out from now on.
    pub fn set_session(&self, email: &str, expires_in: u64) {
        self.lock().session = Some(session(email, expires_in));
    }

    pub fn set_messages(&self, messages: Vec<MessageSummary>) {
        self.lock().messages = messages;
    }

    pub fn add_detail(&self, detail: MessageDetail) {
        self.lock().details.insert(detail.id, detail);
    }

    pub fn add_image(&self, url: &str, bytes: &[u8], content_type: &str) {
        self.lock()
            .images
            .insert(url.to_string(), (bytes.to_vec(), content_type.to_string()));
    }

    pub fn image_fetches(&self, url: &str) -> usize {
        self.lock().image_fetches.get(url).copied().unwrap_or(0)
    }

    /// Answer the next `list_messages` with `result`.
    pub fn push_list(&self, result: Result<Vec<MessageSummary>>) {
        self.lock().list_results.push_back(result);
    }

    /// Answer the next `reset_email` with `result`.
    pub fn push_reset(&self, result: Result<EmailSession>) {
        self.lock().reset_results.push_back(result);
    }

    /// Hold the next `list_messages` until the returned gate is notified.
    pub fn hold_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().list_gate = Some(gate.clone());
        gate
    }

    /// Hold the next `reset_email` until the returned gate is notified.
    pub fn hold_reset(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().reset_gate = Some(gate.clone());
        gate
    }

    fn current(&self) -> Result<EmailSession> {
        self.lock().session.clone().ok_or(Error::SessionNotFound)
    }
}

#[async_trait]
impl MailApi for FakeApi {
    async fn current_email(&self) -> Result<EmailSession> {
        self.count("current_email");
        self.current()
    }

    async fn reset_email(&self) -> Result<EmailSession> {
        self.count("reset_email");
        let gate = self.lock().reset_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.lock();
        if let Some(result) = state.reset_results.pop_front() {
            return result;
        }
        state.resets += 1;
        let domain = state
            .session
            .as_ref()
            .and_then(|s| s.domain().map(str::to_string))
            .unwrap_or_else(|| "mail.test".into());
        let fresh = session(&format!("fresh{}@{domain}", state.resets), 600);
        state.session = Some(fresh.clone());
        Ok(fresh)
    }

    async fn change_email(&self, address: &str) -> Result<EmailSession> {
        self.count("change_email");
        let mut changed = session(address, 600);
        changed.message = Some("Email changed successfully".into());
        self.lock().session = Some(changed.clone());
        Ok(changed)
    }

    async fn email_history(&self) -> Result<Vec<HistoryEntry>> {
        self.count("email_history");
        Ok(Vec::new())
    }

    async fn list_messages(&self) -> Result<Vec<MessageSummary>> {
        self.count("list_messages");
        let gate = self.lock().list_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.lock();
        match state.list_results.pop_front() {
            Some(result) => result,
            None => Ok(state.messages.clone()),
        }
    }

    async fn get_message(&self, id: u64) -> Result<MessageDetail> {
        self.count("get_message");
        self.lock().details.get(&id).cloned().ok_or_else(not_found)
    }

    async fn download_message(&self, id: u64) -> Result<Download> {
        self.count("download_message");
        Ok(Download {
            bytes: b"From: someone\r\n\r\nbody".to_vec(),
            content_type: Some("message/rfc822".into()),
            filename: Some(format!("message-{id}.eml")),
        })
    }

    async fn download_attachment(&self, _message_id: u64, _attachment_id: &str) -> Result<Download> {
        self.count("download_attachment");
        Ok(Download {
            bytes: b"blob".to_vec(),
            content_type: Some("application/octet-stream".into()),
            filename: None,
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<Download> {
        self.count("fetch_image");
        let mut state = self.lock();
        *state.image_fetches.entry(url.to_string()).or_default() += 1;
        let (bytes, content_type) = state.images.get(url).cloned().ok_or_else(not_found)?;
        Ok(Download {
            bytes,
            content_type: Some(content_type),
            filename: None,
        })
    }
}

/// [`InboxView`](crate::view::InboxView) that records every call.
#[derive(Debug, Default)]
pub struct RecordingView {
    pub addresses: Vec<Option<String>>,
    pub countdowns: Vec<u64>,
    pub expired: usize,
    pub lists: Vec<Vec<MessageRow>>,
    pub shown: Vec<MessageView>,
    pub frame_messages: Vec<FrameMessage>,
    pub frame_heights: Vec<f64>,
    pub titles: Vec<String>,
    pub alerts: usize,
    pub toasts: Vec<Toast>,
    pub popovers: Vec<(MessageRow, Placement, bool)>,
    pub popovers_hidden: usize,
    /// `(href, hidden)` of every link the user was asked about.
    pub confirmed_links: Vec<(String, bool)>,
    pub decline_downloads: bool,
}

impl crate::view::InboxView for RecordingView {
    fn show_address(&mut self, email: Option<&str>) {
        self.addresses.push(email.map(str::to_string));
    }

    fn show_countdown(&mut self, seconds_remaining: u64) {
        self.countdowns.push(seconds_remaining);
    }

    fn show_expired(&mut self) {
        self.expired += 1;
    }

    fn render_list(&mut self, rows: &[MessageRow]) {
        self.lists.push(rows.to_vec());
    }

    fn show_message(&mut self, message: &MessageView) {
        self.shown.push(message.clone());
    }

    fn show_popover(&mut self, row: &MessageRow, placement: Placement, vibrate: bool) {
        self.popovers.push((row.clone(), placement, vibrate));
    }

    fn hide_popover(&mut self) {
        self.popovers_hidden += 1;
    }

    fn post_to_frame(&mut self, message: &FrameMessage) {
        self.frame_messages.push(message.clone());
    }

    fn resize_frame(&mut self, size: FrameSize) {
        self.frame_heights.push(size.height);
    }

    fn set_title(&mut self, title: &str) {
        self.titles.push(title.to_string());
    }

    fn alert_new_mail(&mut self, _alert: &TitleAlert) {
        self.alerts += 1;
    }

    fn toast(&mut self, toast: Toast) {
        self.toasts.push(toast);
    }

    /// Never opens anything during tests.
    fn confirm_link(&mut self, link: &LinkConfirmation) -> bool {
        self.confirmed_links
            .push((link.destination().to_string(), link.is_hidden_url()));
        false
    }

    fn confirm_download(&self, _prompt: &DownloadPrompt) -> bool {
        !self.decline_downloads
    }
}
