//! The inbox session: one temporary mailbox, its countdown and the
//! polling that keeps its message list fresh.
//!
//! [`SessionState`] is the synchronous state machine (every guard and
//! schedule decision lives there and is unit tested without I/O).
//! [`InboxSession`] wires it to a [`MailApi`] and an [`InboxView`], and
//! [`InboxSession::run`] is the event loop with a single timer.
//!
//! ```text
//! Uninitialized -> Loading -> Active <-> ReadingMessage
//!                               |  \         |
//!                               |   Resetting <
//!                               v        |
//!                            Expired ----+ (only through a reset)
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::alert::TitleAlert;
use crate::backoff::Backoff;
use crate::client::MailApi;
use crate::constants::{GENERIC_DOWNLOAD_ERROR, GENERIC_RENAME_ERROR, GENERIC_RESET_ERROR};
use crate::download::{Confirm, DownloadManager, DownloadPrompt};
use crate::error::{Error, Result};
use crate::frame::{FrameMessage, FrameSize, Theme};
use crate::images::{load_inline_images, wait_until_ready, ImageCache};
use crate::links::LinkConfirmation;
use crate::models::{Config, EmailSession, HistoryEntry, MessageDetail, MessageSummary};
use crate::popover::{place_popover, Placement, PressEvent, Rect};
use crate::render::{message_rows, MessageBody, MessageRow, MessageView};
use crate::toast::Toast;
use crate::username::{validate_change, UsernameChange};
use crate::view::InboxView;

const SECOND: Duration = Duration::from_secs(1);
const DEFAULT_TITLE: &str = "Temp Mail";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Active,
    ReadingMessage,
    Resetting,
    Expired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Why a poll was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTrigger {
    /// The fast foreground period, a retry or a manual refresh.
    Regular,
    /// The slow period used while hidden outside the critical window.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    Resetting,
    ReadingMessage,
    Inactive,
    Hidden,
    TooLittleTime,
}

/// What a finished poll changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Message count differs from the last poll; re-render the list.
    pub changed: bool,
    pub new_messages: usize,
    /// Raise the background new-mail alert.
    pub alert: bool,
    /// The server lost the session; request the mailbox again.
    pub recover: bool,
    /// Delay of the scheduled retry after a transient failure.
    pub retry_in: Option<Duration>,
}

/// Knobs the state machine needs from [`Config`].
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub background_interval: Duration,
    pub critical_window_secs: u64,
    pub background_min_remaining_secs: u64,
    pub max_retries: u32,
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.effective_poll_interval(),
            background_interval: config.background_interval,
            critical_window_secs: config.critical_window.as_secs(),
            background_min_remaining_secs: config.background_min_remaining.as_secs(),
            max_retries: config.max_retries,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone)]
struct ResetSnapshot {
    phase: Phase,
    email: Option<String>,
    messages: Vec<MessageSummary>,
    last_message_count: usize,
}

/// Session state and every decision made from it.
#[derive(Debug, Clone)]
pub struct SessionState {
    settings: PollSettings,
    phase: Phase,
    email: Option<String>,
    seconds_remaining: u64,
    messages: Vec<MessageSummary>,
    last_message_count: usize,
    visibility: Visibility,
    is_refreshing: bool,
    is_loading_message: bool,
    open_message: Option<u64>,
    backoff: Backoff,
    retry_pending: Option<Duration>,
    reset_snapshot: Option<ResetSnapshot>,
}

impl SessionState {
    pub fn new(settings: PollSettings) -> Self {
        let backoff = Backoff::new(settings.max_retries);
        Self {
            settings,
            phase: Phase::Uninitialized,
            email: None,
            seconds_remaining: 0,
            messages: Vec::new(),
            last_message_count: 0,
            visibility: Visibility::Visible,
            is_refreshing: false,
            is_loading_message: false,
            open_message: None,
            backoff,
            retry_pending: None,
            reset_snapshot: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn seconds_remaining(&self) -> u64 {
        self.seconds_remaining
    }

    pub fn messages(&self) -> &[MessageSummary] {
        &self.messages
    }

    pub fn last_message_count(&self) -> usize {
        self.last_message_count
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_refreshing(&self) -> bool {
        self.is_refreshing
    }

    pub fn is_loading_message(&self) -> bool {
        self.is_loading_message
    }

    pub fn open_message(&self) -> Option<u64> {
        self.open_message
    }

    pub fn retry_count(&self) -> u32 {
        self.backoff.retry_count()
    }

    /// Last seconds of the session, when polling continues while hidden.
    pub fn in_critical_window(&self) -> bool {
        self.seconds_remaining > 0 && self.seconds_remaining <= self.settings.critical_window_secs
    }

    pub fn begin_loading(&mut self) {
        if self.phase == Phase::Uninitialized {
            self.phase = Phase::Loading;
        }
    }

    /// Loading failed; `start` may be tried again.
    pub fn loading_failed(&mut self) {
        if self.phase == Phase::Loading {
            self.phase = Phase::Uninitialized;
        }
    }

    /// Adopt a server-issued session. The countdown only ever starts
    /// from the server's `expires_in`.
    pub fn apply_session(&mut self, session: &EmailSession) {
        if self.email.as_deref() != Some(session.email.as_str()) {
            self.messages.clear();
            self.last_message_count = 0;
            self.open_message = None;
        }
        self.email = Some(session.email.clone());
        self.seconds_remaining = session.expires_in;
        self.backoff.on_success();
        self.retry_pending = None;
        self.phase = if session.expires_in == 0 {
            Phase::Expired
        } else if self.phase == Phase::ReadingMessage && self.open_message.is_some() {
            Phase::ReadingMessage
        } else {
            Phase::Active
        };
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// Which kind of poll is due right now.
    pub fn due_trigger(&self) -> PollTrigger {
        if self.visibility == Visibility::Hidden && !self.in_critical_window() {
            PollTrigger::Background
        } else {
            PollTrigger::Regular
        }
    }

    /// Guard evaluated before every poll request.
    pub fn poll_decision(&self, trigger: PollTrigger) -> std::result::Result<(), SkipReason> {
        if self.is_refreshing {
            return Err(SkipReason::InFlight);
        }
        match self.phase {
            Phase::Active => {}
            Phase::Resetting => return Err(SkipReason::Resetting),
            Phase::ReadingMessage => return Err(SkipReason::ReadingMessage),
            _ => return Err(SkipReason::Inactive),
        }
        if self.visibility == Visibility::Hidden && !self.in_critical_window() {
            return match trigger {
                PollTrigger::Regular => Err(SkipReason::Hidden),
                PollTrigger::Background
                    if self.seconds_remaining > self.settings.background_min_remaining_secs =>
                {
                    Ok(())
                }
                PollTrigger::Background => Err(SkipReason::TooLittleTime),
            };
        }
        Ok(())
    }

    /// Claim the single in-flight poll slot.
    pub fn begin_refresh(&mut self, trigger: PollTrigger) -> std::result::Result<(), SkipReason> {
        self.poll_decision(trigger)?;
        self.is_refreshing = true;
        self.retry_pending = None;
        Ok(())
    }

    /// The in-flight poll was dropped before it answered.
    pub fn cancel_refresh(&mut self) {
        self.is_refreshing = false;
    }

    pub fn finish_refresh(&mut self, result: Result<Vec<MessageSummary>>) -> RefreshOutcome {
        self.is_refreshing = false;
        let mut outcome = RefreshOutcome::default();
        match result {
            Ok(messages) => {
                self.backoff.on_success();
                if self.phase == Phase::Resetting {
                    debug!("discarding poll result that raced a reset");
                    return outcome;
                }
                let count = messages.len();
                outcome.changed = count != self.last_message_count;
                outcome.new_messages = count.saturating_sub(self.last_message_count);
                outcome.alert = outcome.new_messages > 0
                    && self.visibility == Visibility::Hidden
                    && self.in_critical_window();
                self.last_message_count = count;
                self.messages = messages;
                if let Some(id) = self.open_message {
                    mark_read(&mut self.messages, id);
                }
            }
            Err(err) if err.is_session_invalid() => {
                outcome.recover = self.phase != Phase::Resetting;
            }
            Err(err) if err.is_transient() => {
                self.retry_pending = self.backoff.on_failure();
                outcome.retry_in = self.retry_pending;
                match self.retry_pending {
                    Some(delay) => debug!(?delay, retry = self.backoff.retry_count(), error = %err, "poll failed, retrying"),
                    None => warn!(error = %err, "poll keeps failing, waiting for the next period"),
                }
            }
            Err(err) => warn!(error = %err, "poll failed"),
        }
        outcome
    }

    /// One second passed. Returns true when the session just expired.
    pub fn tick(&mut self) -> bool {
        let counting = matches!(self.phase, Phase::Active | Phase::ReadingMessage | Phase::Resetting);
        if !counting || self.seconds_remaining == 0 {
            return false;
        }
        self.seconds_remaining -= 1;
        // A reset in flight settles expiry itself: the new session replaces
        // the countdown, a failed one expires in `abort_reset`.
        if self.seconds_remaining == 0 && self.phase != Phase::Resetting {
            self.phase = Phase::Expired;
            self.retry_pending = None;
            return true;
        }
        false
    }

    /// Delay until the next poll, or `None` when polling is stopped.
    pub fn next_poll_delay(&self) -> Option<Duration> {
        match self.phase {
            Phase::Uninitialized => return Some(self.settings.poll_interval),
            Phase::Active => {}
            _ => return None,
        }
        if let Some(delay) = self.retry_pending {
            return Some(delay);
        }
        if self.visibility == Visibility::Visible || self.in_critical_window() {
            return Some(self.settings.poll_interval);
        }
        // Hidden: slow period, but never sleep past the start of the
        // critical window.
        let until_critical = self
            .seconds_remaining
            .saturating_sub(self.settings.critical_window_secs);
        Some(
            self.settings
                .background_interval
                .min(Duration::from_secs(until_critical))
                .max(SECOND),
        )
    }

    /// Claim the message-loading slot.
    pub fn begin_open(&mut self) -> bool {
        if self.is_loading_message
            || !matches!(self.phase, Phase::Active | Phase::ReadingMessage | Phase::Expired)
        {
            return false;
        }
        self.is_loading_message = true;
        true
    }

    /// A message was fetched: mark it read locally and show it.
    pub fn finish_open(&mut self, id: u64) {
        self.is_loading_message = false;
        if self.phase == Phase::Resetting {
            return;
        }
        mark_read(&mut self.messages, id);
        self.open_message = Some(id);
        if self.phase == Phase::Active {
            self.phase = Phase::ReadingMessage;
        }
    }

    pub fn open_failed(&mut self) {
        self.is_loading_message = false;
    }

    /// Leave the detail view; polling resumes if time remains.
    pub fn back_to_list(&mut self) {
        self.open_message = None;
        if self.phase == Phase::ReadingMessage {
            self.phase = if self.seconds_remaining > 0 {
                Phase::Active
            } else {
                Phase::Expired
            };
        }
    }

    /// Enter `Resetting`: polling stops and the display is cleared.
    pub fn begin_reset(&mut self) -> Result<()> {
        if self.phase == Phase::Resetting {
            return Err(Error::ResetInProgress);
        }
        self.reset_snapshot = Some(ResetSnapshot {
            phase: if self.phase == Phase::ReadingMessage {
                Phase::Active
            } else {
                self.phase
            },
            email: self.email.take(),
            messages: std::mem::take(&mut self.messages),
            last_message_count: self.last_message_count,
        });
        self.phase = Phase::Resetting;
        self.last_message_count = 0;
        self.open_message = None;
        self.retry_pending = None;
        Ok(())
    }

    pub fn finish_reset(&mut self, session: &EmailSession) {
        self.reset_snapshot = None;
        self.phase = Phase::Active;
        self.apply_session(session);
    }

    /// The reset request failed: go back to exactly where we were.
    pub fn abort_reset(&mut self) {
        if let Some(snapshot) = self.reset_snapshot.take() {
            self.phase = snapshot.phase;
            self.email = snapshot.email;
            self.messages = snapshot.messages;
            self.last_message_count = snapshot.last_message_count;
            if self.phase == Phase::Active && self.seconds_remaining == 0 {
                self.phase = Phase::Expired;
            }
        }
    }
}

/// Optimistically flag a message as read in the local list.
pub fn mark_read(messages: &mut [MessageSummary], id: u64) -> bool {
    match messages.iter_mut().find(|m| m.id == id) {
        Some(message) if !message.is_read => {
            message.is_read = true;
            true
        }
        _ => false,
    }
}

/// Requests a host can send to a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Refresh,
    OpenMessage(u64),
    BackToList,
    Reset,
    Rename(String),
    SetVisibility(Visibility),
    ToggleTheme,
    /// Raw `postMessage` payload from the message frame.
    Frame(Value),
    DownloadAttachment(String),
    DownloadMessage,
    Shutdown,
}

impl Command {
    /// Commands that leave the list view; an in-flight poll is dropped.
    fn cancels_poll(&self) -> bool {
        matches!(
            self,
            Command::OpenMessage(_) | Command::Reset | Command::Rename(_) | Command::Shutdown
        )
    }
}

/// Result of a reset or rename request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// A new address is active.
    Replaced(String),
    /// Same address as before; nothing was sent.
    Unchanged,
    /// Another reset was already in flight.
    Ignored,
}

enum Replace {
    Random,
    Rename(String),
}

struct ViewConfirm<'a, V: InboxView>(&'a V);

impl<V: InboxView> Confirm for ViewConfirm<'_, V> {
    fn confirm(&self, prompt: &DownloadPrompt) -> bool {
        self.0.confirm_download(prompt)
    }
}

/// A live mailbox bound to an API and a view.
pub struct InboxSession<A: MailApi + ?Sized, V: InboxView> {
    api: Arc<A>,
    view: V,
    config: Config,
    state: SessionState,
    theme: Theme,
    images: ImageCache,
    current: Option<MessageDetail>,
    alert: Option<(TitleAlert, Instant)>,
    deferred: VecDeque<Command>,
    next_tick: Instant,
}

impl<A: MailApi + ?Sized, V: InboxView> InboxSession<A, V> {
    pub fn new(api: Arc<A>, view: V, config: Config) -> Self {
        let state = SessionState::new(PollSettings::from(&config));
        Self {
            api,
            view,
            config,
            state,
            theme: Theme::default(),
            images: ImageCache::new(),
            current: None,
            alert: None,
            deferred: VecDeque::new(),
            next_tick: Instant::now() + SECOND,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.images
    }

    /// Request the session's mailbox, then poll once.
    pub async fn start(&mut self) -> Result<()> {
        self.state.begin_loading();
        self.view.show_loading();
        match self.api.current_email().await {
            Ok(session) => {
                info!(email = %session.email, expires_in = session.expires_in, "mailbox ready");
                self.adopt(&session);
                self.refresh().await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "could not load mailbox");
                self.state.loading_failed();
                self.view
                    .toast(Toast::error(err.user_message("Could not load your address.")));
                Err(err)
            }
        }
    }

    fn adopt(&mut self, session: &EmailSession) {
        let switched = self.state.email().is_some_and(|email| email != session.email);
        self.state.apply_session(session);
        self.view.show_address(self.state.email());
        self.view.show_countdown(self.state.seconds_remaining());
        if switched {
            self.view.render_list(&message_rows(self.state.messages()));
        }
        if self.state.phase() == Phase::Expired {
            self.view.show_expired();
        }
    }

    /// Poll now, subject to the same guards as the timer.
    pub async fn refresh(&mut self) -> Option<RefreshOutcome> {
        let trigger = self.state.due_trigger();
        if let Err(reason) = self.state.begin_refresh(trigger) {
            debug!(?reason, "poll skipped");
            return None;
        }
        let result = self.api.list_messages().await;
        Some(self.apply_refresh(result).await)
    }

    async fn apply_refresh(&mut self, result: Result<Vec<MessageSummary>>) -> RefreshOutcome {
        let outcome = self.state.finish_refresh(result);
        if outcome.changed {
            self.view.render_list(&message_rows(self.state.messages()));
        }
        if outcome.alert {
            let alert = TitleAlert::new(DEFAULT_TITLE, outcome.new_messages, self.config.alert_duration);
            self.view.alert_new_mail(&alert);
            self.alert = Some((alert, Instant::now()));
        }
        if outcome.recover {
            self.recover().await;
        }
        outcome
    }

    /// Silent recovery after the server forgot the session.
    async fn recover(&mut self) {
        if self.state.phase() == Phase::Resetting {
            return;
        }
        info!("session lost, requesting mailbox again");
        match self.api.current_email().await {
            Ok(session) => self.adopt(&session),
            Err(err) => warn!(error = %err, "session recovery failed"),
        }
    }

    /// Countdown step; also drives the title alert.
    pub fn tick(&mut self) {
        let expired = self.state.tick();
        if matches!(self.state.phase(), Phase::Active | Phase::ReadingMessage) || expired {
            self.view.show_countdown(self.state.seconds_remaining());
        }
        if expired {
            info!(email = ?self.state.email(), "session expired");
            self.view.show_expired();
            self.view.toast(Toast::warning("This address has expired. Generate a new one to keep receiving mail."));
        }
        if let Some((alert, started)) = &self.alert {
            let elapsed = started.elapsed();
            if alert.is_active(elapsed) {
                self.view.set_title(alert.title_at(elapsed));
            } else {
                self.view.set_title(DEFAULT_TITLE);
                self.alert = None;
            }
        }
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.state.set_visibility(visibility);
        if visibility == Visibility::Visible {
            if let Some((mut alert, _)) = self.alert.take() {
                alert.cancel();
                self.view.set_title(DEFAULT_TITLE);
            }
        }
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        if self.current.is_some() {
            self.view.post_to_frame(&self.theme.change_message());
        }
    }

    /// Show the popover for row `id`, flipped above the row when the visible
    /// part of the list has no room below it.
    pub fn show_popover(&mut self, id: u64, row: Rect, popover_height: f64, viewport: Rect) -> Option<Placement> {
        self.popover_for(id, row, popover_height, viewport, false)
    }

    /// Feed the outcome of a row's [`LongPress`](crate::popover::LongPress).
    pub fn handle_press(
        &mut self,
        id: u64,
        event: PressEvent,
        row: Rect,
        popover_height: f64,
        viewport: Rect,
    ) -> Option<Placement> {
        match event {
            PressEvent::Show { vibrate } => self.popover_for(id, row, popover_height, viewport, vibrate),
            PressEvent::Hide => {
                self.view.hide_popover();
                None
            }
            PressEvent::None => None,
        }
    }

    fn popover_for(
        &mut self,
        id: u64,
        row: Rect,
        popover_height: f64,
        viewport: Rect,
        vibrate: bool,
    ) -> Option<Placement> {
        let summary = self.state.messages().iter().find(|m| m.id == id)?;
        let message_row = MessageRow::from_summary(summary);
        let placement = place_popover(row, popover_height, viewport);
        self.view.show_popover(&message_row, placement, vibrate);
        Some(placement)
    }

    /// Fetch and show one message.
    pub async fn open_message(&mut self, id: u64) -> Result<()> {
        if !self.state.begin_open() {
            debug!(id, "message open ignored");
            return Ok(());
        }
        let result = self.api.get_message(id).await;
        self.complete_open(id, result).await
    }

    async fn complete_open(&mut self, id: u64, result: Result<MessageDetail>) -> Result<()> {
        let detail = match result {
            Ok(detail) => detail,
            Err(err) => {
                self.state.open_failed();
                warn!(id, error = %err, "could not load message");
                self.view
                    .toast(Toast::error(err.user_message("Could not load this message.")));
                return Err(err);
            }
        };
        self.state.finish_open(id);
        if self.state.phase() == Phase::Resetting {
            return Ok(());
        }
        self.view.render_list(&message_rows(self.state.messages()));

        let view = MessageView::build(&detail, self.theme);
        self.view.show_message(&view);
        self.current = Some(detail);

        if let MessageBody::Frame(doc) = &view.body {
            if !doc.inline_images.is_empty() {
                let ready = wait_until_ready(|| self.view.frame_ready()).await;
                if !ready {
                    debug!(id, "frame never became ready, loading images anyway");
                }
                let updates = load_inline_images(&*self.api, &mut self.images, &doc.inline_images).await;
                for update in &updates {
                    self.view.post_to_frame(update);
                }
                self.view.post_to_frame(&FrameMessage::RecalculateSize);
            }
        }
        Ok(())
    }

    pub fn back_to_list(&mut self) {
        self.state.back_to_list();
        self.current = None;
        self.view.show_list();
    }

    /// Replace the mailbox with a random address.
    pub async fn reset(&mut self) -> Result<ResetOutcome> {
        self.replace(Replace::Random).await
    }

    /// Switch to a user-chosen username on the current domain.
    pub async fn rename(&mut self, input: &str) -> Result<ResetOutcome> {
        self.replace(Replace::Rename(input.to_string())).await
    }

    async fn replace(&mut self, request: Replace) -> Result<ResetOutcome> {
        let target = match self.prepare_replace(request)? {
            Some(target) => target,
            None => return Ok(ResetOutcome::Unchanged),
        };
        let result = match &target {
            Some(address) => self.api.change_email(address).await,
            None => self.api.reset_email().await,
        };
        self.complete_replace(target.is_some(), result).await
    }

    /// Validate and enter `Resetting`. `Ok(None)`: nothing to do.
    /// `Ok(Some(None))`: random address. `Ok(Some(Some(addr)))`: rename.
    fn prepare_replace(&mut self, request: Replace) -> Result<Option<Option<String>>> {
        if self.state.phase() == Phase::Resetting {
            debug!("reset already in flight");
            return Err(Error::ResetInProgress);
        }
        let target = match request {
            Replace::Random => None,
            Replace::Rename(input) => {
                let current = self.state.email().unwrap_or_default();
                match validate_change(&input, current) {
                    Ok(UsernameChange::Unchanged) => return Ok(None),
                    Ok(UsernameChange::Changed(address)) => Some(address),
                    Err(err) => {
                        self.view.toast(Toast::error(err.to_string()));
                        return Err(err.into());
                    }
                }
            }
        };
        self.state.begin_reset()?;
        self.images.clear();
        self.current = None;
        self.view.show_address(None);
        self.view.show_loading();
        self.view.render_list(&[]);
        Ok(Some(target))
    }

    async fn complete_replace(&mut self, renamed: bool, result: Result<EmailSession>) -> Result<ResetOutcome> {
        match result {
            Ok(session) => {
                info!(email = %session.email, "new address");
                self.state.finish_reset(&session);
                self.adopt(&session);
                self.view.show_list();
                let text = session
                    .message
                    .clone()
                    .unwrap_or_else(|| "New address ready.".to_string());
                self.view.toast(Toast::success(text));
                self.refresh().await;
                Ok(ResetOutcome::Replaced(session.email))
            }
            Err(err) => {
                warn!(error = %err, "address change failed");
                self.state.abort_reset();
                self.view.show_address(self.state.email());
                self.view.show_countdown(self.state.seconds_remaining());
                if self.state.phase() == Phase::Expired {
                    self.view.show_expired();
                }
                self.view.render_list(&message_rows(self.state.messages()));
                let fallback = if renamed {
                    GENERIC_RENAME_ERROR
                } else {
                    GENERIC_RESET_ERROR
                };
                self.view.toast(Toast::error(err.user_message(fallback)));
                Err(err)
            }
        }
    }

    /// Recently used addresses.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.api.email_history().await
    }

    /// Handle a `postMessage` payload coming from the message frame.
    pub fn handle_frame_message(&mut self, data: &Value) -> Result<()> {
        match FrameMessage::from_frame(data) {
            Ok(FrameMessage::Resize { width, height }) => {
                let size = FrameSize::fit(width, height, self.view.frame_container_width());
                self.view.resize_frame(size);
                Ok(())
            }
            Ok(FrameMessage::LinkClick { href, text }) => {
                let link = LinkConfirmation::new(&text, &href);
                if link.is_hidden_url() {
                    warn!(href = %href, text = %text, "link text hides its real target");
                }
                if self.view.confirm_link(&link) {
                    self.view.open_link(link);
                }
                Ok(())
            }
            Ok(other) => Err(Error::Frame(format!("unexpected {other:?}"))),
            Err(err) => {
                debug!(error = %err, "ignoring frame message");
                Err(err)
            }
        }
    }

    fn open_detail(&self) -> Option<&MessageDetail> {
        self.current
            .as_ref()
            .filter(|d| Some(d.id) == self.state.open_message())
    }

    /// Download an attachment of the open message.
    pub async fn download_attachment(&mut self, attachment_id: &str) -> Result<Option<PathBuf>> {
        let Some(detail) = self.open_detail() else {
            return Ok(None);
        };
        let Some(attachment) = detail.attachments.iter().find(|a| a.id == attachment_id) else {
            return Err(Error::Parse(format!("no attachment {attachment_id}")));
        };
        let manager = DownloadManager::new(&*self.api, &self.config.download_dir);
        let result = manager
            .download_attachment(detail.id, attachment, &ViewConfirm(&self.view))
            .await;
        self.report_download(result)
    }

    /// Download the open message as `.eml`.
    pub async fn download_message(&mut self) -> Result<Option<PathBuf>> {
        let Some(detail) = self.open_detail() else {
            return Ok(None);
        };
        let manager = DownloadManager::new(&*self.api, &self.config.download_dir);
        let result = manager
            .download_message(detail.id, &detail.subject, &ViewConfirm(&self.view))
            .await;
        self.report_download(result)
    }

    fn report_download(&mut self, result: Result<Option<PathBuf>>) -> Result<Option<PathBuf>> {
        match &result {
            Ok(Some(path)) => self
                .view
                .toast(Toast::success(format!("Saved {}", path.display()))),
            Ok(None) => {}
            Err(err) => self
                .view
                .toast(Toast::error(err.user_message(GENERIC_DOWNLOAD_ERROR))),
        }
        result
    }

    /// Event loop: owns the countdown and poll timers and serves commands
    /// until `Shutdown` or until every sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        self.next_tick = Instant::now() + SECOND;
        if let Err(err) = self.start().await {
            debug!(error = %err, "start failed, will retry");
        }
        let mut next_poll = self.next_poll_at();

        loop {
            while let Some(cmd) = self.deferred.pop_front() {
                if !self.dispatch(cmd, &mut commands).await {
                    return self;
                }
                next_poll = self.next_poll_at();
            }

            let wake = next_poll.map_or(self.next_tick, |poll| poll.min(self.next_tick));
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.dispatch(cmd, &mut commands).await {
                        break;
                    }
                    next_poll = self.next_poll_at();
                }
                _ = sleep_until(wake) => {
                    self.catch_up_ticks();
                    match next_poll {
                        Some(poll) if Instant::now() >= poll => {
                            if !self.poll_due(&mut commands).await {
                                break;
                            }
                            next_poll = self.next_poll_at();
                        }
                        Some(_) if self.state.next_poll_delay().is_none() => next_poll = None,
                        Some(_) => {}
                        None => next_poll = self.next_poll_at(),
                    }
                }
            }
        }
        self
    }

    fn next_poll_at(&self) -> Option<Instant> {
        self.state.next_poll_delay().map(|delay| Instant::now() + delay)
    }

    fn catch_up_ticks(&mut self) {
        while Instant::now() >= self.next_tick {
            self.tick();
            self.next_tick += SECOND;
        }
    }

    async fn poll_due(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        if self.state.phase() == Phase::Uninitialized {
            if let Err(err) = self.start().await {
                debug!(error = %err, "start failed again");
            }
            return true;
        }
        self.poll_racing(commands).await
    }

    /// Poll while still serving commands and the countdown; a command that
    /// leaves the list view drops the request and runs next.
    async fn poll_racing(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        let trigger = self.state.due_trigger();
        if let Err(reason) = self.state.begin_refresh(trigger) {
            debug!(?reason, "poll skipped");
            return true;
        }
        let api = Arc::clone(&self.api);
        let request = async move { api.list_messages().await };
        tokio::pin!(request);
        loop {
            tokio::select! {
                result = &mut request => {
                    self.apply_refresh(result).await;
                    return true;
                }
                _ = sleep_until(self.next_tick) => self.catch_up_ticks(),
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        self.state.cancel_refresh();
                        return false;
                    }
                    Some(cmd) if cmd.cancels_poll() => {
                        debug!(?cmd, "cancelling in-flight poll");
                        self.state.cancel_refresh();
                        self.deferred.push_front(cmd);
                        return true;
                    }
                    Some(cmd) => self.apply_inline(cmd),
                }
            }
        }
    }

    async fn open_racing(&mut self, id: u64, commands: &mut mpsc::Receiver<Command>) -> bool {
        if !self.state.begin_open() {
            debug!(id, "message open ignored");
            return true;
        }
        let api = Arc::clone(&self.api);
        let request = async move { api.get_message(id).await };
        tokio::pin!(request);
        let result = loop {
            tokio::select! {
                result = &mut request => break result,
                _ = sleep_until(self.next_tick) => self.catch_up_ticks(),
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        self.state.open_failed();
                        return false;
                    }
                    Some(cmd @ (Command::Reset | Command::Rename(_))) => self.deferred.push_back(cmd),
                    Some(cmd) => self.apply_inline(cmd),
                }
            }
        };
        // Errors are already surfaced through the view.
        let _ = self.complete_open(id, result).await;
        true
    }

    async fn replace_racing(&mut self, request: Replace, commands: &mut mpsc::Receiver<Command>) -> bool {
        let renamed = matches!(request, Replace::Rename(_));
        let target = match self.prepare_replace(request) {
            Ok(Some(target)) => target,
            Ok(None) | Err(_) => return true,
        };
        let api = Arc::clone(&self.api);
        let call = async move {
            match target {
                Some(address) => api.change_email(&address).await,
                None => api.reset_email().await,
            }
        };
        tokio::pin!(call);
        let result = loop {
            tokio::select! {
                result = &mut call => break result,
                _ = sleep_until(self.next_tick) => self.catch_up_ticks(),
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        self.state.abort_reset();
                        return false;
                    }
                    Some(cmd) => self.apply_inline(cmd),
                }
            }
        };
        let _ = self.complete_replace(renamed, result).await;
        true
    }

    /// Commands that need no network round trip, or that are rejected
    /// while another operation is in flight.
    fn apply_inline(&mut self, cmd: Command) {
        match cmd {
            Command::BackToList => self.back_to_list(),
            Command::SetVisibility(visibility) => self.set_visibility(visibility),
            Command::ToggleTheme => self.toggle_theme(),
            Command::Frame(data) => {
                let _ = self.handle_frame_message(&data);
            }
            Command::Reset | Command::Rename(_) if self.state.phase() == Phase::Resetting => {
                debug!("ignoring reset: one is already in flight");
            }
            other => {
                debug!(?other, "busy, dropping command");
            }
        }
    }

    async fn dispatch(&mut self, cmd: Command, commands: &mut mpsc::Receiver<Command>) -> bool {
        match cmd {
            Command::Shutdown => false,
            Command::Refresh => self.poll_racing(commands).await,
            Command::OpenMessage(id) => self.open_racing(id, commands).await,
            Command::Reset => self.replace_racing(Replace::Random, commands).await,
            Command::Rename(input) => self.replace_racing(Replace::Rename(input), commands).await,
            Command::DownloadAttachment(id) => {
                let _ = self.download_attachment(&id).await;
                true
            }
            Command::DownloadMessage => {
                let _ = self.download_message().await;
                true
            }
            other => {
                self.apply_inline(other);
                true
            }
        }
    }
}
