//! The UI port the inbox session drives.
//!
//! The session owns all state and tells the view what to show; hosts
//! (the CLI, a GUI, a test) implement only what they render. Both
//! confirmation steps are required so a host cannot skip them by accident.

use crate::alert::TitleAlert;
use crate::download::DownloadPrompt;
use crate::frame::{FrameMessage, FrameSize};
use crate::links::LinkConfirmation;
use crate::popover::Placement;
use crate::render::{MessageRow, MessageView};
use crate::toast::Toast;

pub trait InboxView: Send {
    /// Current address; `None` while a new one is being requested.
    fn show_address(&mut self, _email: Option<&str>) {}

    /// Loading skeleton while the mailbox is requested.
    fn show_loading(&mut self) {}

    /// Remaining session time, once per second.
    fn show_countdown(&mut self, _seconds_remaining: u64) {}

    /// Session ran out; polling has stopped.
    fn show_expired(&mut self) {}

    fn render_list(&mut self, _rows: &[MessageRow]) {}

    /// Sender/subject popover for a row (hover or long press).
    fn show_popover(&mut self, _row: &MessageRow, _placement: Placement, _vibrate: bool) {}

    fn hide_popover(&mut self) {}

    /// Switch to the list view.
    fn show_list(&mut self) {}

    /// Switch to the detail view.
    fn show_message(&mut self, _message: &MessageView) {}

    /// Deliver a host-to-frame message to the open message's frame.
    fn post_to_frame(&mut self, _message: &FrameMessage) {}

    /// Whether the frame document finished loading.
    fn frame_ready(&self) -> bool {
        true
    }

    /// Width available to the message frame, in CSS pixels.
    fn frame_container_width(&self) -> f64 {
        f64::INFINITY
    }

    fn resize_frame(&mut self, _size: FrameSize) {}

    /// Window title; alternates while a new-mail alert is active.
    fn set_title(&mut self, _title: &str) {}

    /// New mail arrived while the window was in the background.
    fn alert_new_mail(&mut self, _alert: &TitleAlert) {}

    fn toast(&mut self, _toast: Toast) {}

    /// Ask before leaving for an external link.
    fn confirm_link(&mut self, link: &LinkConfirmation) -> bool;

    /// Open a confirmed link.
    fn open_link(&mut self, link: LinkConfirmation) {
        if let Err(err) = link.open(true) {
            tracing::warn!(error = %err, "could not open link");
        }
    }

    /// Ask before saving a file.
    fn confirm_download(&self, prompt: &DownloadPrompt) -> bool;
}
