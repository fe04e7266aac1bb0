//! Sender/subject popover on message rows.
//!
//! Pointer devices show it on hover; touch devices use a long press.

use std::time::{Duration, Instant};

pub const LONG_PRESS: Duration = Duration::from_millis(600);
pub const AUTO_DISMISS: Duration = Duration::from_secs(3);
/// Finger travel (px) that turns a press into a scroll.
pub const MOVE_TOLERANCE: f64 = 10.0;

/// Axis-aligned box in the scroll container's coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Below the row, arrow on the top corner.
    Below,
    /// Flipped above the row, arrow mirrored to the bottom corner.
    Above,
}

/// Put the popover below the row unless the visible part of the scroll
/// container has no room for it there.
pub fn place_popover(row: Rect, popover_height: f64, viewport: Rect) -> Placement {
    let space_below = viewport.bottom() - row.bottom();
    let space_above = row.top - viewport.top;
    if space_below >= popover_height || space_below >= space_above {
        Placement::Below
    } else {
        Placement::Above
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PressState {
    Idle,
    Pressed { at: Instant, x: f64, y: f64 },
    Shown { at: Instant },
}

/// What the host should do after feeding the gesture an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressEvent {
    None,
    /// Show the popover; `vibrate` asks for a short haptic pulse.
    Show { vibrate: bool },
    Hide,
}

/// Long-press recognizer for one row.
#[derive(Debug, Clone)]
pub struct LongPress {
    state: PressState,
    haptics: bool,
}

impl LongPress {
    pub fn new(haptics: bool) -> Self {
        Self {
            state: PressState::Idle,
            haptics,
        }
    }

    pub fn is_shown(&self) -> bool {
        matches!(self.state, PressState::Shown { .. })
    }

    pub fn press(&mut self, at: Instant, x: f64, y: f64) {
        self.state = PressState::Pressed { at, x, y };
    }

    /// Movement past the tolerance cancels a pending press.
    pub fn moved(&mut self, x: f64, y: f64) {
        if let PressState::Pressed { x: x0, y: y0, .. } = self.state {
            if (x - x0).hypot(y - y0) > MOVE_TOLERANCE {
                self.state = PressState::Idle;
            }
        }
    }

    /// Finger lifted before the press fired.
    pub fn release(&mut self) {
        if let PressState::Pressed { .. } = self.state {
            self.state = PressState::Idle;
        }
    }

    /// Advance timers.
    pub fn poll(&mut self, now: Instant) -> PressEvent {
        match self.state {
            PressState::Pressed { at, .. } if now.duration_since(at) >= LONG_PRESS => {
                self.state = PressState::Shown { at: now };
                PressEvent::Show {
                    vibrate: self.haptics,
                }
            }
            PressState::Shown { at } if now.duration_since(at) >= AUTO_DISMISS => {
                self.state = PressState::Idle;
                PressEvent::Hide
            }
            _ => PressEvent::None,
        }
    }
}
