// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Input event transcript
//
// While a session is being captured, outgoing pointer, wheel and key activity is
// coalesced into a compact list of high-level events: clicks, drags, scrolls, special
// key presses, and runs of typed text.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Pointer travel below which a press/release pair counts as a click
pub const CLICK_THRESHOLD_PX: f64 = 5.0;

/// Idle time after which buffered typed text is flushed
pub const TYPE_FLUSH_IDLE_MS: u32 = 500;

const SPECIAL_KEYS: &[&str] = &[
    "ArrowUp",
    "ArrowDown",
    "ArrowLeft",
    "ArrowRight",
    "Enter",
    "Tab",
    "Escape",
    "Backspace",
    "Delete",
    "Home",
    "End",
    "PageUp",
    "PageDown",
    "Insert",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        dx.hypot(dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Press,
}

/// High-level user action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    Click { x: i32, y: i32, button: u8 },
    Drag { start: Point, end: Point },
    Scroll { direction: ScrollDirection, x: i32, y: i32 },
    Key { key: String, action: KeyAction },
    Type { text: String },
}

/// Input event with its time relative to recording start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEvent {
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u32,
    #[serde(flatten)]
    pub event: InputEvent,
}

impl TimedEvent {
    pub fn new(timestamp_ms: u32, event: InputEvent) -> Self {
        Self {
            timestamp_ms,
            event,
        }
    }
}

/// Maps canvas-relative pointer positions onto the framebuffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasGeometry {
    pub display_width: f64,
    pub display_height: f64,
    pub backing_width: u32,
    pub backing_height: u32,
}

impl CanvasGeometry {
    /// Geometry where one display unit is one framebuffer pixel
    pub fn unscaled(width: u32, height: u32) -> Self {
        Self {
            display_width: width as f64,
            display_height: height as f64,
            backing_width: width,
            backing_height: height,
        }
    }

    pub fn to_backing(&self, x: f64, y: f64) -> Point {
        let sx = scale(self.backing_width, self.display_width);
        let sy = scale(self.backing_height, self.display_height);
        Point::new((x * sx).round() as i32, (y * sy).round() as i32)
    }
}

fn scale(backing: u32, display: f64) -> f64 {
    if display > 0.0 && backing > 0 {
        backing as f64 / display
    } else {
        1.0
    }
}

/// How a transmitted key contributes to the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyClass {
    Printable(char),
    Special,
    Ignored,
}

/// Classify a key name as sent to the server
pub fn classify_key(key: &str) -> KeyClass {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return if c.is_control() {
            KeyClass::Ignored
        } else {
            KeyClass::Printable(c)
        };
    }

    if SPECIAL_KEYS.contains(&key) || is_function_key(key) {
        KeyClass::Special
    } else {
        KeyClass::Ignored
    }
}

fn is_function_key(key: &str) -> bool {
    key.strip_prefix('F')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=24).contains(&n))
}

#[derive(Debug, Clone, Copy)]
struct PointerDown {
    at: Point,
    button: u8,
    timestamp_ms: u32,
}

#[derive(Debug, Default)]
struct TypeBuffer {
    text: String,
    last_ms: u32,
}

/// Coalesces raw input into `TimedEvent`s
#[derive(Debug)]
pub struct EventTranscriber {
    active: bool,
    geometry: CanvasGeometry,
    pointer: Option<PointerDown>,
    typed: TypeBuffer,
    events: Vec<TimedEvent>,
}

impl EventTranscriber {
    pub fn new(geometry: CanvasGeometry) -> Self {
        Self {
            active: false,
            geometry,
            pointer: None,
            typed: TypeBuffer::default(),
            events: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.pointer = None;
    }

    pub fn set_geometry(&mut self, geometry: CanvasGeometry) {
        self.geometry = geometry;
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Insert keeping the list ordered by timestamp, after any equal timestamps
    fn push(&mut self, timestamp_ms: u32, event: InputEvent) {
        trace!(timestamp_ms, event = ?event, "Transcribed input event");
        let at = self
            .events
            .partition_point(|e| e.timestamp_ms <= timestamp_ms);
        self.events.insert(at, TimedEvent::new(timestamp_ms, event));
    }

    pub fn pointer_down(&mut self, x: f64, y: f64, button: u8, timestamp_ms: u32) {
        if !self.active {
            return;
        }
        self.flush_typed();
        self.pointer = Some(PointerDown {
            at: self.geometry.to_backing(x, y),
            button,
            timestamp_ms,
        });
    }

    pub fn pointer_up(&mut self, x: f64, y: f64, _timestamp_ms: u32) {
        if !self.active {
            return;
        }
        let Some(down) = self.pointer.take() else {
            return;
        };

        let end = self.geometry.to_backing(x, y);
        let event = if down.at.distance(&end) < CLICK_THRESHOLD_PX {
            InputEvent::Click {
                x: down.at.x,
                y: down.at.y,
                button: down.button,
            }
        } else {
            InputEvent::Drag {
                start: down.at,
                end,
            }
        };
        self.push(down.timestamp_ms, event);
    }

    /// Wheel input; `delta_y > 0` scrolls down
    pub fn wheel(&mut self, x: f64, y: f64, delta_y: f64, timestamp_ms: u32) {
        if !self.active || delta_y == 0.0 || delta_y.is_nan() {
            return;
        }
        self.flush_typed();
        let at = self.geometry.to_backing(x, y);
        let direction = if delta_y > 0.0 {
            ScrollDirection::Down
        } else {
            ScrollDirection::Up
        };
        self.push(
            timestamp_ms,
            InputEvent::Scroll {
                direction,
                x: at.x,
                y: at.y,
            },
        );
    }

    /// A key event transmitted to the server
    pub fn key_sent(&mut self, key: &str, down: bool, timestamp_ms: u32) {
        if !self.active || !down {
            return;
        }

        match classify_key(key) {
            KeyClass::Printable(c) => {
                self.flush_idle(timestamp_ms);
                self.typed.text.push(c);
                self.typed.last_ms = timestamp_ms;
            }
            KeyClass::Special => {
                self.flush_typed();
                self.push(
                    timestamp_ms,
                    InputEvent::Key {
                        key: key.to_string(),
                        action: KeyAction::Press,
                    },
                );
            }
            KeyClass::Ignored => {}
        }
    }

    /// Flush buffered text if no key arrived for the idle interval
    pub fn flush_idle(&mut self, now_ms: u32) {
        if !self.typed.text.is_empty()
            && now_ms.saturating_sub(self.typed.last_ms) >= TYPE_FLUSH_IDLE_MS
        {
            self.flush_typed();
        }
    }

    fn flush_typed(&mut self) {
        if self.typed.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.typed.text);
        let timestamp_ms = self.typed.last_ms;
        self.push(timestamp_ms, InputEvent::Type { text });
    }

    /// Flush pending text and hand over the transcript
    pub fn finalize(&mut self) -> Vec<TimedEvent> {
        self.flush_typed();
        self.pointer = None;
        std::mem::take(&mut self.events)
    }
}
