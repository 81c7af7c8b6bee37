use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Size};
use crate::window_manager::WindowId;

/// Maximum renderer message size (10 MB). Larger messages are dropped.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Reserved renderer-to-host channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Arbitrary app payloads, forwarded verbatim.
    General,
    /// One-shot readiness handshake.
    Ready,
    /// Content asks to close the active dialog (`"close"` or `"backdrop"`).
    Dismiss,
    /// Mouse-down inside the drag band.
    Drag,
    /// Key press observed by the content's own listener.
    Key,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::General => "message",
            Channel::Ready => "ready",
            Channel::Dismiss => "dismiss",
            Channel::Drag => "drag",
            Channel::Key => "key",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "message" => Some(Channel::General),
            "ready" => Some(Channel::Ready),
            "dismiss" => Some(Channel::Dismiss),
            "drag" => Some(Channel::Drag),
            "key" => Some(Channel::Key),
            _ => None,
        }
    }
}

/// Wire form of a renderer-to-host message over the single IPC primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcEnvelope {
    pub channel: String,
    #[serde(default)]
    pub payload: String,
}

impl IpcEnvelope {
    pub fn new(channel: Channel, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.as_str().to_string(),
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> String {
        // A struct of two strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Split a raw IPC body into channel and payload.
    ///
    /// Bodies that are not an envelope, or name an unknown channel, are
    /// treated as general messages and passed through untouched.
    pub fn decode(raw: &str) -> (Channel, String) {
        match serde_json::from_str::<IpcEnvelope>(raw) {
            Ok(env) => match Channel::parse(&env.channel) {
                Some(channel) => (channel, env.payload),
                None => (Channel::General, raw.to_string()),
            },
            Err(_) => (Channel::General, raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other(u32),
}

impl Key {
    /// Map a DOM `KeyboardEvent.key` name.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "Escape" | "Esc" => Key::Escape,
            _ => Key::Other(0),
        }
    }
}

/// Where a key press was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// The native window's message loop.
    Window,
    /// Inside the embedded renderer, where native hooks do not see it.
    Content,
}

/// Events delivered by a backend during a pump.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    Moved { window: WindowId, position: Point },
    Resized { window: WindowId, size: Size },
    Focused { window: WindowId, focused: bool },
    CloseRequested { window: WindowId },
    KeyDown {
        window: WindowId,
        key: Key,
        origin: KeyOrigin,
    },
    Ipc {
        window: WindowId,
        channel: Channel,
        payload: String,
    },
}

impl NativeEvent {
    pub fn window(&self) -> WindowId {
        match self {
            NativeEvent::Moved { window, .. }
            | NativeEvent::Resized { window, .. }
            | NativeEvent::Focused { window, .. }
            | NativeEvent::CloseRequested { window }
            | NativeEvent::KeyDown { window, .. }
            | NativeEvent::Ipc { window, .. } => *window,
        }
    }
}

/// Whether the manager swallowed an event or let it continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Forwarded,
    Consumed,
}

/// A general-channel message, as handed to app code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub window: WindowId,
    pub source: String,
    pub payload: String,
}
