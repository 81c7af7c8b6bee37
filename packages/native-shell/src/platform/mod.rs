//! Native windowing backends.
//!
//! The lifecycle manager talks to the platform only through
//! [`WindowBackend`]. The headless backend is always built; the tao + wry
//! backend is behind the `wry-backend` feature.

pub mod headless;
#[cfg(feature = "wry-backend")]
pub mod unified;

use tracing::warn;
use url::Url;

use crate::bridge::Renderer;
use crate::error::ShellError;
use crate::events::{Channel, IpcEnvelope, Key, KeyOrigin, NativeEvent, MAX_MESSAGE_SIZE};
use crate::geometry::{Point, Rect, Size};
use crate::hooks::HookPurpose;
use crate::options::WindowSpec;
use crate::scheme::SchemeInterceptor;
use crate::window_manager::WindowId;

/// Everything a backend needs to build a renderer for one window.
pub struct RendererSetup {
    /// Absolute content URI loaded first.
    pub initial_url: Url,
    /// Private scheme name, e.g. `app`.
    pub scheme: String,
    pub interceptor: SchemeInterceptor,
    /// Injected before any content script runs.
    pub bootstrap_script: String,
    pub devtools: bool,
}

/// Platform window services.
///
/// Every call happens on the UI thread. Calls naming a window the backend
/// no longer knows are ignored.
pub trait WindowBackend {
    type Renderer: Renderer;

    /// Allocate a hidden native window of `size`.
    fn create_window(
        &mut self,
        window: WindowId,
        spec: &WindowSpec,
        size: Size,
    ) -> Result<(), ShellError>;

    /// Attach a renderer to `window`, wired to `setup`.
    fn create_renderer(
        &mut self,
        window: WindowId,
        setup: RendererSetup,
    ) -> Result<Self::Renderer, ShellError>;

    /// Rounded corners, tint, title-bar style. Failures are never fatal.
    fn apply_cosmetics(&mut self, window: WindowId, spec: &WindowSpec) -> Result<(), ShellError>;

    fn set_owner(&mut self, window: WindowId, owner: Option<WindowId>);

    fn outer_rect(&self, window: WindowId) -> Option<Rect>;

    /// Move without resizing.
    fn set_position(&mut self, window: WindowId, position: Point);

    /// Work area of the display holding `window`, or of the primary display.
    fn work_area(&self, window: Option<WindowId>) -> Rect;

    fn set_visible(&mut self, window: WindowId, visible: bool);

    fn focus(&mut self, window: WindowId);

    fn install_hook(&mut self, window: WindowId, purpose: HookPurpose) -> Result<(), ShellError>;

    fn remove_hook(&mut self, window: WindowId, purpose: HookPurpose);

    /// Start a native move driven by the pointer.
    fn begin_drag(&mut self, window: WindowId);

    /// Destroy the native handle. The renderer is already shut down.
    fn destroy(&mut self, window: WindowId);

    /// Collect native events observed since the last pump.
    fn pump(&mut self) -> Vec<NativeEvent>;
}

/// Turn a raw renderer IPC body into a native event.
///
/// Oversized bodies are dropped, and content key presses are only reported
/// while a content key hook is installed.
pub(crate) fn ipc_event(
    window: WindowId,
    raw: &str,
    content_keys_hooked: bool,
) -> Option<NativeEvent> {
    if raw.len() > MAX_MESSAGE_SIZE {
        warn!(
            event = "shell.ipc.oversized",
            window = window.0,
            size = raw.len()
        );
        return None;
    }
    match IpcEnvelope::decode(raw) {
        (Channel::Key, payload) => content_keys_hooked.then(|| NativeEvent::KeyDown {
            window,
            key: Key::from_name(&payload),
            origin: KeyOrigin::Content,
        }),
        (channel, payload) => Some(NativeEvent::Ipc {
            window,
            channel,
            payload,
        }),
    }
}
