//! In-memory backend with no display.
//!
//! Windows are plain records, events are queued by the `simulate_*` calls
//! and delivered on the next pump. Failure switches let callers exercise
//! the creation and cosmetic error paths.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use tracing::debug;

use super::{ipc_event, RendererSetup, WindowBackend};
use crate::bridge::Renderer;
use crate::error::ShellError;
use crate::events::{Channel, IpcEnvelope, Key, KeyOrigin, NativeEvent};
use crate::geometry::{Point, Rect, Size};
use crate::hooks::HookPurpose;
use crate::options::{ChromeFlags, WindowSpec};
use crate::scheme::{SchemeInterceptor, SchemeResponse};
use crate::window_manager::WindowId;

/// Primary display work area used unless overridden.
pub const DEFAULT_WORK_AREA: Rect = Rect::new(0, 0, 1920, 1040);

/// Observable state of one headless window.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessWindow {
    pub title: String,
    pub rect: Rect,
    pub visible: bool,
    pub focused: bool,
    pub owner: Option<WindowId>,
    pub chrome: ChromeFlags,
    pub full_screen: bool,
    pub styled: bool,
}

/// Calls a headless renderer has received.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RendererLog {
    pub loaded: Vec<String>,
    pub scripts: Vec<String>,
    pub channels_detached: bool,
    pub scheme_detached: bool,
    pub shut_down: bool,
}

pub struct HeadlessRenderer {
    log: Rc<RefCell<RendererLog>>,
}

impl Renderer for HeadlessRenderer {
    fn load_url(&mut self, url: &str) -> Result<(), ShellError> {
        let mut log = self.log.borrow_mut();
        if log.shut_down {
            return Err(ShellError::Disposed);
        }
        log.loaded.push(url.to_string());
        Ok(())
    }

    fn evaluate_script(&mut self, script: &str) -> Result<(), ShellError> {
        let mut log = self.log.borrow_mut();
        if log.shut_down {
            return Err(ShellError::Disposed);
        }
        log.scripts.push(script.to_string());
        Ok(())
    }

    fn detach_message_channels(&mut self) {
        self.log.borrow_mut().channels_detached = true;
    }

    fn detach_scheme(&mut self) {
        self.log.borrow_mut().scheme_detached = true;
    }

    fn shutdown(&mut self) {
        self.log.borrow_mut().shut_down = true;
    }
}

struct RendererSlot {
    log: Rc<RefCell<RendererLog>>,
    interceptor: SchemeInterceptor,
    bootstrap_script: String,
}

/// In-memory backend that records every call.
///
/// Renderer logs and the destroy record outlive their windows so closed
/// windows stay inspectable; both grow with every window ever opened, which
/// suits tests and short headless runs, not a long-lived host.
#[derive(Default)]
pub struct HeadlessBackend {
    windows: HashMap<WindowId, HeadlessWindow>,
    renderers: HashMap<WindowId, RendererSlot>,
    hooks: HashSet<(WindowId, HookPurpose)>,
    events: VecDeque<NativeEvent>,
    work_area: Option<Rect>,
    destroyed: Vec<WindowId>,
    drags: Vec<WindowId>,
    /// Fail the next window creation.
    pub fail_window_creation: bool,
    /// Fail the next renderer creation.
    pub fail_renderer_creation: bool,
    /// Fail every cosmetic styling call.
    pub fail_cosmetics: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_area(mut self, area: Rect) -> Self {
        self.work_area = Some(area);
        self
    }

    pub fn window(&self, window: WindowId) -> Option<&HeadlessWindow> {
        self.windows.get(&window)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn renderer_log(&self, window: WindowId) -> Option<RendererLog> {
        self.renderers
            .get(&window)
            .map(|slot| slot.log.borrow().clone())
    }

    pub fn bootstrap_script(&self, window: WindowId) -> Option<&str> {
        self.renderers
            .get(&window)
            .map(|slot| slot.bootstrap_script.as_str())
    }

    pub fn hook_installed(&self, window: WindowId, purpose: HookPurpose) -> bool {
        self.hooks.contains(&(window, purpose))
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Windows destroyed so far, in order.
    pub fn destroyed(&self) -> &[WindowId] {
        &self.destroyed
    }

    pub fn drags(&self) -> &[WindowId] {
        &self.drags
    }

    /// Issue a resource request through the window's scheme interceptor.
    ///
    /// Returns `None` once the renderer's scheme registration is gone.
    pub fn fetch(&self, window: WindowId, uri: &str) -> Option<SchemeResponse> {
        let slot = self.renderers.get(&window)?;
        if slot.log.borrow().scheme_detached {
            return None;
        }
        Some(slot.interceptor.handle(uri))
    }

    /// The interceptor handed to the window's renderer, kept alive past
    /// teardown the way an in-flight request would hold it.
    pub fn interceptor(&self, window: WindowId) -> Option<SchemeInterceptor> {
        self.renderers
            .get(&window)
            .map(|slot| slot.interceptor.clone())
    }

    /// User or OS moved the window.
    pub fn simulate_move(&mut self, window: WindowId, position: Point) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.rect.origin = position;
            self.events.push_back(NativeEvent::Moved { window, position });
        }
    }

    pub fn simulate_resize(&mut self, window: WindowId, size: Size) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.rect.size = size;
            self.events.push_back(NativeEvent::Resized { window, size });
        }
    }

    pub fn simulate_focus(&mut self, window: WindowId) {
        for (id, w) in self.windows.iter_mut() {
            w.focused = *id == window;
        }
        if self.windows.contains_key(&window) {
            self.events.push_back(NativeEvent::Focused {
                window,
                focused: true,
            });
        }
    }

    pub fn simulate_close_request(&mut self, window: WindowId) {
        if self.windows.contains_key(&window) {
            self.events.push_back(NativeEvent::CloseRequested { window });
        }
    }

    /// Key press in the native window's message loop. Only delivered while
    /// the dialog key hook is installed.
    pub fn simulate_key(&mut self, window: WindowId, key: Key) {
        if self.hooks.contains(&(window, HookPurpose::DialogKeys)) {
            self.events.push_back(NativeEvent::KeyDown {
                window,
                key,
                origin: KeyOrigin::Window,
            });
        }
    }

    /// Raw IPC body posted by the content of `window`.
    pub fn post_from_content(&mut self, window: WindowId, raw: &str) {
        let Some(slot) = self.renderers.get(&window) else {
            return;
        };
        if slot.log.borrow().channels_detached {
            debug!(event = "shell.headless.ipc_after_detach", window = window.0);
            return;
        }
        let hooked = self.hooks.contains(&(window, HookPurpose::ContentKeys));
        if let Some(event) = ipc_event(window, raw, hooked) {
            self.events.push_back(event);
        }
    }

    /// Content posts on a reserved channel.
    pub fn post_channel(&mut self, window: WindowId, channel: Channel, payload: &str) {
        let raw = IpcEnvelope::new(channel, payload).encode();
        self.post_from_content(window, &raw);
    }

    /// Content finished its startup script.
    pub fn signal_ready(&mut self, window: WindowId) {
        self.post_channel(window, Channel::Ready, "ready");
    }
}

impl WindowBackend for HeadlessBackend {
    type Renderer = HeadlessRenderer;

    fn create_window(
        &mut self,
        window: WindowId,
        spec: &WindowSpec,
        size: Size,
    ) -> Result<(), ShellError> {
        if std::mem::take(&mut self.fail_window_creation) {
            return Err(ShellError::HandleCreation {
                message: "headless window creation disabled".to_string(),
            });
        }
        self.windows.insert(
            window,
            HeadlessWindow {
                title: spec.title.clone(),
                rect: Rect {
                    origin: Point::default(),
                    size,
                },
                visible: false,
                focused: false,
                owner: None,
                chrome: spec.chrome,
                full_screen: spec.full_screen,
                styled: false,
            },
        );
        Ok(())
    }

    fn create_renderer(
        &mut self,
        window: WindowId,
        setup: RendererSetup,
    ) -> Result<HeadlessRenderer, ShellError> {
        if std::mem::take(&mut self.fail_renderer_creation) {
            return Err(ShellError::RendererCreation {
                message: "headless renderer creation disabled".to_string(),
            });
        }
        if !self.windows.contains_key(&window) {
            return Err(ShellError::RendererCreation {
                message: format!("window {} does not exist", window.0),
            });
        }
        let log = Rc::new(RefCell::new(RendererLog {
            loaded: vec![setup.initial_url.to_string()],
            ..RendererLog::default()
        }));
        self.renderers.insert(
            window,
            RendererSlot {
                log: log.clone(),
                interceptor: setup.interceptor,
                bootstrap_script: setup.bootstrap_script,
            },
        );
        Ok(HeadlessRenderer { log })
    }

    fn apply_cosmetics(&mut self, window: WindowId, _spec: &WindowSpec) -> Result<(), ShellError> {
        if self.fail_cosmetics {
            return Err(ShellError::Cosmetic {
                message: "headless styling disabled".to_string(),
            });
        }
        if let Some(w) = self.windows.get_mut(&window) {
            w.styled = true;
        }
        Ok(())
    }

    fn set_owner(&mut self, window: WindowId, owner: Option<WindowId>) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.owner = owner;
        }
    }

    fn outer_rect(&self, window: WindowId) -> Option<Rect> {
        self.windows.get(&window).map(|w| w.rect)
    }

    fn set_position(&mut self, window: WindowId, position: Point) {
        // Programmatic moves do not echo a Moved event here; `simulate_move`
        // covers the OS-reported path.
        if let Some(w) = self.windows.get_mut(&window) {
            w.rect.origin = position;
        }
    }

    fn work_area(&self, _window: Option<WindowId>) -> Rect {
        self.work_area.unwrap_or(DEFAULT_WORK_AREA)
    }

    fn set_visible(&mut self, window: WindowId, visible: bool) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.visible = visible;
        }
    }

    fn focus(&mut self, window: WindowId) {
        if !self.windows.contains_key(&window) {
            return;
        }
        for (id, w) in self.windows.iter_mut() {
            w.focused = *id == window;
        }
    }

    fn install_hook(&mut self, window: WindowId, purpose: HookPurpose) -> Result<(), ShellError> {
        if !self.windows.contains_key(&window) {
            return Err(ShellError::backend(format!(
                "cannot hook missing window {}",
                window.0
            )));
        }
        self.hooks.insert((window, purpose));
        Ok(())
    }

    fn remove_hook(&mut self, window: WindowId, purpose: HookPurpose) {
        self.hooks.remove(&(window, purpose));
    }

    fn begin_drag(&mut self, window: WindowId) {
        if self.windows.contains_key(&window) {
            self.drags.push(window);
        }
    }

    fn destroy(&mut self, window: WindowId) {
        if self.windows.remove(&window).is_some() {
            self.hooks.retain(|(w, _)| *w != window);
            self.events.retain(|e| e.window() != window);
            self.destroyed.push(window);
        }
    }

    fn pump(&mut self) -> Vec<NativeEvent> {
        self.events.drain(..).collect()
    }
}
