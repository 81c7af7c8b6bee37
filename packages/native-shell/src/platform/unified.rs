/// Cross-platform backend using tao (windowing) + wry (webview).
///
/// Native callbacks (IPC, custom protocol, window events) never hold a
/// reference into the backend. They carry the window id and look up what
/// they need in thread-local tables, so a callback racing a teardown finds
/// nothing instead of a freed renderer.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use tao::dpi::{LogicalPosition, LogicalSize};
use tao::event::{ElementState, Event, WindowEvent};
use tao::event_loop::{ControlFlow, EventLoop};
use tao::keyboard::KeyCode;
use tao::platform::run_return::EventLoopExtRunReturn;
use tao::window::{Fullscreen, Window, WindowBuilder};
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
use wry::WebViewBuilderExtUnix;
#[cfg(target_os = "windows")]
use wry::WebViewBuilderExtWindows;
use wry::{WebView, WebViewBuilder};

use super::headless::DEFAULT_WORK_AREA;
use super::{ipc_event, RendererSetup, WindowBackend};
use crate::bridge::Renderer;
use crate::error::ShellError;
use crate::events::{Key, KeyOrigin, NativeEvent};
use crate::geometry::{Point, Rect, Size};
use crate::hooks::HookPurpose;
#[cfg(target_os = "macos")]
use crate::options::ChromeStyle;
use crate::options::WindowSpec;
use crate::scheme::SchemeInterceptor;
use crate::window_manager::WindowId;

/// Per-window callback routes, keyed by window id.
#[derive(Default)]
struct Route {
    channels: bool,
    content_keys: bool,
    interceptor: Option<SchemeInterceptor>,
}

thread_local! {
    /// The tao event loop. Stored outside the backend because `run_return`
    /// takes `&mut EventLoop` while window lookups borrow the backend.
    static EVENT_LOOP: RefCell<Option<EventLoop<()>>> = RefCell::new(None);
    static ROUTES: RefCell<HashMap<u32, Route>> = RefCell::new(HashMap::new());
    /// Events observed by callbacks, drained on every pump.
    static PENDING_EVENTS: RefCell<Vec<NativeEvent>> = RefCell::new(Vec::new());
    static MAX_PENDING_EVENTS: Cell<usize> = Cell::new(10_000);
    /// Set on the first drop after the buffer fills, cleared on drain.
    static PENDING_OVERFLOWED: Cell<bool> = Cell::new(false);
}

/// Push an item to a thread-local pending buffer, enforcing the cap.
/// Drops the item if the buffer is full, warning once until the next drain.
macro_rules! capped_push {
    ($tls:ident, $item:expr) => {
        $tls.with(|p| {
            let cap = MAX_PENDING_EVENTS.with(|c| c.get());
            let mut buf = p.borrow_mut();
            if buf.len() >= cap {
                if !PENDING_OVERFLOWED.with(|o| o.replace(true)) {
                    warn!(event = "shell.pump.buffer_full", buffer = stringify!($tls), cap);
                }
                return;
            }
            buf.push($item);
        })
    };
}

/// Everything buffered since the last pump. Re-arms the overflow warning.
fn take_pending_events() -> Vec<NativeEvent> {
    PENDING_OVERFLOWED.with(|o| o.set(false));
    PENDING_EVENTS.with(|p| std::mem::take(&mut *p.borrow_mut()))
}

fn with_route<R>(window: u32, f: impl FnOnce(&mut Route) -> R) -> Option<R> {
    ROUTES.with(|r| r.borrow_mut().get_mut(&window).map(f))
}

/// URL the webview must be pointed at for a private-scheme URI.
///
/// On Windows, `with_https_scheme(true)` maps `app://localhost/` to
/// `https://app.localhost/`, and `load_url()` does not translate at runtime.
fn navigation_url(url: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        if let Ok(parsed) = url::Url::parse(url) {
            if parsed.scheme() != "https" && parsed.scheme() != "http" {
                let mut out = format!(
                    "https://{}.{}{}",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or("localhost"),
                    parsed.path()
                );
                if let Some(query) = parsed.query() {
                    out.push('?');
                    out.push_str(query);
                }
                return out;
            }
        }
    }
    url.to_string()
}

/// Inverse of [`navigation_url`] for requests reaching the protocol handler.
fn canonical_request_uri(scheme: &str, uri: &str) -> String {
    let mapped = format!("https://{}.", scheme);
    match uri.strip_prefix(&mapped) {
        Some(rest) => format!("{}://{}", scheme, rest),
        None => uri.to_string(),
    }
}

pub struct WryRenderer {
    window: WindowId,
    webview: Option<WebView>,
}

impl Renderer for WryRenderer {
    fn load_url(&mut self, url: &str) -> Result<(), ShellError> {
        let webview = self.webview.as_ref().ok_or(ShellError::Disposed)?;
        webview
            .load_url(&navigation_url(url))
            .map_err(|e| ShellError::backend(format!("load_url failed: {}", e)))
    }

    fn evaluate_script(&mut self, script: &str) -> Result<(), ShellError> {
        let webview = self.webview.as_ref().ok_or(ShellError::Disposed)?;
        webview
            .evaluate_script(script)
            .map_err(|e| ShellError::backend(format!("evaluate_script failed: {}", e)))
    }

    fn detach_message_channels(&mut self) {
        with_route(self.window.0, |route| route.channels = false);
    }

    fn detach_scheme(&mut self) {
        with_route(self.window.0, |route| route.interceptor = None);
    }

    fn shutdown(&mut self) {
        // Dropping the webview stops loading and destroys the engine.
        self.webview = None;
        ROUTES.with(|r| {
            r.borrow_mut().remove(&self.window.0);
        });
    }
}

/// Unified platform state backed by tao + wry.
pub struct UnifiedBackend {
    windows: HashMap<WindowId, Window>,
    /// Reverse map: tao WindowId → our window id.
    window_id_map: HashMap<tao::window::WindowId, WindowId>,
    owners: HashMap<WindowId, WindowId>,
    key_hooks: HashSet<WindowId>,
}

impl UnifiedBackend {
    /// Create the backend and the tao event loop. Must run on the main thread.
    pub fn new(max_pending_events: usize) -> Self {
        EVENT_LOOP.with(|el| {
            let mut slot = el.borrow_mut();
            if slot.is_none() {
                *slot = Some(EventLoop::new());
            }
        });
        MAX_PENDING_EVENTS.with(|c| c.set(max_pending_events));
        Self {
            windows: HashMap::new(),
            window_id_map: HashMap::new(),
            owners: HashMap::new(),
            key_hooks: HashSet::new(),
        }
    }

    pub fn owner(&self, window: WindowId) -> Option<WindowId> {
        self.owners.get(&window).copied()
    }
}

impl WindowBackend for UnifiedBackend {
    type Renderer = WryRenderer;

    fn create_window(
        &mut self,
        window: WindowId,
        spec: &WindowSpec,
        size: Size,
    ) -> Result<(), ShellError> {
        EVENT_LOOP.with(|el| {
            let el_ref = el.borrow();
            let event_loop = el_ref.as_ref().ok_or_else(|| ShellError::HandleCreation {
                message: "event loop not initialized".to_string(),
            })?;

            let mut builder = WindowBuilder::new()
                .with_title(spec.title.as_str())
                .with_inner_size(LogicalSize::new(size.width as f64, size.height as f64))
                .with_resizable(spec.chrome.can_resize)
                .with_visible(false);

            if let (Some(w), Some(h)) = (spec.min_width, spec.min_height) {
                builder = builder.with_min_inner_size(LogicalSize::new(w as f64, h as f64));
            }
            if let (Some(w), Some(h)) = (spec.max_width, spec.max_height) {
                // Min wins over an inconsistent max.
                let w = w.max(spec.min_width.unwrap_or(w));
                let h = h.max(spec.min_height.unwrap_or(h));
                builder = builder.with_max_inner_size(LogicalSize::new(w as f64, h as f64));
            }
            if spec.full_screen {
                builder = builder.with_fullscreen(Some(Fullscreen::Borderless(None)));
            }

            #[cfg(target_os = "macos")]
            if spec.chrome_style == ChromeStyle::Compact {
                use tao::platform::macos::WindowBuilderExtMacOS;
                builder = builder
                    .with_titlebar_transparent(true)
                    .with_title_hidden(true)
                    .with_fullsize_content_view(true);
            }

            let native = builder
                .build(event_loop)
                .map_err(|e| ShellError::HandleCreation {
                    message: e.to_string(),
                })?;

            self.window_id_map.insert(native.id(), window);
            self.windows.insert(window, native);
            Ok(())
        })
    }

    fn create_renderer(
        &mut self,
        window: WindowId,
        setup: RendererSetup,
    ) -> Result<WryRenderer, ShellError> {
        let native = self
            .windows
            .get(&window)
            .ok_or_else(|| ShellError::RendererCreation {
                message: format!("window {} does not exist", window.0),
            })?;

        ROUTES.with(|r| {
            r.borrow_mut().insert(
                window.0,
                Route {
                    channels: true,
                    content_keys: false,
                    interceptor: Some(setup.interceptor),
                },
            );
        });

        let id = window;
        let scheme = setup.scheme.clone();

        let mut builder = WebViewBuilder::new()
            .with_devtools(setup.devtools)
            .with_initialization_script(&setup.bootstrap_script)
            .with_url(navigation_url(setup.initial_url.as_str()));

        // IPC handler: receives envelopes from window.ipc.postMessage()
        builder = builder.with_ipc_handler(move |req: http::Request<String>| {
            let Some((attached, content_keys)) =
                with_route(id.0, |route| (route.channels, route.content_keys))
            else {
                return;
            };
            if !attached {
                return;
            }
            if let Some(event) = ipc_event(id, req.body(), content_keys) {
                capped_push!(PENDING_EVENTS, event);
            }
        });

        // Private scheme: every app resource goes through the interceptor.
        builder = builder.with_custom_protocol(setup.scheme.clone(), move |_webview_id, request| {
            let uri = canonical_request_uri(&scheme, &request.uri().to_string());
            let interceptor = with_route(id.0, |route| route.interceptor.clone())
                .flatten()
                .unwrap_or_else(SchemeInterceptor::detached);
            interceptor.handle(&uri)
        });

        // Block popups (window.open)
        builder = builder.with_new_window_req_handler(|_url, _features| wry::NewWindowResponse::Deny);

        #[cfg(target_os = "windows")]
        {
            builder = builder.with_https_scheme(true);
        }

        #[cfg(target_os = "linux")]
        let built = {
            use tao::platform::unix::WindowExtUnix;
            builder.build_gtk(native.gtk_window())
        };
        #[cfg(not(target_os = "linux"))]
        let built = builder.build(native);

        match built {
            Ok(webview) => Ok(WryRenderer {
                window,
                webview: Some(webview),
            }),
            Err(e) => {
                ROUTES.with(|r| {
                    r.borrow_mut().remove(&window.0);
                });
                Err(ShellError::RendererCreation {
                    message: e.to_string(),
                })
            }
        }
    }

    fn apply_cosmetics(&mut self, window: WindowId, spec: &WindowSpec) -> Result<(), ShellError> {
        let native = self
            .windows
            .get(&window)
            .ok_or_else(|| ShellError::Cosmetic {
                message: format!("window {} does not exist", window.0),
            })?;
        native.set_minimizable(spec.chrome.can_minimize && spec.buttons.show_minimize);
        native.set_maximizable(spec.chrome.can_maximize && spec.buttons.show_maximize);
        native.set_closable(spec.chrome.can_close && spec.buttons.show_close);
        Ok(())
    }

    fn set_owner(&mut self, window: WindowId, owner: Option<WindowId>) {
        match owner {
            Some(owner) => {
                self.owners.insert(window, owner);
            }
            None => {
                self.owners.remove(&window);
            }
        }
    }

    fn outer_rect(&self, window: WindowId) -> Option<Rect> {
        let native = self.windows.get(&window)?;
        let scale = native.scale_factor();
        let position: LogicalPosition<f64> = native.outer_position().ok()?.to_logical(scale);
        let size: LogicalSize<f64> = native.outer_size().to_logical(scale);
        Some(Rect::new(
            position.x.round() as i32,
            position.y.round() as i32,
            size.width.round() as i32,
            size.height.round() as i32,
        ))
    }

    fn set_position(&mut self, window: WindowId, position: Point) {
        if let Some(native) = self.windows.get(&window) {
            native.set_outer_position(LogicalPosition::new(position.x as f64, position.y as f64));
        }
    }

    fn work_area(&self, window: Option<WindowId>) -> Rect {
        let monitor = match window.and_then(|w| self.windows.get(&w)) {
            Some(native) => native.current_monitor().or_else(|| native.primary_monitor()),
            None => EVENT_LOOP.with(|el| el.borrow().as_ref().and_then(|l| l.primary_monitor())),
        };
        let Some(monitor) = monitor else {
            return DEFAULT_WORK_AREA;
        };
        let scale = monitor.scale_factor();
        let position: LogicalPosition<f64> = monitor.position().to_logical(scale);
        let size: LogicalSize<f64> = monitor.size().to_logical(scale);
        Rect::new(
            position.x.round() as i32,
            position.y.round() as i32,
            size.width.round() as i32,
            size.height.round() as i32,
        )
    }

    fn set_visible(&mut self, window: WindowId, visible: bool) {
        if let Some(native) = self.windows.get(&window) {
            native.set_visible(visible);
        }
    }

    fn focus(&mut self, window: WindowId) {
        if let Some(native) = self.windows.get(&window) {
            native.set_focus();
        }
    }

    fn install_hook(&mut self, window: WindowId, purpose: HookPurpose) -> Result<(), ShellError> {
        if !self.windows.contains_key(&window) {
            return Err(ShellError::backend(format!(
                "cannot hook missing window {}",
                window.0
            )));
        }
        match purpose {
            HookPurpose::DialogKeys => {
                self.key_hooks.insert(window);
            }
            HookPurpose::ContentKeys => {
                with_route(window.0, |route| route.content_keys = true);
            }
            // tao reports moves and resizes for every window.
            HookPurpose::OwnerPosition | HookPurpose::DialogPosition => {}
        }
        Ok(())
    }

    fn remove_hook(&mut self, window: WindowId, purpose: HookPurpose) {
        match purpose {
            HookPurpose::DialogKeys => {
                self.key_hooks.remove(&window);
            }
            HookPurpose::ContentKeys => {
                with_route(window.0, |route| route.content_keys = false);
            }
            HookPurpose::OwnerPosition | HookPurpose::DialogPosition => {}
        }
    }

    fn begin_drag(&mut self, window: WindowId) {
        if let Some(native) = self.windows.get(&window) {
            if let Err(e) = native.drag_window() {
                debug!(event = "shell.window.drag_failed", window = window.0, error = %e);
            }
        }
    }

    fn destroy(&mut self, window: WindowId) {
        if let Some(native) = self.windows.remove(&window) {
            self.window_id_map.remove(&native.id());
            self.owners.remove(&window);
            self.key_hooks.remove(&window);
            // Dropping the tao window closes it.
            drop(native);
        }
        PENDING_EVENTS.with(|p| p.borrow_mut().retain(|e| e.window() != window));
    }

    /// Pump the tao event loop (non-blocking) and collect what the window
    /// and webview callbacks observed.
    fn pump(&mut self) -> Vec<NativeEvent> {
        EVENT_LOOP.with(|el| {
            let mut event_loop_opt = el.borrow_mut().take();
            if let Some(ref mut event_loop) = event_loop_opt {
                let window_id_map = &self.window_id_map;
                let windows = &self.windows;
                let key_hooks = &self.key_hooks;

                event_loop.run_return(|event, _target, control_flow| {
                    // Ensure non-blocking from the start, regardless of any
                    // stale ControlFlow persisted in tao's global Handler.
                    *control_flow = ControlFlow::Poll;

                    match event {
                        Event::WindowEvent {
                            window_id,
                            event: ref win_event,
                            ..
                        } => {
                            let Some(&id) = window_id_map.get(&window_id) else {
                                return;
                            };
                            let scale = windows
                                .get(&id)
                                .map(|w| w.scale_factor())
                                .unwrap_or(1.0);
                            match win_event {
                                WindowEvent::Resized(size) => {
                                    let logical: LogicalSize<f64> = size.to_logical(scale);
                                    capped_push!(
                                        PENDING_EVENTS,
                                        NativeEvent::Resized {
                                            window: id,
                                            size: Size::new(
                                                logical.width.round() as i32,
                                                logical.height.round() as i32
                                            ),
                                        }
                                    );
                                }
                                WindowEvent::Moved(pos) => {
                                    let logical: LogicalPosition<f64> = pos.to_logical(scale);
                                    capped_push!(
                                        PENDING_EVENTS,
                                        NativeEvent::Moved {
                                            window: id,
                                            position: Point::new(
                                                logical.x.round() as i32,
                                                logical.y.round() as i32
                                            ),
                                        }
                                    );
                                }
                                WindowEvent::Focused(focused) => {
                                    capped_push!(
                                        PENDING_EVENTS,
                                        NativeEvent::Focused {
                                            window: id,
                                            focused: *focused,
                                        }
                                    );
                                }
                                WindowEvent::CloseRequested => {
                                    capped_push!(
                                        PENDING_EVENTS,
                                        NativeEvent::CloseRequested { window: id }
                                    );
                                }
                                WindowEvent::KeyboardInput { event, .. }
                                    if event.state == ElementState::Pressed
                                        && event.physical_key == KeyCode::Escape
                                        && key_hooks.contains(&id) =>
                                {
                                    capped_push!(
                                        PENDING_EVENTS,
                                        NativeEvent::KeyDown {
                                            window: id,
                                            key: Key::Escape,
                                            origin: KeyOrigin::Window,
                                        }
                                    );
                                }
                                _ => {}
                            }
                        }
                        Event::MainEventsCleared => {
                            *control_flow = ControlFlow::Exit;
                        }
                        _ => {}
                    }
                });
            }
            // Put the event loop back
            *el.borrow_mut() = event_loop_opt;
        });

        take_pending_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_push_drops_past_cap_and_rearms_on_drain() {
        MAX_PENDING_EVENTS.with(|c| c.set(2));
        let close = |id| NativeEvent::CloseRequested {
            window: WindowId(id),
        };

        capped_push!(PENDING_EVENTS, close(1));
        capped_push!(PENDING_EVENTS, close(2));
        assert!(!PENDING_OVERFLOWED.with(|o| o.get()));
        capped_push!(PENDING_EVENTS, close(3));
        capped_push!(PENDING_EVENTS, close(4));
        assert!(PENDING_OVERFLOWED.with(|o| o.get()));

        assert_eq!(take_pending_events(), vec![close(1), close(2)]);
        assert!(!PENDING_OVERFLOWED.with(|o| o.get()));
        capped_push!(PENDING_EVENTS, close(5));
        assert_eq!(take_pending_events(), vec![close(5)]);
        MAX_PENDING_EVENTS.with(|c| c.set(10_000));
    }

    #[test]
    fn test_canonical_request_uri_maps_https_alias() {
        assert_eq!(
            canonical_request_uri("app", "https://app.localhost/index.html"),
            "app://localhost/index.html"
        );
        assert_eq!(
            canonical_request_uri("app", "app://localhost/index.html"),
            "app://localhost/index.html"
        );
    }
}
