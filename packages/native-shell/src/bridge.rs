//! Host ↔ renderer bridge.
//!
//! The bridge owns one renderer instance together with everything that
//! points into it: the content router the scheme interceptor reads, the
//! message pipeline fed by the renderer's IPC channel, and the readiness
//! latch. Teardown happens in a fixed order so no callback can reach a
//! freed renderer.

use std::sync::Arc;

use futures::channel::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};
use url::Url;

use crate::content::ContentProvider;
use crate::error::ShellError;
use crate::events::InboundMessage;
use crate::ready::ReadyLatch;
use crate::scheme::{ContentRouter, SchemeInterceptor, ServeError, ServedContent};
use crate::window_manager::WindowId;

/// Script-side function that receives host messages.
pub const DISPATCH_FUNCTION: &str = "window.__dispatchMessageCallback";

/// Height of the band at the top of the content that drags the window.
pub const DRAG_REGION_HEIGHT: u32 = 28;

/// Renderer-specific primitives the bridge drives.
///
/// All calls happen on the UI thread.
pub trait Renderer {
    fn load_url(&mut self, url: &str) -> Result<(), ShellError>;
    fn evaluate_script(&mut self, script: &str) -> Result<(), ShellError>;
    /// Remove IPC handlers that route into this renderer's window.
    fn detach_message_channels(&mut self);
    /// Stop handing scheme loads to this renderer's interceptor.
    fn detach_scheme(&mut self);
    /// Stop loading and destroy the engine instance.
    fn shutdown(&mut self);
}

/// Consumer of general-channel messages.
pub trait MessagePipeline {
    fn message_received(&mut self, source: &Url, payload: &str);
}

impl<F> MessagePipeline for F
where
    F: FnMut(&Url, &str),
{
    fn message_received(&mut self, source: &Url, payload: &str) {
        self(source, payload)
    }
}

/// Pipeline that forwards every message onto an unbounded channel.
pub struct ChannelPipeline {
    window: WindowId,
    tx: UnboundedSender<InboundMessage>,
}

impl ChannelPipeline {
    pub fn new(window: WindowId, tx: UnboundedSender<InboundMessage>) -> Self {
        Self { window, tx }
    }
}

impl MessagePipeline for ChannelPipeline {
    fn message_received(&mut self, source: &Url, payload: &str) {
        let message = InboundMessage {
            window: self.window,
            source: source.to_string(),
            payload: payload.to_string(),
        };
        if self.tx.unbounded_send(message).is_err() {
            trace!(event = "shell.bridge.pipeline_closed", window = self.window.0);
        }
    }
}

/// Teardown steps, in the order [`Bridge::dispose`] runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalStep {
    MarkUnavailable,
    DetachChannels,
    DetachScheme,
    ReleaseContent,
    ShutdownRenderer,
}

pub struct Bridge<R: Renderer> {
    window: WindowId,
    base: Url,
    renderer: Option<R>,
    router: Option<Arc<ContentRouter>>,
    provider: Option<Arc<dyn ContentProvider>>,
    pipeline: Option<Box<dyn MessagePipeline>>,
    ready: ReadyLatch,
    channels_attached: bool,
    scheme_attached: bool,
}

impl<R: Renderer> Bridge<R> {
    pub fn new(
        window: WindowId,
        router: Arc<ContentRouter>,
        provider: Arc<dyn ContentProvider>,
        pipeline: Box<dyn MessagePipeline>,
    ) -> Self {
        Self {
            window,
            base: router.base_url().clone(),
            renderer: None,
            router: Some(router),
            provider: Some(provider),
            pipeline: Some(pipeline),
            ready: ReadyLatch::new(),
            channels_attached: false,
            scheme_attached: false,
        }
    }

    /// Hand the bridge the renderer whose channels and scheme now point at it.
    pub fn attach_renderer(&mut self, renderer: R) {
        self.renderer = Some(renderer);
        self.channels_attached = true;
        self.scheme_attached = true;
    }

    /// Interceptor for the renderer's scheme handler.
    pub fn interceptor(&self) -> SchemeInterceptor {
        match &self.router {
            Some(router) => SchemeInterceptor::new(router),
            None => SchemeInterceptor::detached(),
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn renderer(&self) -> Option<&R> {
        self.renderer.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.router.is_none() && self.renderer.is_none()
    }

    /// Absolute content URI for an app route such as `/settings`.
    pub fn navigate(&mut self, absolute_uri: &str) {
        let Some(renderer) = self.renderer.as_mut() else {
            debug!(
                event = "shell.bridge.navigate_after_dispose",
                window = self.window.0,
                uri = %absolute_uri
            );
            return;
        };
        debug!(event = "shell.bridge.navigate", window = self.window.0, uri = %absolute_uri);
        if let Err(e) = renderer.load_url(absolute_uri) {
            warn!(
                event = "shell.bridge.navigate_failed",
                window = self.window.0,
                error = %e
            );
        }
    }

    /// Move the loaded app to `route` without reloading the document.
    ///
    /// Routes live inside the app: the scheme only serves real resources,
    /// so loading `scheme://host/route` would be a 404.
    pub fn navigate_route(&mut self, route: &str) {
        let Some(renderer) = self.renderer.as_mut() else {
            debug!(
                event = "shell.bridge.navigate_after_dispose",
                window = self.window.0,
                route = %route
            );
            return;
        };
        debug!(event = "shell.bridge.navigate_route", window = self.window.0, route = %route);
        if let Err(e) = renderer.evaluate_script(&route_script(route)) {
            warn!(
                event = "shell.bridge.navigate_failed",
                window = self.window.0,
                error = %e
            );
        }
    }

    /// Deliver `payload` to the content's dispatch function.
    pub fn send_message(&mut self, payload: &str) {
        let Some(renderer) = self.renderer.as_mut() else {
            debug!(event = "shell.bridge.send_after_dispose", window = self.window.0);
            return;
        };
        trace!(
            event = "shell.bridge.dispatch",
            window = self.window.0,
            len = payload.len()
        );
        if let Err(e) = renderer.evaluate_script(&dispatch_script(payload)) {
            warn!(
                event = "shell.bridge.dispatch_failed",
                window = self.window.0,
                error = %e
            );
        }
    }

    /// Forward a general-channel message, unmodified.
    pub fn receive_message(&mut self, payload: &str) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.message_received(&self.base, payload);
        }
    }

    pub fn try_serve(&self, request_uri: &str) -> Result<ServedContent, ServeError> {
        match &self.router {
            Some(router) => router.try_serve(request_uri),
            None => Err(ServeError {
                status: http::StatusCode::GONE,
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Subscribe a one-shot readiness listener.
    pub fn on_ready(&mut self, listener: impl FnOnce() + 'static) {
        self.ready.subscribe(listener);
    }

    /// Handle a readiness-channel message. `true` on the first latch only.
    pub fn signal_ready(&mut self, payload: &str) -> bool {
        if self.renderer.is_none() {
            return false;
        }
        let latched = self.ready.signal(payload);
        if latched {
            debug!(event = "shell.bridge.ready", window = self.window.0);
        }
        latched
    }

    /// Tear everything down in order. Steps whose resource is already gone
    /// are skipped; the returned list names the steps that ran.
    pub fn dispose(&mut self) -> Vec<DisposalStep> {
        let mut steps = Vec::new();

        if self.router.take().is_some() {
            steps.push(DisposalStep::MarkUnavailable);
        }

        if self.channels_attached || self.pipeline.is_some() {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.detach_message_channels();
            }
            self.pipeline = None;
            self.ready.clear_listeners();
            self.channels_attached = false;
            steps.push(DisposalStep::DetachChannels);
        }

        if self.scheme_attached {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.detach_scheme();
            }
            self.scheme_attached = false;
            steps.push(DisposalStep::DetachScheme);
        }

        if self.provider.take().is_some() {
            steps.push(DisposalStep::ReleaseContent);
        }

        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
            steps.push(DisposalStep::ShutdownRenderer);
        }

        if !steps.is_empty() {
            debug!(
                event = "shell.bridge.disposed",
                window = self.window.0,
                steps = steps.len()
            );
        }
        steps
    }
}

impl<R: Renderer> Drop for Bridge<R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Script that hands `payload` to the content's dispatch function.
pub fn dispatch_script(payload: &str) -> String {
    format!("{}({})", DISPATCH_FUNCTION, json_escape(payload))
}

/// Script that moves the app's history to `route` and notifies routers.
pub fn route_script(route: &str) -> String {
    format!("window.host.navigate({})", json_escape(&absolute_route(route)))
}

/// `route` with exactly one leading slash; empty means `/`.
fn absolute_route(route: &str) -> String {
    format!("/{}", route.trim().trim_start_matches('/'))
}

/// Escape a string for safe embedding as a JSON/JS string literal.
/// The returned string includes surrounding double quotes.
pub fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Line terminators in older JS engines
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Document-start script that wires the content side of the bridge.
///
/// Every renderer-to-host message travels as a JSON envelope over the
/// renderer's single IPC primitive (`window.ipc.postMessage`). The renderer
/// always loads the root document; `start_path` is applied to the history
/// before the app's own scripts run, so client-side routers start there.
pub fn bootstrap_script(enable_drag: bool, start_path: &str) -> String {
    let mut script = format!(
        "(() => {{\n  const startPath = {};\n",
        json_escape(&absolute_route(start_path))
    );
    script.push_str(
        r#"  const post = (channel, payload) => {
    try { window.ipc.postMessage(JSON.stringify({ channel, payload: String(payload) })); } catch { }
  };
  if (!window.external) { window.external = {}; }
  if (!window.__receiveMessageCallbacks) { window.__receiveMessageCallbacks = []; }
  window.external.sendMessage = m => post('message', m);
  window.external.receiveMessage = cb => window.__receiveMessageCallbacks.push(cb);
  window.__dispatchMessageCallback = m => {
    for (const cb of window.__receiveMessageCallbacks) { try { cb(m); } catch { } }
  };
  window.host = window.host || {};
  window.host.notify = m => post('ready', m || 'ready');
  window.host.startPath = startPath;
  window.host.navigate = p => {
    try { history.pushState(history.state, '', p); } catch { return; }
    window.dispatchEvent(new PopStateEvent('popstate', { state: history.state }));
  };
  if (startPath !== '/' && location.pathname === '/') {
    try { history.replaceState(history.state, '', startPath); } catch { }
  }
  window.host.dismiss = reason => post('dismiss', reason || 'close');
  document.addEventListener('keydown', e => {
    if (e.key === 'Escape') { post('key', e.key); }
  });
"#,
    );
    if enable_drag {
        script.push_str(&format!(
            r#"  document.addEventListener('mousedown', e => {{
    if (e.button === 0 && e.clientY <= {}) {{ post('drag', ''); }}
  }});
"#,
            DRAG_REGION_HEIGHT
        ));
    }
    script.push_str("})();");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::EmbeddedContentProvider;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    struct RecordingRenderer {
        log: Rc<RefCell<Log>>,
    }

    impl Renderer for RecordingRenderer {
        fn load_url(&mut self, url: &str) -> Result<(), ShellError> {
            self.log.borrow_mut().calls.push(format!("load:{url}"));
            Ok(())
        }
        fn evaluate_script(&mut self, script: &str) -> Result<(), ShellError> {
            self.log.borrow_mut().calls.push(format!("eval:{script}"));
            Ok(())
        }
        fn detach_message_channels(&mut self) {
            self.log.borrow_mut().calls.push("detach_channels".into());
        }
        fn detach_scheme(&mut self) {
            self.log.borrow_mut().calls.push("detach_scheme".into());
        }
        fn shutdown(&mut self) {
            self.log.borrow_mut().calls.push("shutdown".into());
        }
    }

    fn bridge(log: &Rc<RefCell<Log>>, received: &Rc<RefCell<Vec<String>>>) -> Bridge<RecordingRenderer> {
        let provider: Arc<dyn ContentProvider> =
            Arc::new(EmbeddedContentProvider::new().with("index.html", b"<html/>".to_vec()));
        let router = Arc::new(ContentRouter::new(
            Url::parse("app://localhost/").unwrap(),
            "index.html",
            provider.clone(),
        ));
        let sink = received.clone();
        let mut bridge = Bridge::new(
            WindowId(7),
            router,
            provider,
            Box::new(move |_: &Url, payload: &str| sink.borrow_mut().push(payload.to_string())),
        );
        bridge.attach_renderer(RecordingRenderer { log: log.clone() });
        bridge
    }

    #[test]
    fn test_json_escape_control_and_quotes() {
        assert_eq!(json_escape("a\"b\\c\nd"), r#""a\"b\\c\nd""#);
        assert_eq!(json_escape("\u{1}"), r#""\u0001""#);
    }

    #[test]
    fn test_json_escape_round_trips_through_json_parser() {
        let original = "quote\" back\\ nl\n cr\r tab\t nul\0 ls\u{2028} emoji🙂 </script>";
        let decoded: String = serde_json::from_str(&json_escape(original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_send_message_evaluates_dispatch_call() {
        let log = Rc::new(RefCell::new(Log::default()));
        let received = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = bridge(&log, &received);
        bridge.send_message("hi \"there\"");
        assert_eq!(
            log.borrow().calls,
            vec![r#"eval:window.__dispatchMessageCallback("hi \"there\"")"#.to_string()]
        );
    }

    #[test]
    fn test_receive_message_forwards_verbatim() {
        let log = Rc::new(RefCell::new(Log::default()));
        let received = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = bridge(&log, &received);
        bridge.receive_message("{\"raw\": true}\n");
        assert_eq!(*received.borrow(), vec!["{\"raw\": true}\n".to_string()]);
    }

    #[test]
    fn test_navigate_route_moves_history_in_place() {
        let log = Rc::new(RefCell::new(Log::default()));
        let received = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = bridge(&log, &received);
        bridge.navigate_route("settings/theme");
        bridge.navigate_route("/");
        assert_eq!(
            log.borrow().calls,
            vec![
                "eval:window.host.navigate(\"/settings/theme\")".to_string(),
                "eval:window.host.navigate(\"/\")".to_string(),
            ]
        );
    }

    #[test]
    fn test_dispose_runs_steps_in_order_once() {
        let log = Rc::new(RefCell::new(Log::default()));
        let received = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = bridge(&log, &received);
        let interceptor = bridge.interceptor();

        let steps = bridge.dispose();
        assert_eq!(
            steps,
            vec![
                DisposalStep::MarkUnavailable,
                DisposalStep::DetachChannels,
                DisposalStep::DetachScheme,
                DisposalStep::ReleaseContent,
                DisposalStep::ShutdownRenderer,
            ]
        );
        assert_eq!(
            log.borrow().calls,
            vec!["detach_channels", "detach_scheme", "shutdown"]
        );
        assert!(bridge.is_disposed());
        assert!(bridge.dispose().is_empty());
        assert_eq!(
            interceptor.handle("app://localhost/").status(),
            http::StatusCode::GONE
        );
    }

    #[test]
    fn test_calls_after_dispose_are_noops() {
        let log = Rc::new(RefCell::new(Log::default()));
        let received = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = bridge(&log, &received);
        bridge.dispose();
        let before = log.borrow().calls.len();

        bridge.navigate("app://localhost/");
        bridge.send_message("late");
        bridge.receive_message("late");
        assert!(!bridge.signal_ready("ready"));
        assert_eq!(log.borrow().calls.len(), before);
        assert!(received.borrow().is_empty());
        assert_eq!(
            bridge.try_serve("app://localhost/index.html").unwrap_err().status,
            http::StatusCode::GONE
        );
    }

    #[test]
    fn test_ready_notifies_once() {
        let log = Rc::new(RefCell::new(Log::default()));
        let received = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = bridge(&log, &received);
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        bridge.on_ready(move || *c.borrow_mut() += 1);

        assert!(bridge.signal_ready("Ready"));
        assert!(!bridge.signal_ready("ready"));
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_channel_pipeline_tags_window() {
        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        let mut pipeline = ChannelPipeline::new(WindowId(3), tx);
        pipeline.message_received(&Url::parse("app://localhost/").unwrap(), "ping");
        let message = rx.try_next().unwrap().unwrap();
        assert_eq!(message.window, WindowId(3));
        assert_eq!(message.source, "app://localhost/");
        assert_eq!(message.payload, "ping");
    }

    #[test]
    fn test_bootstrap_script_drag_band() {
        assert!(bootstrap_script(true, "/").contains("post('drag'"));
        assert!(!bootstrap_script(false, "/").contains("post('drag'"));
        assert!(bootstrap_script(false, "/").contains("__dispatchMessageCallback"));
    }

    #[test]
    fn test_bootstrap_script_carries_start_path() {
        let script = bootstrap_script(false, "settings\"x");
        assert!(script.starts_with("(() => {\n  const startPath = \"/settings\\\"x\";\n  const post"));
        assert!(script.contains("history.replaceState(history.state, '', startPath)"));
        assert!(script.ends_with("})();"));
    }

    #[test]
    fn test_bootstrap_notify_without_argument_sends_ready() {
        let script = bootstrap_script(false, "/");
        assert!(script.contains("window.host.notify = m => post('ready', m || 'ready');"));
    }
}
