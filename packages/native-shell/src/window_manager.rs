//! Window and dialog lifecycle.
//!
//! [`LifecycleManager`] lives on the UI thread and owns every native window,
//! its renderer bridge, and the hooks installed for it. Other threads talk to
//! it through a [`ShellHandle`], whose commands are executed on the next
//! [`LifecycleManager::pump`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::channel::{mpsc as fmpsc, oneshot};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::bridge::{bootstrap_script, Bridge, ChannelPipeline, MessagePipeline};
use crate::content::ContentProvider;
use crate::error::ShellError;
use crate::events::{Channel, EventDisposition, InboundMessage, Key, KeyOrigin, NativeEvent};
use crate::geometry::{Point, Rect, Size};
use crate::hooks::{HookPurpose, HookRegistry, SubclassRegistration};
use crate::options::{DialogPolicy, DialogSpec, ShellConfig, WindowSpec};
use crate::platform::{RendererSetup, WindowBackend};
use crate::scheme::ContentRouter;

/// Stable identifier of a managed window or dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Native handle allocated, no content attached.
    Created,
    /// Size, chrome, owner and position being applied. Dialogs wait here,
    /// hidden, for the readiness handshake.
    Configuring,
    Shown,
    /// The one dialog that receives escape and recenter callbacks.
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    Programmatic,
    UserChrome,
    Escape,
    Backdrop,
    /// Content asked to close itself.
    ContentRequest,
    OwnerClosed,
}

/// How a dialog ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogOutcome {
    pub window: WindowId,
    pub reason: CloseReason,
    /// Whether the content completed its readiness handshake.
    pub was_ready: bool,
}

/// Pending result of a marshaled operation.
///
/// Resolves to `Err(ShellStopped)` if the manager goes away first.
#[must_use = "completions do nothing unless awaited or polled"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, ShellError>>,
}

impl<T> Completion<T> {
    fn channel() -> (oneshot::Sender<Result<T, ShellError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Non-blocking check. `None` while still pending.
    pub fn try_take(&mut self) -> Option<Result<T, ShellError>> {
        match self.rx.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(_) => Some(Err(ShellError::ShellStopped)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, ShellError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ShellError::ShellStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

type Done<T> = oneshot::Sender<Result<T, ShellError>>;

/// Operations marshaled onto the UI thread.
pub enum Command {
    OpenWindow {
        spec: WindowSpec,
        done: Done<WindowId>,
    },
    OpenDialog {
        spec: DialogSpec,
        done: Done<DialogOutcome>,
    },
    CloseActiveDialog {
        done: Done<bool>,
    },
    CloseWindow {
        window: WindowId,
        done: Done<bool>,
    },
    Navigate {
        window: WindowId,
        route: String,
    },
    PostMessage {
        window: WindowId,
        payload: String,
    },
}

/// Cloneable, `Send` entry point to a [`LifecycleManager`].
#[derive(Clone)]
pub struct ShellHandle {
    tx: Sender<Command>,
}

impl ShellHandle {
    /// Resolves once the window is visible.
    pub fn open_window(&self, spec: WindowSpec) -> Completion<WindowId> {
        let (done, completion) = Completion::channel();
        self.send(Command::OpenWindow { spec, done });
        completion
    }

    /// Resolves when the dialog is torn down.
    pub fn open_dialog(&self, spec: DialogSpec) -> Completion<DialogOutcome> {
        let (done, completion) = Completion::channel();
        self.send(Command::OpenDialog { spec, done });
        completion
    }

    /// `Ok(false)` if no dialog was open.
    pub fn close_active_dialog(&self) -> Completion<bool> {
        let (done, completion) = Completion::channel();
        self.send(Command::CloseActiveDialog { done });
        completion
    }

    pub fn close_window(&self, window: WindowId) -> Completion<bool> {
        let (done, completion) = Completion::channel();
        self.send(Command::CloseWindow { window, done });
        completion
    }

    /// Move `window` to an app route such as `/settings`. An absolute URI
    /// is loaded as a new document instead.
    pub fn navigate(&self, window: WindowId, route: impl Into<String>) {
        self.send(Command::Navigate {
            window,
            route: route.into(),
        });
    }

    pub fn post_message(&self, window: WindowId, payload: impl Into<String>) {
        self.send(Command::PostMessage {
            window,
            payload: payload.into(),
        });
    }

    fn send(&self, command: Command) {
        // A closed queue drops the command and its sender, which resolves
        // the completion with `ShellStopped`.
        if self.tx.send(command).is_err() {
            debug!(event = "shell.handle.send_after_stop");
        }
    }
}

type PipelineFactory = Box<dyn Fn(WindowId) -> Box<dyn MessagePipeline>>;

enum EntryKind {
    Window,
    Dialog {
        spec: DialogSpec,
        done: Option<Done<DialogOutcome>>,
    },
}

struct Entry<B: WindowBackend> {
    kind: EntryKind,
    spec: WindowSpec,
    size: Size,
    state: LifecycleState,
    bridge: Bridge<B::Renderer>,
    owner: Option<WindowId>,
    hooks: Vec<SubclassRegistration>,
    generation: u64,
}

impl<B: WindowBackend> Entry<B> {
    fn is_dialog(&self) -> bool {
        matches!(self.kind, EntryKind::Dialog { .. })
    }

    fn dialog_spec(&self) -> Option<&DialogSpec> {
        match &self.kind {
            EntryKind::Dialog { spec, .. } => Some(spec),
            EntryKind::Window => None,
        }
    }
}

/// Scheduled fallback show for a readiness-gated dialog.
#[derive(Debug, Clone, Copy)]
struct ShowTimer {
    window: WindowId,
    generation: u64,
    deadline: Instant,
}

/// Maximum commands queued before a warning is logged.
/// Commands are still accepted to avoid silently dropping operations.
const MAX_COMMAND_QUEUE: usize = 10_000;

/// Owns every window and dialog and runs their state machines.
pub struct LifecycleManager<B: WindowBackend> {
    backend: B,
    config: ShellConfig,
    base: Url,
    provider: Arc<dyn ContentProvider>,
    pipelines: PipelineFactory,
    inbound: Option<fmpsc::UnboundedReceiver<InboundMessage>>,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    entries: HashMap<WindowId, Entry<B>>,
    hooks: HookRegistry,
    next_id: u32,
    next_generation: u64,
    /// The dialog currently open, in any state before `Closed`.
    dialog: Option<WindowId>,
    queued_dialogs: VecDeque<(DialogSpec, Done<DialogOutcome>)>,
    timers: Vec<ShowTimer>,
    /// Top-level windows, least recently activated first.
    activation_order: Vec<WindowId>,
    recentering: bool,
    recenter_count: u64,
}

impl<B: WindowBackend> LifecycleManager<B> {
    pub fn new(
        backend: B,
        config: ShellConfig,
        provider: Arc<dyn ContentProvider>,
    ) -> Result<Self, ShellError> {
        let base = config.base_url()?;
        let (tx, rx) = mpsc::channel();
        let (inbound_tx, inbound_rx) = fmpsc::unbounded();
        Ok(Self {
            backend,
            config,
            base,
            provider,
            pipelines: Box::new(move |window| -> Box<dyn MessagePipeline> {
                Box::new(ChannelPipeline::new(window, inbound_tx.clone()))
            }),
            inbound: Some(inbound_rx),
            tx,
            rx,
            entries: HashMap::new(),
            hooks: HookRegistry::new(),
            next_id: 1,
            next_generation: 1,
            dialog: None,
            queued_dialogs: VecDeque::new(),
            timers: Vec::new(),
            activation_order: Vec::new(),
            recentering: false,
            recenter_count: 0,
        })
    }

    /// Route general-channel messages through `factory` instead of the
    /// built-in channel. Affects windows opened afterwards.
    pub fn with_pipeline_factory(
        mut self,
        factory: impl Fn(WindowId) -> Box<dyn MessagePipeline> + 'static,
    ) -> Self {
        self.pipelines = Box::new(factory);
        self.inbound = None;
        self
    }

    pub fn handle(&self) -> ShellHandle {
        ShellHandle {
            tx: self.tx.clone(),
        }
    }

    /// Receiver for general-channel messages from every window. Available
    /// once, and only with the built-in pipeline.
    pub fn take_inbound(&mut self) -> Option<fmpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound.take()
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// `Closed` for any id this manager handed out that is gone again.
    pub fn state(&self, window: WindowId) -> Option<LifecycleState> {
        match self.entries.get(&window) {
            Some(entry) => Some(entry.state),
            None if window.0 != 0 && window.0 < self.next_id => Some(LifecycleState::Closed),
            None => None,
        }
    }

    /// The dialog in `Active` state, if any.
    pub fn active_dialog(&self) -> Option<WindowId> {
        self.dialog
            .filter(|id| self.state(*id) == Some(LifecycleState::Active))
    }

    /// The open dialog in any state before `Closed`, including one still
    /// waiting for readiness.
    pub fn current_dialog(&self) -> Option<WindowId> {
        self.dialog
    }

    pub fn owner_of(&self, dialog: WindowId) -> Option<WindowId> {
        self.entries.get(&dialog).and_then(|e| e.owner)
    }

    /// Most recently focused or shown top-level window still open.
    pub fn last_active_window(&self) -> Option<WindowId> {
        self.activation_order.last().copied()
    }

    pub fn is_ready(&self, window: WindowId) -> bool {
        self.entries
            .get(&window)
            .map(|e| e.bridge.is_ready())
            .unwrap_or(false)
    }

    /// Run `listener` once when `window`'s content signals readiness.
    /// Returns `false` if the window is unknown.
    pub fn on_ready(&mut self, window: WindowId, listener: impl FnOnce() + 'static) -> bool {
        match self.entries.get_mut(&window) {
            Some(entry) => {
                entry.bridge.on_ready(listener);
                true
            }
            None => false,
        }
    }

    pub fn window_count(&self) -> usize {
        self.entries.len()
    }

    pub fn queued_dialog_count(&self) -> usize {
        self.queued_dialogs.len()
    }

    /// Recenter operations performed so far.
    pub fn recenter_count(&self) -> u64 {
        self.recenter_count
    }

    // ── Public UI-thread API ───────────────────────────────────

    pub fn open_window(&mut self, spec: WindowSpec) -> Completion<WindowId> {
        let (done, completion) = Completion::channel();
        self.execute(Command::OpenWindow { spec, done });
        completion
    }

    pub fn open_dialog(&mut self, spec: DialogSpec) -> Completion<DialogOutcome> {
        let (done, completion) = Completion::channel();
        self.execute(Command::OpenDialog { spec, done });
        completion
    }

    pub fn close_active_dialog(&mut self) -> Completion<bool> {
        let (done, completion) = Completion::channel();
        self.execute(Command::CloseActiveDialog { done });
        completion
    }

    pub fn close_window(&mut self, window: WindowId) -> Completion<bool> {
        let (done, completion) = Completion::channel();
        self.execute(Command::CloseWindow { window, done });
        completion
    }

    /// See [`ShellHandle::navigate`].
    pub fn navigate(&mut self, window: WindowId, route: &str) {
        self.execute(Command::Navigate {
            window,
            route: route.to_string(),
        });
    }

    pub fn post_message(&mut self, window: WindowId, payload: &str) {
        self.execute(Command::PostMessage {
            window,
            payload: payload.to_string(),
        });
    }

    // ── Pump ───────────────────────────────────────────────────

    /// Drain marshaled commands, dispatch native events and fire due
    /// fallback timers.
    pub fn pump(&mut self) {
        self.pump_at(Instant::now());
    }

    /// [`pump`](Self::pump) with an explicit clock.
    pub fn pump_at(&mut self, now: Instant) {
        let mut drained = 0usize;
        loop {
            match self.rx.try_recv() {
                Ok(command) => {
                    drained += 1;
                    if drained == MAX_COMMAND_QUEUE {
                        warn!(
                            event = "shell.pump.command_backlog",
                            limit = MAX_COMMAND_QUEUE
                        );
                    }
                    self.execute(command);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        for event in self.backend.pump() {
            self.handle_event(event);
        }

        self.fire_timers(now);
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::OpenWindow { spec, done } => {
                let result = self.open_window_now(spec);
                let _ = done.send(result);
            }
            Command::OpenDialog { spec, done } => self.request_dialog(spec, done),
            Command::CloseActiveDialog { done } => {
                let closed = match self.dialog {
                    Some(id) => self.close_dialog(id, CloseReason::Programmatic),
                    None => false,
                };
                let _ = done.send(Ok(closed));
            }
            Command::CloseWindow { window, done } => {
                let closed = self.close_any(window, CloseReason::Programmatic);
                let _ = done.send(Ok(closed));
            }
            Command::Navigate { window, route } => {
                let Some(entry) = self.entries.get_mut(&window) else {
                    debug!(event = "shell.navigate.unknown_window", window = window.0);
                    return;
                };
                match Url::parse(&route) {
                    Ok(url) => entry.bridge.navigate(url.as_str()),
                    Err(_) => entry.bridge.navigate_route(&route),
                }
            }
            Command::PostMessage { window, payload } => {
                if let Some(entry) = self.entries.get_mut(&window) {
                    entry.bridge.send_message(&payload);
                }
            }
        }
    }

    // ── Open ───────────────────────────────────────────────────

    /// Ids are never reused once a window has existed under them.
    fn allocate_id(&mut self) -> Result<WindowId, ShellError> {
        let id = WindowId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| ShellError::HandleCreation {
                message: "window id space exhausted (u32 overflow)".to_string(),
            })?;
        Ok(id)
    }

    /// Return the most recent id when its window never came to exist.
    fn release_id(&mut self, id: WindowId) {
        if id.0.checked_add(1) == Some(self.next_id) {
            self.next_id = id.0;
        }
    }

    fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Allocate the native window and its renderer. Nothing is left behind
    /// on failure.
    fn create_native(
        &mut self,
        id: WindowId,
        spec: &WindowSpec,
        size: Size,
    ) -> Result<Bridge<B::Renderer>, ShellError> {
        if let Err(e) = self.backend.create_window(id, spec, size) {
            self.release_id(id);
            return Err(e);
        }

        let router = Arc::new(ContentRouter::new(
            self.base.clone(),
            self.config.root_document.clone(),
            self.provider.clone(),
        ));
        let mut bridge = Bridge::new(id, router, self.provider.clone(), (self.pipelines)(id));

        // Always the root document; the route is applied inside the app.
        let setup = RendererSetup {
            initial_url: self.base.clone(),
            scheme: self.config.scheme.clone(),
            interceptor: bridge.interceptor(),
            bootstrap_script: bootstrap_script(spec.enable_drag, spec.route()),
            devtools: self.config.devtools,
        };
        let renderer = self.backend.create_renderer(id, setup);
        match renderer {
            Ok(renderer) => {
                bridge.attach_renderer(renderer);
                Ok(bridge)
            }
            Err(e) => {
                bridge.dispose();
                self.backend.destroy(id);
                self.release_id(id);
                Err(e)
            }
        }
    }

    fn apply_cosmetics(&mut self, id: WindowId, spec: &WindowSpec) {
        if let Err(e) = self.backend.apply_cosmetics(id, spec) {
            warn!(
                event = "shell.window.cosmetic_failed",
                window = id.0,
                error = %e
            );
        }
    }

    fn open_window_now(&mut self, spec: WindowSpec) -> Result<WindowId, ShellError> {
        let id = self.allocate_id()?;
        let size = spec.clamped_size();
        let bridge = self.create_native(id, &spec, size).map_err(|e| {
            warn!(event = "shell.window.open_failed", window = id.0, error = %e);
            e
        })?;

        self.entries.insert(
            id,
            Entry {
                kind: EntryKind::Window,
                spec: spec.clone(),
                size,
                state: LifecycleState::Created,
                bridge,
                owner: None,
                hooks: Vec::new(),
                generation: 0,
            },
        );
        self.set_state(id, LifecycleState::Configuring);

        self.apply_cosmetics(id, &spec);
        let position = self.backend.work_area(None).centered_origin(size);
        self.backend.set_position(id, position);

        self.backend.set_visible(id, true);
        self.backend.focus(id);
        self.set_state(id, LifecycleState::Shown);
        self.touch_activation(id);

        info!(
            event = "shell.window.opened",
            window = id.0,
            width = size.width,
            height = size.height,
            x = position.x,
            y = position.y
        );
        Ok(id)
    }

    fn request_dialog(&mut self, spec: DialogSpec, done: Done<DialogOutcome>) {
        if self.dialog.is_some() {
            match self.config.dialog_policy {
                DialogPolicy::Queue => {
                    debug!(
                        event = "shell.dialog.queued",
                        pending = self.queued_dialogs.len() + 1
                    );
                    self.queued_dialogs.push_back((spec, done));
                }
                DialogPolicy::Reject => {
                    debug!(event = "shell.dialog.rejected");
                    let _ = done.send(Err(ShellError::DialogBusy));
                }
            }
            return;
        }
        self.open_dialog_now(spec, done);
    }

    fn open_dialog_now(&mut self, spec: DialogSpec, done: Done<DialogOutcome>) {
        let id = match self.allocate_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(event = "shell.dialog.open_failed", error = %e);
                let _ = done.send(Err(e));
                return;
            }
        };
        let window_spec = spec.window_spec();
        let size = spec.clamped_size();
        let owner = self.last_active_window();

        let bridge = match self.create_native(id, &window_spec, size) {
            Ok(bridge) => bridge,
            Err(e) => {
                warn!(event = "shell.dialog.open_failed", window = id.0, error = %e);
                let _ = done.send(Err(e));
                self.open_next_queued();
                return;
            }
        };

        let generation = self.next_generation();
        self.entries.insert(
            id,
            Entry {
                kind: EntryKind::Dialog {
                    spec,
                    done: Some(done),
                },
                spec: window_spec.clone(),
                size,
                state: LifecycleState::Created,
                bridge,
                owner,
                hooks: Vec::new(),
                generation,
            },
        );
        self.dialog = Some(id);
        self.set_state(id, LifecycleState::Configuring);

        self.apply_cosmetics(id, &window_spec);
        self.backend.set_owner(id, owner);
        let position = self.centered_position(id);
        self.backend.set_position(id, position);

        self.timers.push(ShowTimer {
            window: id,
            generation,
            deadline: Instant::now() + self.config.ready_fallback(),
        });

        debug!(
            event = "shell.dialog.configured",
            window = id.0,
            owner = owner.map(|o| o.0),
            x = position.x,
            y = position.y
        );
    }

    fn open_next_queued(&mut self) {
        if self.dialog.is_some() {
            return;
        }
        if let Some((spec, done)) = self.queued_dialogs.pop_front() {
            self.open_dialog_now(spec, done);
        }
    }

    /// Make a configured dialog visible and install its hooks. Runs once per
    /// dialog, triggered by readiness or by the fallback timer.
    fn show_dialog(&mut self, id: WindowId, trigger: &'static str) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.state != LifecycleState::Configuring {
            return;
        }
        // Invalidate the fallback timer.
        entry.generation = 0;
        let owner = entry.owner;
        let escape = entry.spec.dismiss_with_escape;

        // The owner may have moved while the dialog was hidden.
        let position = self.centered_position(id);
        self.backend.set_position(id, position);
        self.backend.set_visible(id, true);
        self.backend.focus(id);
        self.set_state(id, LifecycleState::Shown);

        if let Some(owner) = owner {
            self.install_hook(id, owner, HookPurpose::OwnerPosition);
        }
        self.install_hook(id, id, HookPurpose::DialogPosition);
        if escape {
            self.install_hook(id, id, HookPurpose::DialogKeys);
            self.install_hook(id, id, HookPurpose::ContentKeys);
        }
        self.set_state(id, LifecycleState::Active);

        info!(
            event = "shell.dialog.shown",
            window = id.0,
            trigger = trigger,
            x = position.x,
            y = position.y
        );
    }

    /// Install a hook on `target` on behalf of `holder`.
    fn install_hook(&mut self, holder: WindowId, target: WindowId, purpose: HookPurpose) {
        let Some(registration) = self.hooks.register(target, purpose) else {
            return;
        };
        if let Err(e) = self.backend.install_hook(target, purpose) {
            warn!(
                event = "shell.hook.install_failed",
                window = target.0,
                purpose = purpose.as_str(),
                error = %e
            );
            self.hooks.release(&registration);
            return;
        }
        trace!(
            event = "shell.hook.installed",
            window = target.0,
            purpose = purpose.as_str()
        );
        if let Some(entry) = self.entries.get_mut(&holder) {
            entry.hooks.push(registration);
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        let (due, pending): (Vec<ShowTimer>, Vec<ShowTimer>) =
            self.timers.drain(..).partition(|t| t.deadline <= now);
        self.timers = pending;
        for timer in due {
            let current = self
                .entries
                .get(&timer.window)
                .map(|e| e.generation == timer.generation && e.state == LifecycleState::Configuring)
                .unwrap_or(false);
            if current {
                debug!(event = "shell.dialog.ready_fallback", window = timer.window.0);
                self.show_dialog(timer.window, "fallback");
            } else {
                trace!(event = "shell.dialog.stale_timer", window = timer.window.0);
            }
        }
    }

    /// Time until the earliest fallback timer fires, for callers driving
    /// their own wait.
    pub fn next_timer_in(&self, now: Instant) -> Option<Duration> {
        self.timers
            .iter()
            .map(|t| t.deadline.saturating_duration_since(now))
            .min()
    }

    // ── Geometry ───────────────────────────────────────────────

    /// Where `dialog` belongs: centered over its owner, or over the work
    /// area of its display when there is no owner.
    fn centered_position(&self, dialog: WindowId) -> Point {
        let Some(entry) = self.entries.get(&dialog) else {
            return Point::default();
        };
        let anchor: Rect = entry
            .owner
            .and_then(|owner| self.backend.outer_rect(owner))
            .unwrap_or_else(|| self.backend.work_area(Some(dialog)));
        let size = self
            .backend
            .outer_rect(dialog)
            .map(|r| r.size)
            .unwrap_or(entry.size);
        anchor.centered_origin(size)
    }

    fn recenter(&mut self, dialog: WindowId) {
        if self.recentering {
            return;
        }
        self.recentering = true;
        let target = self.centered_position(dialog);
        self.backend.set_position(dialog, target);
        self.recenter_count += 1;
        self.recentering = false;
        trace!(
            event = "shell.dialog.recenter",
            window = dialog.0,
            x = target.x,
            y = target.y
        );
    }

    // ── Events ─────────────────────────────────────────────────

    /// Dispatch one native event.
    pub fn handle_event(&mut self, event: NativeEvent) -> EventDisposition {
        match event {
            NativeEvent::Moved { window, position } => {
                self.on_geometry_changed(window, Some(position));
                EventDisposition::Forwarded
            }
            NativeEvent::Resized { window, .. } => {
                self.on_geometry_changed(window, None);
                EventDisposition::Forwarded
            }
            NativeEvent::Focused { window, focused } => {
                let is_window = self
                    .entries
                    .get(&window)
                    .map(|e| !e.is_dialog())
                    .unwrap_or(false);
                if focused && is_window {
                    self.touch_activation(window);
                }
                EventDisposition::Forwarded
            }
            NativeEvent::CloseRequested { window } => {
                let Some(entry) = self.entries.get(&window) else {
                    return EventDisposition::Forwarded;
                };
                if !entry.spec.chrome.can_close {
                    debug!(event = "shell.window.close_refused", window = window.0);
                    return EventDisposition::Forwarded;
                }
                self.close_any(window, CloseReason::UserChrome);
                EventDisposition::Consumed
            }
            NativeEvent::KeyDown {
                window,
                key,
                origin,
            } => self.on_key(window, key, origin),
            NativeEvent::Ipc {
                window,
                channel,
                payload,
            } => self.on_ipc(window, channel, &payload),
        }
    }

    fn on_geometry_changed(&mut self, window: WindowId, reported: Option<Point>) {
        let Some(dialog) = self.active_dialog() else {
            return;
        };
        let owner = self.owner_of(dialog);
        if owner == Some(window) && self.hooks.is_installed(window, HookPurpose::OwnerPosition) {
            self.recenter(dialog);
        } else if window == dialog
            && self.hooks.is_installed(dialog, HookPurpose::DialogPosition)
            && !self.recentering
        {
            // A move landing on the centered spot is the echo of our own
            // recenter.
            if reported != Some(self.centered_position(dialog)) {
                self.recenter(dialog);
            }
        }
    }

    fn on_key(&mut self, window: WindowId, key: Key, origin: KeyOrigin) -> EventDisposition {
        if key != Key::Escape || self.active_dialog() != Some(window) {
            return EventDisposition::Forwarded;
        }
        let purpose = match origin {
            KeyOrigin::Window => HookPurpose::DialogKeys,
            KeyOrigin::Content => HookPurpose::ContentKeys,
        };
        let escape = self
            .entries
            .get(&window)
            .map(|e| e.spec.dismiss_with_escape)
            .unwrap_or(false);
        if !escape || !self.hooks.is_installed(window, purpose) {
            return EventDisposition::Forwarded;
        }
        self.close_dialog(window, CloseReason::Escape);
        EventDisposition::Consumed
    }

    fn on_ipc(&mut self, window: WindowId, channel: Channel, payload: &str) -> EventDisposition {
        let Some(entry) = self.entries.get_mut(&window) else {
            return EventDisposition::Forwarded;
        };
        match channel {
            Channel::General => {
                entry.bridge.receive_message(payload);
                EventDisposition::Forwarded
            }
            Channel::Ready => {
                if entry.bridge.signal_ready(payload) && entry.is_dialog() {
                    self.show_dialog(window, "ready");
                }
                EventDisposition::Consumed
            }
            Channel::Dismiss => {
                let Some(spec) = entry.dialog_spec() else {
                    return EventDisposition::Forwarded;
                };
                let reason = match payload.trim() {
                    "backdrop" if spec.backdrop_dismissable => CloseReason::Backdrop,
                    "backdrop" => return EventDisposition::Consumed,
                    _ => CloseReason::ContentRequest,
                };
                self.close_dialog(window, reason);
                EventDisposition::Consumed
            }
            Channel::Drag => {
                if entry.spec.enable_drag {
                    self.backend.begin_drag(window);
                }
                EventDisposition::Consumed
            }
            // Backends translate content key presses into `KeyDown`.
            Channel::Key => EventDisposition::Forwarded,
        }
    }

    fn touch_activation(&mut self, window: WindowId) {
        self.activation_order.retain(|w| *w != window);
        self.activation_order.push(window);
    }

    fn set_state(&mut self, window: WindowId, state: LifecycleState) {
        if let Some(entry) = self.entries.get_mut(&window) {
            trace!(
                event = "shell.lifecycle.transition",
                window = window.0,
                from = ?entry.state,
                to = ?state
            );
            entry.state = state;
        }
    }

    // ── Close ──────────────────────────────────────────────────

    fn close_any(&mut self, window: WindowId, reason: CloseReason) -> bool {
        match self.entries.get(&window).map(|e| e.is_dialog()) {
            Some(true) => self.close_dialog(window, reason),
            Some(false) => self.close_window_now(window, reason),
            None => false,
        }
    }

    /// Release hooks, dispose the bridge, then destroy the native handle.
    /// Returns the removed entry, or `None` if already closing or closed.
    fn teardown(&mut self, id: WindowId) -> Option<Entry<B>> {
        match self.entries.get(&id).map(|e| e.state) {
            None | Some(LifecycleState::Closing) | Some(LifecycleState::Closed) => return None,
            Some(_) => {}
        }
        self.set_state(id, LifecycleState::Closing);
        let mut entry = self.entries.remove(&id)?;

        for registration in entry.hooks.drain(..) {
            if self.hooks.release(&registration) {
                self.backend
                    .remove_hook(registration.window(), registration.purpose());
            }
        }
        entry.owner = None;
        self.timers.retain(|t| t.window != id);
        self.activation_order.retain(|w| *w != id);
        let orphans: Vec<WindowId> = self
            .entries
            .iter_mut()
            .filter(|(_, e)| e.owner == Some(id))
            .map(|(dialog, e)| {
                e.owner = None;
                *dialog
            })
            .collect();
        for dialog in orphans {
            self.backend.set_owner(dialog, None);
        }

        entry.bridge.dispose();
        self.backend.destroy(id);

        entry.state = LifecycleState::Closed;
        Some(entry)
    }

    fn close_dialog(&mut self, id: WindowId, reason: CloseReason) -> bool {
        let was_ready = self.is_ready(id);
        let Some(entry) = self.teardown(id) else {
            return false;
        };
        if self.dialog == Some(id) {
            self.dialog = None;
        }
        if let EntryKind::Dialog {
            done: Some(done), ..
        } = entry.kind
        {
            let _ = done.send(Ok(DialogOutcome {
                window: id,
                reason,
                was_ready,
            }));
        }
        info!(event = "shell.dialog.closed", window = id.0, reason = ?reason);
        self.open_next_queued();
        true
    }

    fn close_window_now(&mut self, id: WindowId, reason: CloseReason) -> bool {
        match self.state(id) {
            None | Some(LifecycleState::Closing) | Some(LifecycleState::Closed) => return false,
            Some(_) => {}
        }
        // No longer eligible as an owner for a dialog the cascade dequeues.
        self.activation_order.retain(|w| *w != id);
        if let Some(dialog) = self.dialog {
            if self.owner_of(dialog) == Some(id) {
                self.close_dialog(dialog, CloseReason::OwnerClosed);
            }
        }
        if self.teardown(id).is_none() {
            return false;
        }
        info!(event = "shell.window.closed", window = id.0, reason = ?reason);
        true
    }
}

impl<B: WindowBackend> Drop for LifecycleManager<B> {
    fn drop(&mut self) {
        // Pending completions resolve with `ShellStopped` as their senders drop.
        self.queued_dialogs.clear();
        let mut ids: Vec<WindowId> = self.entries.keys().copied().collect();
        // Dialogs before their owners.
        ids.sort_by_key(|id| !self.entries.get(id).map(|e| e.is_dialog()).unwrap_or(false));
        for id in ids {
            if let Some(mut entry) = self.teardown(id) {
                if let EntryKind::Dialog { done, .. } = &mut entry.kind {
                    if let Some(done) = done.take() {
                        let _ = done.send(Err(ShellError::ShellStopped));
                    }
                }
            }
        }
    }
}
