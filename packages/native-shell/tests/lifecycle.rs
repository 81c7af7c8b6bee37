use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use futures::executor::block_on;
use native_shell::{
    Channel, CloseReason, DialogSpec, EmbeddedContentProvider, EventDisposition, HeadlessBackend,
    HookPurpose, Key, KeyOrigin, LifecycleManager, LifecycleState, NativeEvent, Point, Rect,
    ShellConfig, ShellError, Size, WindowId, WindowSpec,
};

fn shell() -> LifecycleManager<HeadlessBackend> {
    let content = EmbeddedContentProvider::new()
        .with("index.html", b"<html>shell</html>".to_vec())
        .with("app.css", b"body{}".to_vec());
    LifecycleManager::new(
        HeadlessBackend::new(),
        ShellConfig::default(),
        Arc::new(content),
    )
    .unwrap()
}

fn open_owner_at(shell: &mut LifecycleManager<HeadlessBackend>, origin: Point) -> WindowId {
    let owner = block_on(shell.open_window(WindowSpec::new("/"))).unwrap();
    shell.backend_mut().simulate_move(owner, origin);
    shell.pump();
    owner
}

/// Open a dialog and complete its readiness handshake.
fn open_active_dialog(
    shell: &mut LifecycleManager<HeadlessBackend>,
    spec: DialogSpec,
) -> (WindowId, native_shell::Completion<native_shell::DialogOutcome>) {
    let outcome = shell.open_dialog(spec);
    let dialog = shell.current_dialog().unwrap();
    shell.backend_mut().signal_ready(dialog);
    shell.pump();
    assert_eq!(shell.state(dialog), Some(LifecycleState::Active));
    (dialog, outcome)
}

fn rect_of(shell: &LifecycleManager<HeadlessBackend>, window: WindowId) -> Rect {
    shell.backend().window(window).unwrap().rect
}

#[test]
fn test_window_then_dialog_end_to_end() {
    let mut shell = shell();

    let owner = block_on(shell.open_window(WindowSpec::new("/").with_size(800, 600))).unwrap();
    // Centered on the 1920x1040 primary work area.
    assert_eq!(rect_of(&shell, owner), Rect::new(560, 220, 800, 600));

    shell.backend_mut().simulate_move(owner, Point::new(100, 100));
    shell.pump();

    let _outcome = shell.open_dialog(
        DialogSpec::new("/confirm")
            .with_size(500, 300)
            .with_min_size(Some(400), None),
    );
    let dialog = shell.current_dialog().unwrap();
    assert_eq!(shell.owner_of(dialog), Some(owner));
    assert_eq!(rect_of(&shell, dialog), Rect::new(250, 250, 500, 300));
    assert_eq!(shell.backend().window(dialog).unwrap().owner, Some(owner));
}

#[test]
fn test_inconsistent_bounds_use_min_width() {
    let mut shell = shell();
    let _outcome = shell.open_dialog(
        DialogSpec::new("/")
            .with_size(300, 200)
            .with_min_size(Some(700), None)
            .with_max_size(Some(600), Some(150)),
    );
    let dialog = shell.current_dialog().unwrap();
    assert_eq!(rect_of(&shell, dialog).size, Size::new(700, 150));
}

#[test]
fn test_dialog_without_owner_centers_on_work_area() {
    let mut shell = shell();
    let _outcome = shell.open_dialog(DialogSpec::new("/").with_size(501, 301));
    let dialog = shell.current_dialog().unwrap();
    assert_eq!(shell.owner_of(dialog), None);
    assert_eq!(rect_of(&shell, dialog).origin, Point::new(709, 369));
}

#[test]
fn test_owner_move_and_resize_recenter_dialog() {
    let mut shell = shell();
    let owner = open_owner_at(&mut shell, Point::new(100, 100));
    let (dialog, _outcome) =
        open_active_dialog(&mut shell, DialogSpec::new("/").with_size(500, 300));

    shell.backend_mut().simulate_move(owner, Point::new(300, 180));
    shell.pump();
    assert_eq!(rect_of(&shell, dialog), Rect::new(450, 330, 500, 300));

    shell.backend_mut().simulate_resize(owner, Size::new(1000, 700));
    shell.pump();
    assert_eq!(rect_of(&shell, dialog), Rect::new(550, 380, 500, 300));
    assert_eq!(shell.recenter_count(), 2);
}

#[test]
fn test_dialog_self_move_recenters_once_per_event() {
    let mut shell = shell();
    let _owner = open_owner_at(&mut shell, Point::new(100, 100));
    let (dialog, _outcome) =
        open_active_dialog(&mut shell, DialogSpec::new("/").with_size(500, 300));
    assert_eq!(shell.recenter_count(), 0);

    for nudge in [Point::new(400, 10), Point::new(0, 0), Point::new(260, 251)] {
        shell.backend_mut().simulate_move(dialog, nudge);
    }
    shell.pump();
    assert_eq!(shell.recenter_count(), 3);
    assert_eq!(rect_of(&shell, dialog), Rect::new(250, 250, 500, 300));

    // The OS echoing our own recenter is not another nudge.
    shell
        .backend_mut()
        .simulate_move(dialog, Point::new(250, 250));
    shell.pump();
    assert_eq!(shell.recenter_count(), 3);
}

#[test]
fn test_ready_twice_notifies_once() {
    let mut shell = shell();
    let _outcome = shell.open_dialog(DialogSpec::new("/"));
    let dialog = shell.current_dialog().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    assert!(shell.on_ready(dialog, move || counter.set(counter.get() + 1)));

    shell.backend_mut().signal_ready(dialog);
    shell.backend_mut().post_channel(dialog, Channel::Ready, " READY ");
    shell.pump();

    assert_eq!(fired.get(), 1);
    assert!(shell.is_ready(dialog));
    assert_eq!(shell.state(dialog), Some(LifecycleState::Active));
}

#[test]
fn test_close_before_ready_resolves_open() {
    let mut shell = shell();
    let outcome = shell.open_dialog(DialogSpec::new("/slow"));
    let dialog = shell.current_dialog().unwrap();
    assert_eq!(shell.state(dialog), Some(LifecycleState::Configuring));

    assert!(block_on(shell.close_active_dialog()).unwrap());
    let outcome = block_on(outcome).unwrap();
    assert_eq!(outcome.window, dialog);
    assert_eq!(outcome.reason, CloseReason::Programmatic);
    assert!(!outcome.was_ready);
    assert_eq!(shell.state(dialog), Some(LifecycleState::Closed));

    let log = shell.backend().renderer_log(dialog).unwrap();
    assert!(log.channels_detached);
    assert!(log.scheme_detached);
    assert!(log.shut_down);
    assert_eq!(shell.backend().destroyed(), &[dialog]);
}

#[test]
fn test_double_close_is_noop() {
    let mut shell = shell();
    assert!(!block_on(shell.close_active_dialog()).unwrap());

    let (_dialog, _outcome) = open_active_dialog(&mut shell, DialogSpec::new("/"));
    assert!(block_on(shell.close_active_dialog()).unwrap());
    assert!(!block_on(shell.close_active_dialog()).unwrap());
    assert!(!block_on(shell.close_window(WindowId(999))).unwrap());
    assert_eq!(shell.backend().destroyed().len(), 1);
}

#[test]
fn test_window_creation_failure_leaves_nothing_behind() {
    let mut shell = shell();
    shell.backend_mut().fail_window_creation = true;
    let err = block_on(shell.open_window(WindowSpec::new("/"))).unwrap_err();
    assert!(matches!(err, ShellError::HandleCreation { .. }));
    assert_eq!(shell.window_count(), 0);
    assert_eq!(shell.backend().window_count(), 0);

    shell.backend_mut().fail_renderer_creation = true;
    let err = block_on(shell.open_window(WindowSpec::new("/"))).unwrap_err();
    assert!(matches!(err, ShellError::RendererCreation { .. }));
    assert_eq!(shell.window_count(), 0);
    assert_eq!(shell.backend().window_count(), 0);
    assert_eq!(shell.backend().destroyed().len(), 1);
}

#[test]
fn test_dialog_creation_failure_fails_open_and_frees_slot() {
    let mut shell = shell();
    shell.backend_mut().fail_renderer_creation = true;
    let err = block_on(shell.open_dialog(DialogSpec::new("/"))).unwrap_err();
    assert!(err.is_creation_failure());
    assert_eq!(shell.current_dialog(), None);

    let _outcome = shell.open_dialog(DialogSpec::new("/"));
    assert!(shell.current_dialog().is_some());
}

#[test]
fn test_cosmetic_failure_still_opens_window() {
    let mut shell = shell();
    shell.backend_mut().fail_cosmetics = true;
    let id = block_on(shell.open_window(WindowSpec::new("/"))).unwrap();
    let window = shell.backend().window(id).unwrap();
    assert!(window.visible);
    assert!(!window.styled);
    assert_eq!(shell.state(id), Some(LifecycleState::Shown));
}

#[test]
fn test_escape_closes_active_dialog_and_is_consumed() {
    let mut shell = shell();
    let (dialog, outcome) = open_active_dialog(&mut shell, DialogSpec::new("/"));

    let disposition = shell.handle_event(NativeEvent::KeyDown {
        window: dialog,
        key: Key::Escape,
        origin: KeyOrigin::Window,
    });
    assert_eq!(disposition, EventDisposition::Consumed);
    assert_eq!(block_on(outcome).unwrap().reason, CloseReason::Escape);
}

#[test]
fn test_escape_inside_content_closes_dialog() {
    let mut shell = shell();
    let (dialog, outcome) = open_active_dialog(&mut shell, DialogSpec::new("/"));
    shell
        .backend_mut()
        .post_channel(dialog, Channel::Key, "Escape");
    shell.pump();
    assert_eq!(block_on(outcome).unwrap().reason, CloseReason::Escape);
}

#[test]
fn test_escape_ignored_when_disabled_or_not_active() {
    let mut shell = shell();
    let _pending = shell.open_dialog(DialogSpec::new("/"));
    let configuring = shell.current_dialog().unwrap();
    let disposition = shell.handle_event(NativeEvent::KeyDown {
        window: configuring,
        key: Key::Escape,
        origin: KeyOrigin::Window,
    });
    assert_eq!(disposition, EventDisposition::Forwarded);
    assert!(block_on(shell.close_active_dialog()).unwrap());

    let (dialog, _outcome) =
        open_active_dialog(&mut shell, DialogSpec::new("/").with_escape_dismiss(false));
    assert!(!shell.hooks().is_installed(dialog, HookPurpose::DialogKeys));
    let disposition = shell.handle_event(NativeEvent::KeyDown {
        window: dialog,
        key: Key::Escape,
        origin: KeyOrigin::Window,
    });
    assert_eq!(disposition, EventDisposition::Forwarded);
    assert_eq!(shell.state(dialog), Some(LifecycleState::Active));
}

#[test]
fn test_hooks_installed_on_activation_and_released_on_close() {
    let mut shell = shell();
    let owner = open_owner_at(&mut shell, Point::new(0, 0));
    let (dialog, _outcome) = open_active_dialog(&mut shell, DialogSpec::new("/"));

    let hooks = shell.hooks();
    assert!(hooks.is_installed(owner, HookPurpose::OwnerPosition));
    assert!(hooks.is_installed(dialog, HookPurpose::DialogPosition));
    assert!(hooks.is_installed(dialog, HookPurpose::DialogKeys));
    assert!(hooks.is_installed(dialog, HookPurpose::ContentKeys));
    assert_eq!(hooks.len(), 4);
    assert_eq!(shell.backend().hook_count(), 4);

    assert!(block_on(shell.close_active_dialog()).unwrap());
    assert!(shell.hooks().is_empty());
    assert_eq!(shell.backend().hook_count(), 0);
    assert_eq!(shell.owner_of(dialog), None);

    // Owner moves no longer reach the closed dialog.
    shell.backend_mut().simulate_move(owner, Point::new(40, 40));
    shell.pump();
    assert_eq!(shell.recenter_count(), 0);
}

#[test]
fn test_closing_owner_closes_its_dialog_first() {
    let mut shell = shell();
    let owner = open_owner_at(&mut shell, Point::new(0, 0));
    let (dialog, outcome) = open_active_dialog(&mut shell, DialogSpec::new("/"));

    assert!(block_on(shell.close_window(owner)).unwrap());
    let outcome = block_on(outcome).unwrap();
    assert_eq!(outcome.reason, CloseReason::OwnerClosed);
    assert!(outcome.was_ready);
    assert_eq!(shell.backend().destroyed(), &[dialog, owner]);
    assert!(shell.hooks().is_empty());
    assert_eq!(shell.last_active_window(), None);
}

#[test]
fn test_queued_dialog_never_binds_to_closing_owner() {
    let mut shell = shell();
    let other = open_owner_at(&mut shell, Point::new(0, 0));
    let owner = open_owner_at(&mut shell, Point::new(300, 200));
    assert_eq!(shell.last_active_window(), Some(owner));

    let (first, first_outcome) = open_active_dialog(&mut shell, DialogSpec::new("/a"));
    let _second_outcome = shell.open_dialog(DialogSpec::new("/b"));
    assert_eq!(shell.owner_of(first), Some(owner));
    assert_eq!(shell.queued_dialog_count(), 1);

    assert!(block_on(shell.close_window(owner)).unwrap());
    assert_eq!(block_on(first_outcome).unwrap().reason, CloseReason::OwnerClosed);

    let second = shell.current_dialog().unwrap();
    assert_ne!(second, first);
    assert_eq!(shell.state(owner), Some(LifecycleState::Closed));
    assert_eq!(shell.owner_of(second), Some(other));
    assert_eq!(shell.backend().window(second).unwrap().owner, Some(other));
}

#[test]
fn test_queued_dialog_after_last_window_has_no_owner() {
    let mut shell = shell();
    let owner = open_owner_at(&mut shell, Point::new(0, 0));
    let (_first, _first_outcome) = open_active_dialog(&mut shell, DialogSpec::new("/a"));
    let _second_outcome = shell.open_dialog(DialogSpec::new("/b").with_size(500, 300));

    assert!(block_on(shell.close_window(owner)).unwrap());
    let second = shell.current_dialog().unwrap();
    assert_eq!(shell.owner_of(second), None);
    assert_eq!(shell.backend().window(second).unwrap().owner, None);
    // Centered on the work area, not on the closed owner.
    assert_eq!(rect_of(&shell, second), Rect::new(710, 370, 500, 300));
}

#[test]
fn test_close_request_honors_can_close() {
    let mut shell = shell();
    let mut spec = DialogSpec::new("/");
    spec.chrome.can_close = false;
    let (dialog, _outcome) = open_active_dialog(&mut shell, spec);

    shell.backend_mut().simulate_close_request(dialog);
    shell.pump();
    assert_eq!(shell.state(dialog), Some(LifecycleState::Active));

    let window = block_on(shell.open_window(WindowSpec::new("/"))).unwrap();
    shell.backend_mut().simulate_close_request(window);
    shell.pump();
    assert_eq!(shell.state(window), Some(LifecycleState::Closed));
}

#[test]
fn test_dismiss_channel_respects_backdrop_flag() {
    let mut shell = shell();
    let mut spec = DialogSpec::new("/");
    spec.backdrop_dismissable = false;
    let (dialog, outcome) = open_active_dialog(&mut shell, spec);

    shell
        .backend_mut()
        .post_channel(dialog, Channel::Dismiss, "backdrop");
    shell.pump();
    assert_eq!(shell.state(dialog), Some(LifecycleState::Active));

    shell
        .backend_mut()
        .post_channel(dialog, Channel::Dismiss, "close");
    shell.pump();
    assert_eq!(block_on(outcome).unwrap().reason, CloseReason::ContentRequest);
}

#[test]
fn test_drag_channel_starts_native_drag_when_enabled() {
    let mut shell = shell();
    let window = block_on(shell.open_window(WindowSpec::new("/"))).unwrap();
    let (dialog, _outcome) = open_active_dialog(&mut shell, DialogSpec::new("/"));

    shell.backend_mut().post_channel(window, Channel::Drag, "");
    shell.backend_mut().post_channel(dialog, Channel::Drag, "");
    shell.pump();
    assert_eq!(shell.backend().drags(), &[window]);
    assert!(shell
        .backend()
        .bootstrap_script(window)
        .unwrap()
        .contains("post('drag'"));
}

#[test]
fn test_owner_is_last_focused_window() {
    let mut shell = shell();
    let first = block_on(shell.open_window(WindowSpec::new("/a"))).unwrap();
    let second = block_on(shell.open_window(WindowSpec::new("/b"))).unwrap();
    assert_eq!(shell.last_active_window(), Some(second));

    shell.backend_mut().simulate_focus(first);
    shell.pump();
    let _outcome = shell.open_dialog(DialogSpec::new("/"));
    let dialog = shell.current_dialog().unwrap();
    assert_eq!(shell.owner_of(dialog), Some(first));
}

#[test]
fn test_messages_flow_both_ways() {
    let mut shell = shell();
    let mut inbound = shell.take_inbound().unwrap();
    let window = block_on(shell.open_window(WindowSpec::new("/"))).unwrap();

    shell
        .backend_mut()
        .post_from_content(window, "[\"invoke\",\"1\"]");
    shell.pump();
    let message = inbound.try_next().unwrap().unwrap();
    assert_eq!(message.window, window);
    assert_eq!(message.payload, "[\"invoke\",\"1\"]");
    assert_eq!(message.source, "app://localhost/");

    shell.post_message(window, "line\nbreak");
    let log = shell.backend().renderer_log(window).unwrap();
    assert_eq!(
        log.scripts,
        vec!["window.__dispatchMessageCallback(\"line\\nbreak\")".to_string()]
    );
}

#[test]
fn test_window_on_route_loads_root_document() {
    let mut shell = shell();
    let window = block_on(shell.open_window(WindowSpec::new("/settings"))).unwrap();

    let log = shell.backend().renderer_log(window).unwrap();
    assert_eq!(log.loaded, vec!["app://localhost/".to_string()]);
    let response = shell.backend().fetch(window, &log.loaded[0]).unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(&**response.body(), b"<html>shell</html>");

    let script = shell.backend().bootstrap_script(window).unwrap();
    assert!(script.contains("const startPath = \"/settings\";"));
}

#[test]
fn test_navigate_moves_route_in_place() {
    let mut shell = shell();
    let window = block_on(shell.open_window(WindowSpec::new("/home"))).unwrap();
    shell.navigate(window, "/settings");
    shell.navigate(window, "https://example.com/help");

    let log = shell.backend().renderer_log(window).unwrap();
    assert_eq!(
        log.loaded,
        vec![
            "app://localhost/".to_string(),
            "https://example.com/help".to_string()
        ]
    );
    assert_eq!(
        log.scripts,
        vec!["window.host.navigate(\"/settings\")".to_string()]
    );
}

#[test]
fn test_handle_marshals_from_another_thread() {
    let mut shell = shell();
    let handle = shell.handle();

    let (window, dialog) = thread::spawn(move || {
        (
            handle.open_window(WindowSpec::new("/")),
            handle.open_dialog(DialogSpec::new("/")),
        )
    })
    .join()
    .unwrap();

    shell.pump();
    let window = block_on(window).unwrap();
    assert_eq!(shell.state(window), Some(LifecycleState::Shown));
    let dialog_id = shell.current_dialog().unwrap();
    assert_eq!(shell.owner_of(dialog_id), Some(window));

    let _closed = shell.handle().close_active_dialog();
    shell.pump();
    assert_eq!(block_on(dialog).unwrap().window, dialog_id);
}
