//! Opens a main window whose button raises a confirm dialog.
//!
//! cargo run --example hello --features wry-backend

use std::sync::Arc;
use std::time::Duration;

use native_shell::{
    init_logging, DialogSpec, EmbeddedContentProvider, LifecycleManager, ShellConfig,
    ShellError, UnifiedBackend, WindowSpec,
};

/// One document for every window; the route picks what it shows.
const APP_PAGE: &str = r#"<!doctype html>
<html>
  <body style="font-family:sans-serif">
    <div id="main" hidden>
      <h1>native-shell</h1>
      <button onclick="external.sendMessage('confirm')">Confirm...</button>
      <pre id="log"></pre>
    </div>
    <div id="confirm" hidden>
      <p>Proceed?</p>
      <button onclick="external.sendMessage('yes'); host.dismiss()">Yes</button>
      <button onclick="host.dismiss()">No</button>
    </div>
    <script>
      const view = location.pathname === '/confirm' ? 'confirm' : 'main';
      document.getElementById(view).hidden = false;
      external.receiveMessage((m) => { document.getElementById('log').textContent += m + '\n'; });
      host.notify();
    </script>
  </body>
</html>"#;

fn main() -> Result<(), ShellError> {
    init_logging(false);

    let config = ShellConfig::default();
    let content = EmbeddedContentProvider::new().with("index.html", APP_PAGE.as_bytes().to_vec());
    let backend = UnifiedBackend::new(config.max_pending_events);
    let mut shell = LifecycleManager::new(backend, config, Arc::new(content))?;
    let handle = shell.handle();
    let mut inbound = shell.take_inbound();

    let mut opening = handle.open_window(
        WindowSpec::new("/")
            .with_title("Hello")
            .with_size(800, 600),
    );

    let mut main = None;
    loop {
        shell.pump();

        if main.is_none() {
            if let Some(opened) = opening.try_take() {
                main = Some(opened?);
            }
        }

        if let Some(rx) = inbound.as_mut() {
            while let Ok(Some(message)) = rx.try_next() {
                match message.payload.as_str() {
                    "confirm" => {
                        let _outcome = handle.open_dialog(
                            DialogSpec::new("/confirm")
                                .with_title("Confirm")
                                .with_size(360, 160),
                        );
                    }
                    other => {
                        if let Some(main) = main {
                            handle.post_message(main, format!("dialog said {other}"));
                        }
                    }
                }
            }
        }

        if shell.window_count() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    Ok(())
}
