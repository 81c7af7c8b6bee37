use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ShellError;
use crate::geometry::{clamp_dimension, Size};

/// Which window-management affordances the native chrome offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChromeFlags {
    pub can_close: bool,
    pub can_minimize: bool,
    pub can_maximize: bool,
    pub can_resize: bool,
}

impl Default for ChromeFlags {
    fn default() -> Self {
        Self {
            can_close: true,
            can_minimize: true,
            can_maximize: true,
            can_resize: true,
        }
    }
}

/// Title-bar button visibility, independent of whether the action is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ButtonVisibility {
    pub show_close: bool,
    pub show_minimize: bool,
    pub show_maximize: bool,
}

impl Default for ButtonVisibility {
    fn default() -> Self {
        Self {
            show_close: true,
            show_minimize: true,
            show_maximize: true,
        }
    }
}

impl ButtonVisibility {
    pub const HIDDEN: Self = Self {
        show_close: false,
        show_minimize: false,
        show_maximize: false,
    };
}

/// Platform title-bar layout. Only macOS distinguishes the two today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChromeStyle {
    Compact,
    #[default]
    Expanded,
}

/// Options for a top-level window.
///
/// Immutable once handed to the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowSpec {
    /// Route inside the app content, e.g. `/settings`. Empty means `/`.
    pub content_path: String,
    /// Window title. Default: ""
    pub title: String,
    /// Outer width in logical pixels. Default: 800
    pub width: i32,
    /// Outer height in logical pixels. Default: 600
    pub height: i32,
    pub min_width: Option<i32>,
    pub min_height: Option<i32>,
    pub max_width: Option<i32>,
    pub max_height: Option<i32>,
    pub chrome: ChromeFlags,
    pub buttons: ButtonVisibility,
    /// Start in full-screen mode. Default: false
    pub full_screen: bool,
    pub chrome_style: ChromeStyle,
    /// Let the top band of the content drag the window. Default: true
    pub enable_drag: bool,
    /// Close on Escape (dialogs only honor this while active). Default: true
    pub dismiss_with_escape: bool,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            content_path: String::new(),
            title: String::new(),
            width: 800,
            height: 600,
            min_width: None,
            min_height: None,
            max_width: None,
            max_height: None,
            chrome: ChromeFlags::default(),
            buttons: ButtonVisibility::default(),
            full_screen: false,
            chrome_style: ChromeStyle::default(),
            enable_drag: true,
            dismiss_with_escape: true,
        }
    }
}

impl WindowSpec {
    pub fn new(content_path: impl Into<String>) -> Self {
        Self {
            content_path: content_path.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_min_size(mut self, width: Option<i32>, height: Option<i32>) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    pub fn with_max_size(mut self, width: Option<i32>, height: Option<i32>) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }

    /// Requested size clamped to the declared bounds (min dominates max).
    pub fn clamped_size(&self) -> Size {
        Size::new(
            clamp_dimension(self.width, self.min_width, self.max_width),
            clamp_dimension(self.height, self.min_height, self.max_height),
        )
    }

    /// Content route, with an empty path mapped to `/`.
    pub fn route(&self) -> &str {
        normalize_route(&self.content_path)
    }
}

/// Options for an owner-attached dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DialogSpec {
    pub content_path: String,
    pub title: String,
    /// Default: 500
    pub width: i32,
    /// Default: 600
    pub height: i32,
    pub min_width: Option<i32>,
    pub min_height: Option<i32>,
    pub max_width: Option<i32>,
    pub max_height: Option<i32>,
    /// Dialogs are fixed-size and cannot be minimized or maximized by default.
    pub chrome: ChromeFlags,
    pub buttons: ButtonVisibility,
    pub full_screen: bool,
    pub chrome_style: ChromeStyle,
    /// Default: false
    pub enable_drag: bool,
    pub dismiss_with_escape: bool,
    /// Clicking outside the dialog body closes it. Default: true
    pub backdrop_dismissable: bool,
}

impl Default for DialogSpec {
    fn default() -> Self {
        Self {
            content_path: String::new(),
            title: String::new(),
            width: 500,
            height: 600,
            min_width: None,
            min_height: None,
            max_width: None,
            max_height: None,
            chrome: ChromeFlags {
                can_close: true,
                can_minimize: false,
                can_maximize: false,
                can_resize: false,
            },
            buttons: ButtonVisibility::HIDDEN,
            full_screen: false,
            chrome_style: ChromeStyle::default(),
            enable_drag: false,
            dismiss_with_escape: true,
            backdrop_dismissable: true,
        }
    }
}

impl DialogSpec {
    pub fn new(content_path: impl Into<String>) -> Self {
        Self {
            content_path: content_path.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_min_size(mut self, width: Option<i32>, height: Option<i32>) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    pub fn with_max_size(mut self, width: Option<i32>, height: Option<i32>) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }

    pub fn with_escape_dismiss(mut self, enabled: bool) -> Self {
        self.dismiss_with_escape = enabled;
        self
    }

    pub fn clamped_size(&self) -> Size {
        Size::new(
            clamp_dimension(self.width, self.min_width, self.max_width),
            clamp_dimension(self.height, self.min_height, self.max_height),
        )
    }

    pub fn route(&self) -> &str {
        normalize_route(&self.content_path)
    }

    /// The window-shaped part of the dialog, used for native configuration.
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            content_path: self.content_path.clone(),
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            min_width: self.min_width,
            min_height: self.min_height,
            max_width: self.max_width,
            max_height: self.max_height,
            chrome: self.chrome,
            buttons: self.buttons,
            full_screen: self.full_screen,
            chrome_style: self.chrome_style,
            enable_drag: self.enable_drag,
            dismiss_with_escape: self.dismiss_with_escape,
        }
    }
}

fn normalize_route(path: &str) -> &str {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// What to do with an open-dialog request while another dialog is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogPolicy {
    /// Open once the active dialog closes.
    #[default]
    Queue,
    /// Fail the request with `ShellError::DialogBusy`.
    Reject,
}

/// Process-wide shell configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellConfig {
    /// Private URI scheme the renderer loads app content from. Default: "app"
    pub scheme: String,
    /// Host part of content URIs. Default: "localhost"
    pub host: String,
    /// Document served for the root path. Default: "index.html"
    pub root_document: String,
    /// How long a dialog may wait for the readiness handshake before it is
    /// shown anyway. Default: 2000
    pub ready_fallback_ms: u64,
    pub dialog_policy: DialogPolicy,
    /// Cap on deferred native events per pump. Default: 10000
    pub max_pending_events: usize,
    /// Enable renderer devtools. Default: false
    pub devtools: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            scheme: "app".to_string(),
            host: "localhost".to_string(),
            root_document: "index.html".to_string(),
            ready_fallback_ms: 2_000,
            dialog_policy: DialogPolicy::default(),
            max_pending_events: 10_000,
            devtools: false,
        }
    }
}

impl ShellConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ShellError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ShellError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// `scheme://host/`
    pub fn base_url(&self) -> Result<Url, ShellError> {
        let raw = format!("{}://{}/", self.scheme, self.host);
        Url::parse(&raw).map_err(|_| ShellError::InvalidUri { uri: raw })
    }

    pub fn ready_fallback(&self) -> Duration {
        Duration::from_millis(self.ready_fallback_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_defaults() {
        let spec = WindowSpec::new("/home");
        assert_eq!(spec.width, 800);
        assert_eq!(spec.height, 600);
        assert!(spec.chrome.can_close);
        assert!(spec.enable_drag);
        assert_eq!(spec.route(), "/home");
    }

    #[test]
    fn test_empty_content_path_routes_to_root() {
        assert_eq!(WindowSpec::new("  ").route(), "/");
        assert_eq!(DialogSpec::new("").route(), "/");
    }

    #[test]
    fn test_dialog_defaults_are_fixed_size() {
        let spec = DialogSpec::new("/confirm");
        assert_eq!(spec.clamped_size(), Size::new(500, 600));
        assert!(!spec.chrome.can_resize);
        assert!(!spec.enable_drag);
        assert!(spec.backdrop_dismissable);
    }

    #[test]
    fn test_inconsistent_bounds_min_wins() {
        let spec = WindowSpec::new("/")
            .with_size(500, 500)
            .with_min_size(Some(700), None)
            .with_max_size(Some(600), None);
        assert_eq!(spec.clamped_size().width, 700);
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: DialogSpec = serde_json::from_str(
            r#"{"contentPath":"/about","width":300,"minWidth":400,"backdropDismissable":false}"#,
        )
        .unwrap();
        assert_eq!(spec.content_path, "/about");
        assert_eq!(spec.clamped_size(), Size::new(400, 600));
        assert!(!spec.backdrop_dismissable);
        assert!(spec.dismiss_with_escape);
    }

    #[test]
    fn test_shell_config_from_json() {
        let config = ShellConfig::from_json_str(r#"{"scheme":"shell","readyFallbackMs":1500}"#).unwrap();
        assert_eq!(config.scheme, "shell");
        assert_eq!(config.root_document, "index.html");
        assert_eq!(config.ready_fallback(), Duration::from_millis(1500));
        assert_eq!(config.base_url().unwrap().as_str(), "shell://localhost/");
    }
}
