//! Desktop shell that hosts web content in native windows.
//!
//! A [`LifecycleManager`] owns windows and owner-attached dialogs, each with
//! an embedded renderer that loads app content through a private URI scheme
//! and exchanges string messages with host code.
//!
//! ```no_run
//! use std::sync::Arc;
//! use native_shell::{
//!     DialogSpec, DirContentProvider, HeadlessBackend, LifecycleManager, ShellConfig, WindowSpec,
//! };
//!
//! # fn main() -> Result<(), native_shell::ShellError> {
//! let content = Arc::new(DirContentProvider::new("dist"));
//! let mut shell = LifecycleManager::new(HeadlessBackend::new(), ShellConfig::default(), content)?;
//! let handle = shell.handle();
//!
//! let _main = handle.open_window(WindowSpec::new("/").with_title("Main"));
//! let _confirm = handle.open_dialog(DialogSpec::new("/confirm").with_size(500, 300));
//! shell.pump();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod content;
pub mod error;
pub mod events;
pub mod geometry;
pub mod hooks;
pub mod logging;
pub mod options;
pub mod platform;
pub mod ready;
pub mod scheme;
pub mod window_manager;

pub use bridge::{Bridge, ChannelPipeline, DisposalStep, MessagePipeline, Renderer};
pub use content::{
    CompositeContentProvider, Content, ContentProvider, DirContentProvider,
    EmbeddedContentProvider,
};
pub use error::ShellError;
pub use events::{Channel, EventDisposition, InboundMessage, Key, KeyOrigin, NativeEvent};
pub use geometry::{Point, Rect, Size};
pub use hooks::{HookPurpose, HookRegistry, SubclassRegistration};
pub use logging::init_logging;
pub use options::{
    ButtonVisibility, ChromeFlags, ChromeStyle, DialogPolicy, DialogSpec, ShellConfig, WindowSpec,
};
pub use platform::headless::HeadlessBackend;
#[cfg(feature = "wry-backend")]
pub use platform::unified::UnifiedBackend;
pub use platform::{RendererSetup, WindowBackend};
pub use ready::ReadyLatch;
pub use scheme::{ContentRouter, SchemeInterceptor, SchemeResponse, ServeError, ServedContent};
pub use window_manager::{
    CloseReason, Command, Completion, DialogOutcome, LifecycleManager, LifecycleState,
    ShellHandle, WindowId,
};
