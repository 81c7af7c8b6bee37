//! Native message-loop hooks as explicit capabilities.
//!
//! Each installed hook is represented by a [`SubclassRegistration`] held by
//! the lifecycle entry that installed it. The registry guarantees one hook
//! per `(window, purpose)` and makes removal idempotent.

use std::collections::HashMap;

use crate::window_manager::WindowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPurpose {
    /// Owner moved or resized: recenter its dialog.
    OwnerPosition,
    /// Dialog itself moved: snap it back to center.
    DialogPosition,
    /// Key intercept on the dialog's native window.
    DialogKeys,
    /// Key intercept inside the embedded content.
    ContentKeys,
}

impl HookPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPurpose::OwnerPosition => "owner_position",
            HookPurpose::DialogPosition => "dialog_position",
            HookPurpose::DialogKeys => "dialog_keys",
            HookPurpose::ContentKeys => "content_keys",
        }
    }
}

/// Proof that a hook is installed on `window` for `purpose`.
///
/// Not `Clone`: exactly one token exists per installed hook.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubclassRegistration {
    window: WindowId,
    purpose: HookPurpose,
    token: u64,
}

impl SubclassRegistration {
    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn purpose(&self) -> HookPurpose {
        self.purpose
    }
}

/// Tracks installed hooks, keyed by `(window, purpose)`.
#[derive(Debug, Default)]
pub struct HookRegistry {
    installed: HashMap<(WindowId, HookPurpose), u64>,
    next_token: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new hook. Returns `None` if one already exists for the pair.
    pub fn register(
        &mut self,
        window: WindowId,
        purpose: HookPurpose,
    ) -> Option<SubclassRegistration> {
        if self.installed.contains_key(&(window, purpose)) {
            return None;
        }
        self.next_token += 1;
        let token = self.next_token;
        self.installed.insert((window, purpose), token);
        Some(SubclassRegistration {
            window,
            purpose,
            token,
        })
    }

    /// Forget a hook. Returns `true` only if this token was still live.
    pub fn release(&mut self, registration: &SubclassRegistration) -> bool {
        let key = (registration.window, registration.purpose);
        match self.installed.get(&key) {
            Some(&token) if token == registration.token => {
                self.installed.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_installed(&self, window: WindowId, purpose: HookPurpose) -> bool {
        self.installed.contains_key(&(window, purpose))
    }

    /// Number of live hooks targeting `window`.
    pub fn count_for(&self, window: WindowId) -> usize {
        self.installed.keys().filter(|(w, _)| *w == window).count()
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}
