//! Byte content served to the renderer through the private scheme.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

/// A resolved resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub bytes: Arc<[u8]>,
    pub content_type: String,
}

impl Content {
    pub fn new(bytes: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    /// Content with a type guessed from `path`'s extension.
    pub fn guessed(bytes: impl Into<Arc<[u8]>>, path: &str) -> Self {
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        Self::new(bytes, content_type)
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Source of app content. `path` is relative to the content root, without a
/// leading slash and already percent-decoded.
pub trait ContentProvider: Send + Sync {
    fn get(&self, path: &str) -> Option<Content>;
}

impl<P: ContentProvider + ?Sized> ContentProvider for Arc<P> {
    fn get(&self, path: &str) -> Option<Content> {
        (**self).get(path)
    }
}

/// Serves files below a directory. Paths escaping the root are not found.
#[derive(Debug, Clone)]
pub struct DirContentProvider {
    root: PathBuf,
}

impl DirContentProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                // `..`, drive prefixes and absolute roots never leave the root
                _ => return None,
            }
        }
        Some(resolved)
    }
}

impl ContentProvider for DirContentProvider {
    fn get(&self, path: &str) -> Option<Content> {
        let full_path = self.resolve(path)?;
        if !full_path.is_file() {
            return None;
        }
        match std::fs::read(&full_path) {
            Ok(bytes) => {
                debug!(
                    event = "shell.content.file_read",
                    path = %full_path.display(),
                    size = bytes.len()
                );
                Some(Content::guessed(bytes, path))
            }
            Err(e) => {
                warn!(
                    event = "shell.content.file_read_failed",
                    path = %full_path.display(),
                    error = %e
                );
                None
            }
        }
    }
}

/// In-memory content, keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedContentProvider {
    entries: HashMap<String, Content>,
}

impl EmbeddedContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, content: Content) {
        self.entries
            .insert(path.trim_start_matches('/').to_string(), content);
    }

    pub fn with(mut self, path: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(path, Content::guessed(bytes, path));
        self
    }
}

impl ContentProvider for EmbeddedContentProvider {
    fn get(&self, path: &str) -> Option<Content> {
        self.entries.get(path.trim_start_matches('/')).cloned()
    }
}

/// Asks each provider in order; the first hit wins.
#[derive(Clone, Default)]
pub struct CompositeContentProvider {
    providers: Vec<Arc<dyn ContentProvider>>,
}

impl CompositeContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, provider: impl ContentProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }
}

impl ContentProvider for CompositeContentProvider {
    fn get(&self, path: &str) -> Option<Content> {
        self.providers.iter().find_map(|p| p.get(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_provider_reads_file_with_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/app.css"), b"body{}").unwrap();

        let provider = DirContentProvider::new(dir.path());
        let content = provider.get("css/app.css").unwrap();
        assert_eq!(&*content.bytes, b"body{}");
        assert_eq!(content.content_type, "text/css");
        assert_eq!(content.len(), 6);
    }

    #[test]
    fn test_dir_provider_missing_and_directory_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let provider = DirContentProvider::new(dir.path());
        assert!(provider.get("nope.js").is_none());
        assert!(provider.get("sub").is_none());
    }

    #[test]
    fn test_dir_provider_rejects_traversal() {
        let parent = tempfile::tempdir().unwrap();
        std::fs::write(parent.path().join("secret.txt"), b"x").unwrap();
        let root = parent.path().join("www");
        std::fs::create_dir(&root).unwrap();

        let provider = DirContentProvider::new(&root);
        assert!(provider.get("../secret.txt").is_none());
    }

    #[test]
    fn test_composite_first_hit_wins() {
        let first = EmbeddedContentProvider::new().with("index.html", b"first".to_vec());
        let second = EmbeddedContentProvider::new()
            .with("index.html", b"second".to_vec())
            .with("app.js", b"js".to_vec());
        let composite = CompositeContentProvider::new().push(first).push(second);

        assert_eq!(&*composite.get("index.html").unwrap().bytes, b"first");
        let js = composite.get("/app.js").unwrap();
        assert_eq!(&*js.bytes, b"js");
        assert!(js.content_type.ends_with("/javascript"));
        assert!(composite.get("missing.png").is_none());
    }
}
