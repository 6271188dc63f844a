//! Local bundle loading
//!
//! The bundle is re-read from disk on every call; the interceptor swaps the
//! whole text in on each reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::report;
use crate::common::{Error, Result};

/// Marker of a source map inlined as a data URL
pub const INLINE_SOURCE_MAP_MARKER: &str = "sourceMappingURL=data:application/json";

/// The bundle text as it was on disk at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedBundle {
    pub file_name: String,
    pub text: Arc<str>,
}

/// Whether the bundle carries its source map inline.
///
/// A map referenced by URL does not count: the remote browser cannot reach
/// the local file it points at.
pub fn has_inline_source_map(text: &str) -> bool {
    text.contains(INLINE_SOURCE_MAP_MARKER)
}

/// Reads the locally built bundle
#[derive(Debug, Clone)]
pub struct BundleContentLoader {
    path: PathBuf,
}

impl BundleContentLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Read the bundle from disk.
    ///
    /// A missing inline source map is reported as a warning; the content is
    /// returned either way.
    pub async fn load_file_contents(&self) -> Result<InterceptedBundle> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| Error::BundleLoad {
                path: self.path.display().to_string(),
                source,
            })?;

        if !has_inline_source_map(&text) {
            report::warn(
                "bundle.source_map",
                &format!(
                    "{} has no inline source map; breakpoints will not bind. \
                     Build with devtool 'inline-source-map'.",
                    self.path.display()
                ),
            );
        }

        tracing::debug!(path = %self.path.display(), bytes = text.len(), "Loaded bundle");

        Ok(InterceptedBundle {
            file_name: self.file_name(),
            text: Arc::from(text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINE: &str =
        "var a=1;\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,e30=";

    #[test]
    fn test_inline_map_detection() {
        assert!(has_inline_source_map(INLINE));
        assert!(!has_inline_source_map("var a=1;\n//# sourceMappingURL=bundle.js.map"));
        assert!(!has_inline_source_map("var a=1;"));
    }

    #[tokio::test]
    async fn test_load_reflects_latest_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.js");
        std::fs::write(&path, INLINE).unwrap();

        let loader = BundleContentLoader::new(&path);
        let first = loader.load_file_contents().await.unwrap();
        assert_eq!(first.file_name, "bundle.js");
        assert_eq!(&*first.text, INLINE);

        std::fs::write(&path, "var b=2;").unwrap();
        let second = loader.load_file_contents().await.unwrap();
        assert_eq!(&*second.text, "var b=2;");
    }

    #[tokio::test]
    async fn test_missing_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BundleContentLoader::new(dir.path().join("nope.js"));
        let err = loader.load_file_contents().await.unwrap_err();
        assert!(matches!(err, Error::BundleLoad { .. }));
        assert!(err.to_string().contains("nope.js"));
    }
}
