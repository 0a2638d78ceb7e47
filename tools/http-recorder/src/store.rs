use crate::errors::RecorderError;
use crate::har;
use crate::logging::append_run_log;
use crate::model::Interaction;
use async_trait::async_trait;
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_ARCHIVE_EXTENSION: &str = "har";

#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, RecorderError>;
    async fn load(&self, name: &str) -> Result<Interaction, RecorderError>;
    /// Persists the whole interaction and returns what was actually written.
    async fn store(&self, interaction: Interaction) -> Result<Interaction, RecorderError>;
}

/// Stores each interaction as one HAR file. Names without an extension get
/// `.har`; relative names resolve against `base_dir`, or the working
/// directory when unset.
#[derive(Debug, Clone, Default)]
pub struct HarInteractionStore {
    base_dir: Option<PathBuf>,
}

impl HarInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    pub fn resolve_path(&self, name: &str) -> Result<PathBuf, RecorderError> {
        let mut path = PathBuf::from(name);
        if path.extension().is_none() {
            path.set_extension(DEFAULT_ARCHIVE_EXTENSION);
        }
        if path.is_relative() {
            let base = match &self.base_dir {
                Some(dir) if dir.is_absolute() => dir.clone(),
                Some(dir) => current_dir(name)?.join(dir),
                None => current_dir(name)?,
            };
            path = base.join(path);
        }
        Ok(normalize(&path))
    }
}

fn current_dir(name: &str) -> Result<PathBuf, RecorderError> {
    std::env::current_dir().map_err(|e| RecorderError::StoreIo {
        path: name.to_string(),
        reason: e.to_string(),
    })
}

/// Lexically folds `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl InteractionStore for HarInteractionStore {
    async fn exists(&self, name: &str) -> Result<bool, RecorderError> {
        let path = self.resolve_path(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RecorderError::StoreIo {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn load(&self, name: &str) -> Result<Interaction, RecorderError> {
        let path = self.resolve_path(name)?;
        let display = path.display().to_string();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                append_run_log(
                    "warn",
                    "store.load.failed",
                    json!({"path": display, "error": e.to_string()}),
                );
                return Err(if e.kind() == ErrorKind::NotFound {
                    RecorderError::NotFound { path: display }
                } else {
                    RecorderError::CorruptArchive {
                        path: display,
                        reason: e.to_string(),
                    }
                });
            }
        };
        let interaction = har::deserialize(name, &bytes).map_err(|e| {
            append_run_log(
                "warn",
                "store.load.failed",
                json!({"path": display, "error": e.to_string()}),
            );
            RecorderError::CorruptArchive {
                path: display.clone(),
                reason: e.to_string(),
            }
        })?;
        append_run_log(
            "info",
            "store.load",
            json!({"path": display, "entries": interaction.len()}),
        );
        Ok(interaction)
    }

    async fn store(&self, interaction: Interaction) -> Result<Interaction, RecorderError> {
        let path = self.resolve_path(interaction.name())?;
        let display = path.display().to_string();
        let store_io = |reason: String| {
            append_run_log(
                "warn",
                "store.store.failed",
                json!({"path": display, "error": reason}),
            );
            RecorderError::StoreIo {
                path: display.clone(),
                reason,
            }
        };

        let bytes = har::serialize(&interaction).map_err(|e| store_io(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_io(e.to_string()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| store_io(e.to_string()))?;

        let written = har::deserialize(interaction.name(), &bytes).map_err(|e| {
            RecorderError::CorruptArchive {
                path: display.clone(),
                reason: e.to_string(),
            }
        })?;
        append_run_log(
            "info",
            "store.store",
            json!({"path": display, "entries": written.len(), "bytes": bytes.len()}),
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::message;
    use http::Method;

    #[test]
    fn appends_default_extension_only_when_missing() {
        let store = HarInteractionStore::with_base_dir("/fixtures");
        assert_eq!(
            store.resolve_path("suite/case").expect("path"),
            PathBuf::from("/fixtures/suite/case.har")
        );
        assert_eq!(
            store.resolve_path("suite/case.json").expect("path"),
            PathBuf::from("/fixtures/suite/case.json")
        );
        assert_eq!(
            store.resolve_path("/abs/../other/case").expect("path"),
            PathBuf::from("/other/case.har")
        );
    }

    #[test]
    fn relative_names_without_base_dir_resolve_against_working_dir() {
        let cwd = std::env::current_dir().expect("cwd");
        let path = HarInteractionStore::new().resolve_path("./x/y").expect("path");
        assert!(path.is_absolute());
        assert_eq!(path, cwd.join("x").join("y.har"));
    }

    #[tokio::test]
    async fn store_then_load_returns_the_written_interaction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HarInteractionStore::with_base_dir(dir.path());
        let interaction = Interaction::new("nested/dir/sample")
            .with_message(message(Method::GET, "https://h.test/a?x=1", 200, "a"));

        assert!(!store.exists("nested/dir/sample").await.expect("exists"));
        let written = store.store(interaction.clone()).await.expect("store");
        assert!(store.exists("nested/dir/sample").await.expect("exists"));
        assert!(dir.path().join("nested/dir/sample.har").is_file());

        let loaded = store.load("nested/dir/sample").await.expect("load");
        assert_eq!(loaded.name(), "nested/dir/sample");
        assert_eq!(loaded.len(), 1);
        assert_eq!(written.messages()[0].request().url, loaded.messages()[0].request().url);
        assert_eq!(loaded.messages()[0].response_body(), b"a");
    }

    #[tokio::test]
    async fn store_overwrites_the_previous_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HarInteractionStore::with_base_dir(dir.path());
        let one = Interaction::new("overwrite")
            .with_message(message(Method::GET, "https://h.test/1", 200, "1"));
        let two = one.with_message(message(Method::GET, "https://h.test/2", 200, "2"));

        store.store(two).await.expect("store two");
        store.store(one).await.expect("store one");
        assert_eq!(store.load("overwrite").await.expect("load").len(), 1);
    }

    #[tokio::test]
    async fn missing_archive_is_not_found_with_resolved_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HarInteractionStore::with_base_dir(dir.path());

        let err = store.load("absent").await.expect_err("missing");
        let expected = dir.path().join("absent.har").display().to_string();
        assert!(matches!(err, RecorderError::NotFound { ref path } if *path == expected));
        assert!(err.to_string().contains("absent.har"));
    }

    #[tokio::test]
    async fn unparsable_archive_is_corrupt_not_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("broken.har"), b"{\"log\": [").expect("write");
        let store = HarInteractionStore::with_base_dir(dir.path());

        let err = store.load("broken").await.expect_err("corrupt");
        match err {
            RecorderError::CorruptArchive { path, reason } => {
                assert!(path.ends_with("broken.har"));
                assert!(reason.contains("invalid archive json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unwritable_location_is_store_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("blocker"), b"file").expect("write");
        let store = HarInteractionStore::with_base_dir(dir.path());

        let err = store
            .store(Interaction::new("blocker/inner"))
            .await
            .expect_err("parent is a file");
        assert!(matches!(err, RecorderError::StoreIo { ref path, .. } if path.ends_with("inner.har")));
    }
}
