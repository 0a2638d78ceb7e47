//! Process-wide "current recording context".
//!
//! At most one context is active at a time. Entering a second one while the
//! first is alive fails with [`RecorderError::MultipleActiveSessions`].
//! Dropping the guard frees the slot. The slot follows the
//! `OnceLock<Mutex<Option<…>>>` pattern used by the run logger.

use crate::config::RecorderConfig;
use crate::errors::RecorderError;
use crate::logging::{append_run_log, clear_run_logger, init_run_logger};
use crate::mode::{process_env, EnvMap};
use crate::recorder::HttpRecorder;
use crate::transport::HttpHandler;
use serde_json::json;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[derive(Debug, Clone)]
pub struct RecorderContext {
    test_name: String,
    file_path: PathBuf,
    config: RecorderConfig,
    env: EnvMap,
}

static ACTIVE_CONTEXT: OnceLock<Mutex<Option<Arc<RecorderContext>>>> = OnceLock::new();

fn context_slot() -> &'static Mutex<Option<Arc<RecorderContext>>> {
    ACTIVE_CONTEXT.get_or_init(|| Mutex::new(None))
}

impl RecorderContext {
    /// `file_path` is the source file of the test; fixtures are placed next to it.
    pub fn new(test_name: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            test_name: test_name.into(),
            file_path: file_path.into(),
            config: RecorderConfig::default(),
            env: EnvMap::new(),
        }
    }

    pub fn with_config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_env(mut self, env: EnvMap) -> Self {
        self.env = env;
        self
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn usage(&self) -> String {
        format!("{} ({})", self.test_name, self.file_path.display())
    }

    /// Claims the process-wide slot. An empty environment is replaced by the
    /// process environment.
    pub fn enter(mut self) -> Result<RecorderContextGuard, RecorderError> {
        if self.env.is_empty() {
            self.env = process_env();
        }
        let mut slot = context_slot().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.as_ref() {
            let previous = previous.usage();
            let current = self.usage();
            append_run_log(
                "warn",
                "context.rejected",
                json!({"previous": previous, "current": current}),
            );
            return Err(RecorderError::MultipleActiveSessions { previous, current });
        }

        let owns_logger = match self.config.run_logger() {
            Some(logger) => {
                init_run_logger(logger);
                true
            }
            None => false,
        };
        let context = Arc::new(self);
        *slot = Some(Arc::clone(&context));
        drop(slot);

        append_run_log("info", "context.entered", json!({"usage": context.usage()}));
        Ok(RecorderContextGuard {
            context,
            owns_logger,
        })
    }

    pub fn current() -> Option<Arc<RecorderContext>> {
        context_slot()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Configured name, or `<dir>/<stem>Fixtures/<test>/<client>` derived from
    /// the test file.
    pub fn interaction_name(&self, client_name: &str) -> String {
        if let Some(name) = &self.config.interaction_name {
            return name.clone();
        }
        let dir = self.file_path.parent().unwrap_or_else(|| Path::new(""));
        let stem = self
            .file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(format!("{stem}Fixtures"))
            .join(&self.test_name)
            .join(client_name)
            .to_string_lossy()
            .into_owned()
    }

    /// Wraps `inner` in a recorder configured by this context, or returns it
    /// untouched when recording is disabled.
    pub fn recorder_for(
        &self,
        client_name: &str,
        inner: Arc<dyn HttpHandler>,
    ) -> Result<Arc<dyn HttpHandler>, RecorderError> {
        if !self.config.enabled {
            return Ok(inner);
        }
        let recorder = HttpRecorder::builder(self.interaction_name(client_name), inner)
            .mode(self.config.mode)
            .matcher(self.config.request_matcher())
            .anonymizer(self.config.anonymizer()?)
            .store(self.config.store())
            .env(self.env.clone())
            .build();
        Ok(Arc::new(recorder))
    }
}

/// Keeps a [`RecorderContext`] active until dropped.
pub struct RecorderContextGuard {
    context: Arc<RecorderContext>,
    owns_logger: bool,
}

impl Deref for RecorderContextGuard {
    type Target = RecorderContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl Drop for RecorderContextGuard {
    fn drop(&mut self) {
        let mut slot = context_slot().lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, &self.context))
        {
            *slot = None;
        }
        drop(slot);
        append_run_log("info", "context.exited", json!({"usage": self.context.usage()}));
        if self.owns_logger {
            clear_run_logger();
        }
    }
}
