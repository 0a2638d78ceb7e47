//! The record/replay handler.
//!
//! An [`HttpRecorder`] sits in a client pipeline in front of the real
//! transport. Its effective mode is resolved on the first call and frozen for
//! the recorder's lifetime. Every call after that runs under one async mutex,
//! so the recorded message order is the order in which calls acquired it.
//! Dropping a call's future releases the mutex without advancing the
//! in-memory interaction.

use crate::anonymizer::{InteractionAnonymizer, RulesAnonymizer};
use crate::errors::RecorderError;
use crate::logging::append_run_log;
use crate::matcher::{RequestMatcher, RulesMatcher};
use crate::mode::{
    mode_override, process_env, resolve_effective_mode, EffectiveMode, EnvMap, RecorderMode,
};
use crate::model::{
    HttpRequest, HttpResponse, Interaction, InteractionMessage, InteractionMessageTimings,
    RequestSnapshot, ResponseSnapshot,
};
use crate::store::{HarInteractionStore, InteractionStore};
use crate::transport::HttpHandler;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Default)]
struct SessionState {
    effective: Option<EffectiveMode>,
    interaction: Option<Interaction>,
}

pub struct HttpRecorder {
    name: String,
    mode: RecorderMode,
    mode_override: Option<RecorderMode>,
    inner: Arc<dyn HttpHandler>,
    matcher: Arc<dyn RequestMatcher>,
    store: Arc<dyn InteractionStore>,
    anonymizer: Arc<dyn InteractionAnonymizer>,
    state: Mutex<SessionState>,
}

pub struct HttpRecorderBuilder {
    name: String,
    inner: Arc<dyn HttpHandler>,
    mode: RecorderMode,
    matcher: Option<Arc<dyn RequestMatcher>>,
    store: Option<Arc<dyn InteractionStore>>,
    anonymizer: Option<Arc<dyn InteractionAnonymizer>>,
    env: Option<EnvMap>,
}

impl HttpRecorderBuilder {
    pub fn mode(mut self, mode: RecorderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn matcher(mut self, matcher: impl RequestMatcher + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    pub fn store(mut self, store: impl InteractionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn InteractionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn anonymizer(mut self, anonymizer: impl InteractionAnonymizer + 'static) -> Self {
        self.anonymizer = Some(Arc::new(anonymizer));
        self
    }

    /// Environment consulted for `HTTP_RECORDER_MODE`. Defaults to the process
    /// environment captured at `build`.
    pub fn env(mut self, env: EnvMap) -> Self {
        self.env = Some(env);
        self
    }

    pub fn build(self) -> HttpRecorder {
        let env = self.env.unwrap_or_else(process_env);
        HttpRecorder {
            name: self.name,
            mode: self.mode,
            mode_override: mode_override(&env),
            inner: self.inner,
            matcher: self
                .matcher
                .unwrap_or_else(|| Arc::new(RulesMatcher::default())),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(HarInteractionStore::new())),
            anonymizer: self
                .anonymizer
                .unwrap_or_else(|| Arc::new(RulesAnonymizer::default())),
            state: Mutex::new(SessionState::default()),
        }
    }
}

impl HttpRecorder {
    pub fn builder(name: impl Into<String>, inner: Arc<dyn HttpHandler>) -> HttpRecorderBuilder {
        HttpRecorderBuilder {
            name: name.into(),
            inner,
            mode: RecorderMode::Auto,
            matcher: None,
            store: None,
            anonymizer: None,
            env: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_mode(&self) -> RecorderMode {
        self.mode
    }

    /// `None` until the first non-passthrough call resolves it.
    pub async fn effective_mode(&self) -> Option<EffectiveMode> {
        if self.mode == RecorderMode::Passthrough {
            return Some(EffectiveMode::Passthrough);
        }
        self.state.lock().await.effective
    }

    async fn passthrough(&self, request: HttpRequest) -> Result<HttpResponse, RecorderError> {
        append_run_log(
            "debug",
            "recorder.passthrough",
            json!({"name": self.name, "method": request.method().as_str(), "uri": request.uri().to_string()}),
        );
        self.inner.send(request).await
    }

    async fn replay(
        &self,
        state: &mut SessionState,
        request: HttpRequest,
    ) -> Result<HttpResponse, RecorderError> {
        let incoming = RequestSnapshot::from_http(&request)?;
        let interaction = match state.interaction.take() {
            Some(interaction) => interaction,
            None => self.store.load(&self.name).await?,
        };
        let matched = self.matcher.find_match(&incoming, &interaction);
        state.interaction = Some(interaction);

        let Some(message) = matched else {
            append_run_log(
                "warn",
                "recorder.replay.no_match",
                json!({"name": self.name, "method": incoming.method.as_str(), "url": incoming.url.as_str()}),
            );
            return Err(RecorderError::NoMatchingInteraction {
                method: incoming.method.to_string(),
                url: incoming.url.to_string(),
            });
        };
        append_run_log(
            "info",
            "recorder.replay.matched",
            json!({
                "name": self.name,
                "method": incoming.method.as_str(),
                "url": incoming.url.as_str(),
                "status": message.status().as_u16(),
            }),
        );
        Ok(message.response().normalized().to_http())
    }

    async fn record(
        &self,
        state: &mut SessionState,
        request: HttpRequest,
    ) -> Result<HttpResponse, RecorderError> {
        let snapshot = RequestSnapshot::from_http(&request)?;
        let started_at = Utc::now();
        let clock = Instant::now();
        let response = self.inner.send(request).await?;
        let elapsed = clock.elapsed();

        let captured = ResponseSnapshot::from_http(snapshot, &response);
        let message = InteractionMessage::new(
            captured.clone(),
            InteractionMessageTimings {
                started_at,
                elapsed,
            },
        );
        let candidate = match &state.interaction {
            Some(interaction) => interaction.with_message(message),
            None => Interaction::new(self.name.clone()).with_message(message),
        };
        let anonymized = self.anonymizer.anonymize(candidate).await?;
        let stored = self.store.store(anonymized).await?;
        append_run_log(
            "info",
            "recorder.record.captured",
            json!({
                "name": self.name,
                "method": captured.request.method.as_str(),
                "url": captured.request.url.as_str(),
                "status": captured.status.as_u16(),
                "elapsed_ms": elapsed.as_millis() as u64,
                "entries": stored.len(),
            }),
        );
        state.interaction = Some(stored);
        Ok(captured.normalized().to_http())
    }
}

#[async_trait]
impl HttpHandler for HttpRecorder {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RecorderError> {
        if self.mode == RecorderMode::Passthrough {
            return self.passthrough(request).await;
        }

        let mut state = self.state.lock().await;
        let effective = match state.effective {
            Some(mode) => mode,
            None => {
                let mode = resolve_effective_mode(
                    self.mode,
                    self.mode_override,
                    &self.name,
                    self.store.as_ref(),
                )
                .await?;
                append_run_log(
                    "info",
                    "recorder.mode.resolved",
                    json!({
                        "name": self.name,
                        "declared": self.mode.as_str(),
                        "override": self.mode_override.map(RecorderMode::as_str),
                        "effective": mode.as_str(),
                    }),
                );
                state.effective = Some(mode);
                mode
            }
        };

        match effective {
            EffectiveMode::Passthrough => {
                drop(state);
                self.passthrough(request).await
            }
            EffectiveMode::Replay => self.replay(&mut state, request).await,
            EffectiveMode::Record => self.record(&mut state, request).await,
        }
    }
}
