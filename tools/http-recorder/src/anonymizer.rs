use crate::errors::RecorderError;
use crate::model::{Interaction, InteractionMessage};
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

pub const DEFAULT_REPLACEMENT: &str = "******";

#[async_trait]
pub trait InteractionAnonymizer: Send + Sync {
    async fn anonymize(&self, interaction: Interaction) -> Result<Interaction, RecorderError>;
}

pub type AnonymizeRule = Arc<dyn Fn(&mut InteractionMessage) + Send + Sync>;

/// Ordered request-side rewrite rules, run against every message before it is
/// persisted. Responses are never touched.
#[derive(Clone)]
pub struct RulesAnonymizer {
    rules: Vec<AnonymizeRule>,
    replacement: HeaderValue,
}

impl Default for RulesAnonymizer {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            replacement: HeaderValue::from_static(DEFAULT_REPLACEMENT),
        }
    }
}

impl RulesAnonymizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Token written by rules added after this call.
    pub fn with_replacement(&self, replacement: &str) -> Result<Self, RecorderError> {
        if replacement.is_empty() {
            return Err(RecorderError::InvalidConfig(
                "anonymize.replacement must not be empty".to_string(),
            ));
        }
        let replacement = HeaderValue::from_str(replacement).map_err(|_| {
            RecorderError::InvalidConfig(format!(
                "anonymize.replacement {replacement:?} is not a valid header value"
            ))
        })?;
        Ok(Self {
            rules: self.rules.clone(),
            replacement,
        })
    }

    pub fn with_rule<F>(&self, rule: F) -> Self
    where
        F: Fn(&mut InteractionMessage) + Send + Sync + 'static,
    {
        let mut rules = self.rules.clone();
        rules.push(Arc::new(rule));
        Self {
            rules,
            replacement: self.replacement.clone(),
        }
    }

    /// Replaces the value of query parameter `name` on every recorded request.
    pub fn anonymize_request_query_parameter(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let replacement = self.replacement_text();
        self.with_rule(move |message| {
            let url = &mut message.request_mut().url;
            let pairs = url
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect::<Vec<_>>();
            if !pairs.iter().any(|(key, _)| *key == name) {
                return;
            }
            url.query_pairs_mut().clear().extend_pairs(pairs.iter().map(|(key, value)| {
                if *key == name {
                    (key.as_str(), replacement.as_str())
                } else {
                    (key.as_str(), value.as_str())
                }
            }));
        })
    }

    /// Replaces header `name` on both the request headers and its body headers.
    pub fn anonymize_request_header(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let replacement = self.replacement.clone();
        self.with_rule(move |message| {
            let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
                return;
            };
            let request = message.request_mut();
            replace_header(&mut request.headers, &header, &replacement);
            if let Some(content) = request.content.as_mut() {
                replace_header(&mut content.headers, &header, &replacement);
            }
        })
    }

    fn replacement_text(&self) -> String {
        String::from_utf8_lossy(self.replacement.as_bytes()).into_owned()
    }
}

fn replace_header(headers: &mut HeaderMap, name: &HeaderName, replacement: &HeaderValue) {
    if headers.contains_key(name) {
        headers.insert(name.clone(), replacement.clone());
    }
}

#[async_trait]
impl InteractionAnonymizer for RulesAnonymizer {
    async fn anonymize(&self, interaction: Interaction) -> Result<Interaction, RecorderError> {
        if self.rules.is_empty() {
            return Ok(interaction);
        }
        let (name, mut messages) = interaction.into_parts();
        for message in &mut messages {
            for rule in &self.rules {
                rule(message);
            }
        }
        Ok(Interaction::with_messages(name, messages))
    }
}
