//! Replay-side request matching.
//!
//! A [`RulesMatcher`] is an ordered AND of predicates over
//! `(incoming request, recorded message)`. Candidates are scanned in recorded
//! order and the first survivor wins; there is no ranking and no ambiguity
//! detection.

use crate::content::joined_header_value;
use crate::model::{Interaction, InteractionMessage, RequestSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use url::Position;

pub trait RequestMatcher: Send + Sync {
    fn find_match(
        &self,
        request: &RequestSnapshot,
        interaction: &Interaction,
    ) -> Option<InteractionMessage>;
}

pub type MatchRule = Arc<dyn Fn(&RequestSnapshot, &InteractionMessage) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// A recorded message answers at most one request.
    Once,
    /// A recorded message may answer any number of requests.
    Multiple,
}

/// How much of the URL the URI rule compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriPart {
    /// Scheme, authority and path; the query is ignored.
    Path,
    /// The full absolute URI including the query.
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderComparison {
    CaseSensitive,
    CaseInsensitive,
}

pub struct RulesMatcher {
    policy: MatchPolicy,
    rules: Vec<MatchRule>,
    consumed: Mutex<HashSet<u64>>,
}

impl RulesMatcher {
    pub fn match_once() -> Self {
        Self::with_policy(MatchPolicy::Once)
    }

    pub fn match_multiple() -> Self {
        Self::with_policy(MatchPolicy::Multiple)
    }

    pub fn with_policy(policy: MatchPolicy) -> Self {
        Self {
            policy,
            rules: Vec::new(),
            consumed: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Returns a new matcher with `rule` appended. Consumption state is not
    /// carried over.
    pub fn by<F>(&self, rule: F) -> Self
    where
        F: Fn(&RequestSnapshot, &InteractionMessage) -> bool + Send + Sync + 'static,
    {
        let mut rules = self.rules.clone();
        rules.push(Arc::new(rule));
        Self {
            policy: self.policy,
            rules,
            consumed: Mutex::new(HashSet::new()),
        }
    }

    pub fn by_http_method(&self) -> Self {
        self.by(|request, message| request.method == message.request().method)
    }

    pub fn by_request_uri(&self, part: UriPart) -> Self {
        self.by(move |request, message| {
            let recorded = &message.request().url;
            match part {
                UriPart::Path => request.url[..Position::AfterPath] == recorded[..Position::AfterPath],
                UriPart::Query => request.url[..Position::AfterQuery] == recorded[..Position::AfterQuery],
            }
        })
    }

    /// Compares every value of `name` found on the message headers or the body
    /// headers, joined with `,`.
    pub fn by_header(&self, name: impl Into<String>, comparison: HeaderComparison) -> Self {
        let name = name.into();
        self.by(move |request, message| {
            let incoming = joined_request_header(&name, request);
            let recorded = joined_request_header(&name, message.request());
            match comparison {
                HeaderComparison::CaseSensitive => incoming == recorded,
                HeaderComparison::CaseInsensitive => incoming.eq_ignore_ascii_case(&recorded),
            }
        })
    }

    pub fn by_content(&self) -> Self {
        self.by(|request, message| {
            let incoming = request.body();
            let recorded = message.request().body();
            incoming.len() == recorded.len() && incoming == recorded
        })
    }

    /// Deserializes both bodies as `T` and compares them structurally. An empty
    /// body reads as `T::default()`; a body that fails to parse never matches.
    pub fn by_json_content<T>(&self) -> Self
    where
        T: DeserializeOwned + Default + PartialEq + 'static,
    {
        self.by_json_content_with::<T, _>(|a, b| a == b)
    }

    pub fn by_json_content_with<T, F>(&self, equal: F) -> Self
    where
        T: DeserializeOwned + Default + 'static,
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.by(move |request, message| {
            match (
                json_body::<T>(request.body()),
                json_body::<T>(message.request().body()),
            ) {
                (Some(incoming), Some(recorded)) => equal(&incoming, &recorded),
                _ => false,
            }
        })
    }
}

impl Default for RulesMatcher {
    /// Match once, by method and full URI.
    fn default() -> Self {
        Self::match_once()
            .by_http_method()
            .by_request_uri(UriPart::Query)
    }
}

impl RequestMatcher for RulesMatcher {
    fn find_match(
        &self,
        request: &RequestSnapshot,
        interaction: &Interaction,
    ) -> Option<InteractionMessage> {
        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let found = interaction
            .messages()
            .iter()
            .filter(|message| self.policy == MatchPolicy::Multiple || !consumed.contains(&message.id()))
            .find(|message| self.rules.iter().all(|rule| rule(request, message)))?;
        if self.policy == MatchPolicy::Once {
            consumed.insert(found.id());
        }
        Some(found.clone())
    }
}

fn joined_request_header(name: &str, request: &RequestSnapshot) -> String {
    match request.content_headers() {
        Some(content) => joined_header_value(name, &[&request.headers, content]),
        None => joined_header_value(name, &[&request.headers]),
    }
}

fn json_body<T: DeserializeOwned + Default>(body: &[u8]) -> Option<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Some(T::default());
    }
    serde_json::from_slice(body).ok()
}
