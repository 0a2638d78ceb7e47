use crate::anonymizer::{RulesAnonymizer, DEFAULT_REPLACEMENT};
use crate::errors::RecorderError;
use crate::logging::{JsonlLogger, DEFAULT_DISK_BUDGET_BYTES, LOG_PATH_ENV_VAR};
use crate::matcher::{HeaderComparison, MatchPolicy, RulesMatcher, UriPart};
use crate::mode::{EnvMap, RecorderMode};
use crate::store::HarInteractionStore;
use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ARCHIVE_DIR_ENV_VAR: &str = "HTTP_RECORDER_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub interaction_name: Option<String>,
    pub mode: RecorderMode,
    pub archive_dir: Option<PathBuf>,
    pub matcher: MatcherConfig,
    pub anonymize: AnonymizeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UrlMatch {
    Query,
    Path,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatcherConfig {
    pub policy: MatchPolicy,
    pub by_method: bool,
    pub by_url: UrlMatch,
    pub headers: Vec<String>,
    pub by_body: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnonymizeConfig {
    pub replacement: String,
    pub query_parameters: Vec<String>,
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub path: Option<PathBuf>,
    pub budget_bytes: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interaction_name: None,
            mode: RecorderMode::Auto,
            archive_dir: None,
            matcher: MatcherConfig {
                policy: MatchPolicy::Once,
                by_method: true,
                by_url: UrlMatch::Query,
                headers: Vec::new(),
                by_body: false,
            },
            anonymize: AnonymizeConfig {
                replacement: DEFAULT_REPLACEMENT.to_string(),
                query_parameters: Vec::new(),
                headers: Vec::new(),
            },
            log: LogConfig {
                path: None,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialRecorderConfig {
    enabled: Option<bool>,
    interaction_name: Option<String>,
    mode: Option<RecorderMode>,
    archive_dir: Option<PathBuf>,
    matcher: Option<PartialMatcherConfig>,
    anonymize: Option<PartialAnonymizeConfig>,
    log: Option<PartialLogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialMatcherConfig {
    policy: Option<MatchPolicy>,
    by_method: Option<bool>,
    by_url: Option<UrlMatch>,
    headers: Option<Vec<String>>,
    by_body: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAnonymizeConfig {
    replacement: Option<String>,
    query_parameters: Option<Vec<String>>,
    headers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLogConfig {
    path: Option<PathBuf>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the TOML file at `config_path`, then environment
/// overrides, then validation. Relative paths are resolved against `cwd`.
pub fn load_config(
    config_path: Option<&Path>,
    env: &EnvMap,
    cwd: &Path,
) -> Result<RecorderConfig, RecorderError> {
    let mut cfg = RecorderConfig::default();

    if let Some(path) = config_path {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| RecorderError::ConfigParse(format!("{}: {e}", path.display())))?;
        let partial: PartialRecorderConfig = toml::from_str(&file_contents)
            .map_err(|e| RecorderError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_env_overrides(&mut cfg, env);

    cfg.archive_dir = cfg.archive_dir.map(|dir| absolutize_path(cwd, &dir));
    cfg.log.path = cfg.log.path.map(|path| absolutize_path(cwd, &path));

    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config(contents: &str) -> Result<RecorderConfig, RecorderError> {
    let partial: PartialRecorderConfig =
        toml::from_str(contents).map_err(|e| RecorderError::ConfigParse(e.to_string()))?;
    let mut cfg = RecorderConfig::default();
    merge_partial_config(&mut cfg, partial);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut RecorderConfig, partial: PartialRecorderConfig) {
    if let Some(enabled) = partial.enabled {
        cfg.enabled = enabled;
    }
    if partial.interaction_name.is_some() {
        cfg.interaction_name = partial.interaction_name;
    }
    if let Some(mode) = partial.mode {
        cfg.mode = mode;
    }
    if partial.archive_dir.is_some() {
        cfg.archive_dir = partial.archive_dir;
    }

    if let Some(matcher) = partial.matcher {
        if let Some(value) = matcher.policy {
            cfg.matcher.policy = value;
        }
        if let Some(value) = matcher.by_method {
            cfg.matcher.by_method = value;
        }
        if let Some(value) = matcher.by_url {
            cfg.matcher.by_url = value;
        }
        if let Some(value) = matcher.headers {
            cfg.matcher.headers = value;
        }
        if let Some(value) = matcher.by_body {
            cfg.matcher.by_body = value;
        }
    }

    if let Some(anonymize) = partial.anonymize {
        if let Some(value) = anonymize.replacement {
            cfg.anonymize.replacement = value;
        }
        if let Some(value) = anonymize.query_parameters {
            cfg.anonymize.query_parameters = value;
        }
        if let Some(value) = anonymize.headers {
            cfg.anonymize.headers = value;
        }
    }

    if let Some(log) = partial.log {
        if log.path.is_some() {
            cfg.log.path = log.path;
        }
        if let Some(value) = log.budget_bytes {
            cfg.log.budget_bytes = value;
        }
    }
}

fn apply_env_overrides(cfg: &mut RecorderConfig, env: &EnvMap) {
    if let Some(dir) = env.get(ARCHIVE_DIR_ENV_VAR).filter(|v| !v.trim().is_empty()) {
        cfg.archive_dir = Some(PathBuf::from(dir));
    }
    if let Some(path) = env.get(LOG_PATH_ENV_VAR).filter(|v| !v.trim().is_empty()) {
        cfg.log.path = Some(PathBuf::from(path));
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &RecorderConfig) -> Result<(), RecorderError> {
    if cfg.anonymize.replacement.is_empty() {
        return Err(RecorderError::InvalidConfig(
            "anonymize.replacement must not be empty".to_string(),
        ));
    }
    if HeaderValue::from_str(&cfg.anonymize.replacement).is_err() {
        return Err(RecorderError::InvalidConfig(
            "anonymize.replacement must be a valid header value".to_string(),
        ));
    }
    if cfg.log.budget_bytes == 0 {
        return Err(RecorderError::InvalidConfig(
            "log.budget_bytes must be greater than zero".to_string(),
        ));
    }
    if cfg
        .interaction_name
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        return Err(RecorderError::InvalidConfig(
            "interaction_name must not be blank".to_string(),
        ));
    }

    for (field, names) in [
        ("matcher.headers", &cfg.matcher.headers),
        ("anonymize.headers", &cfg.anonymize.headers),
    ] {
        if let Some(bad) = names
            .iter()
            .find(|name| HeaderName::from_bytes(name.as_bytes()).is_err())
        {
            return Err(RecorderError::InvalidConfig(format!(
                "{field} contains invalid header name {bad:?}"
            )));
        }
    }

    Ok(())
}

impl RecorderConfig {
    pub fn request_matcher(&self) -> RulesMatcher {
        let mut matcher = RulesMatcher::with_policy(self.matcher.policy);
        if self.matcher.by_method {
            matcher = matcher.by_http_method();
        }
        matcher = match self.matcher.by_url {
            UrlMatch::Query => matcher.by_request_uri(UriPart::Query),
            UrlMatch::Path => matcher.by_request_uri(UriPart::Path),
            UrlMatch::None => matcher,
        };
        for header in &self.matcher.headers {
            matcher = matcher.by_header(header.clone(), HeaderComparison::CaseInsensitive);
        }
        if self.matcher.by_body {
            matcher = matcher.by_content();
        }
        matcher
    }

    pub fn anonymizer(&self) -> Result<RulesAnonymizer, RecorderError> {
        let mut anonymizer = RulesAnonymizer::new().with_replacement(&self.anonymize.replacement)?;
        for name in &self.anonymize.query_parameters {
            anonymizer = anonymizer.anonymize_request_query_parameter(name.clone());
        }
        for name in &self.anonymize.headers {
            anonymizer = anonymizer.anonymize_request_header(name.clone());
        }
        Ok(anonymizer)
    }

    pub fn store(&self) -> HarInteractionStore {
        match &self.archive_dir {
            Some(dir) => HarInteractionStore::with_base_dir(dir),
            None => HarInteractionStore::new(),
        }
    }

    pub fn run_logger(&self) -> Option<JsonlLogger> {
        self.log.path.as_ref().map(|path| {
            let mut logger = JsonlLogger::new(path);
            logger.budget_bytes = self.log.budget_bytes;
            logger
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::MODE_ENV_VAR;

    fn fixture(path: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(path)
    }

    #[test]
    fn defaults_match_the_engine_defaults() {
        let cfg = RecorderConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.mode, RecorderMode::Auto);
        assert_eq!(cfg.matcher.policy, MatchPolicy::Once);
        assert_eq!(cfg.matcher.by_url, UrlMatch::Query);
        assert_eq!(cfg.anonymize.replacement, "******");
        assert_eq!(cfg.request_matcher().rule_count(), 2);
        assert_eq!(cfg.anonymizer().expect("anonymizer").rule_count(), 0);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let cfg = parse_config(
            r#"
            mode = "replay"

            [matcher]
            policy = "multiple"
            by_url = "path"
            headers = ["accept"]

            [anonymize]
            query_parameters = ["api_key"]
            headers = ["authorization"]
            "#,
        )
        .expect("config");

        assert_eq!(cfg.mode, RecorderMode::Replay);
        assert!(cfg.matcher.by_method);
        assert_eq!(cfg.matcher.by_url, UrlMatch::Path);
        assert_eq!(cfg.request_matcher().policy(), MatchPolicy::Multiple);
        assert_eq!(cfg.request_matcher().rule_count(), 3);
        assert_eq!(cfg.anonymizer().expect("anonymizer").rule_count(), 2);
        assert_eq!(cfg.log.budget_bytes, DEFAULT_DISK_BUDGET_BYTES);
    }

    #[test]
    fn environment_overrides_paths_but_leaves_mode_to_the_engine() {
        let env = EnvMap::from([
            (MODE_ENV_VAR.to_string(), "record".to_string()),
            (ARCHIVE_DIR_ENV_VAR.to_string(), "recordings".to_string()),
            (LOG_PATH_ENV_VAR.to_string(), "/var/log/recorder.jsonl".to_string()),
        ]);
        let cfg = load_config(Some(&fixture("configs/replay.toml")), &env, Path::new("/work"))
            .expect("config");

        assert_eq!(cfg.mode, RecorderMode::Replay);
        assert_eq!(cfg.archive_dir, Some(PathBuf::from("/work/recordings")));
        assert_eq!(cfg.log.path, Some(PathBuf::from("/var/log/recorder.jsonl")));
        assert!(cfg.run_logger().is_some());
    }

    #[test]
    fn fixture_file_loads_without_environment() {
        let cfg = load_config(Some(&fixture("configs/replay.toml")), &EnvMap::new(), Path::new("/work"))
            .expect("config");
        assert_eq!(cfg.mode, RecorderMode::Replay);
        assert_eq!(cfg.archive_dir, Some(PathBuf::from("/work/tests/fixtures/archives")));
        assert_eq!(cfg.anonymize.headers, vec!["authorization".to_string()]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = parse_config("[anonymize]\nreplacement = \"\"").expect_err("empty replacement");
        assert!(matches!(err, RecorderError::InvalidConfig(msg) if msg.contains("replacement")));

        let err = parse_config("[log]\nbudget_bytes = 0").expect_err("zero budget");
        assert!(matches!(err, RecorderError::InvalidConfig(msg) if msg.contains("budget_bytes")));

        let err = parse_config("[matcher]\nheaders = [\"bad header\"]").expect_err("bad header");
        assert!(matches!(err, RecorderError::InvalidConfig(msg) if msg.contains("bad header")));

        let err = parse_config("mode = \"sometimes\"").expect_err("bad mode");
        assert!(matches!(err, RecorderError::ConfigParse(_)));

        let err = parse_config("unknown_key = 1").expect_err("unknown key");
        assert!(matches!(err, RecorderError::ConfigParse(_)));
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let err = load_config(Some(&fixture("configs/missing.toml")), &EnvMap::new(), Path::new("/"))
            .expect_err("missing");
        assert!(matches!(err, RecorderError::ConfigParse(msg) if msg.contains("missing.toml")));
    }
}
