use crate::errors::RecorderError;
use crate::store::InteractionStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const MODE_ENV_VAR: &str = "HTTP_RECORDER_MODE";

pub type EnvMap = BTreeMap<String, String>;

/// Declared execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderMode {
    /// Replay when an archive exists for the interaction, record otherwise.
    #[default]
    Auto,
    Record,
    Replay,
    Passthrough,
}

impl RecorderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Record => "record",
            Self::Replay => "replay",
            Self::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for RecorderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecorderMode {
    type Err = RecorderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "record" => Ok(Self::Record),
            "replay" => Ok(Self::Replay),
            "passthrough" => Ok(Self::Passthrough),
            other => Err(RecorderError::InvalidConfig(format!(
                "unknown recorder mode {other:?}; expected auto, record, replay or passthrough"
            ))),
        }
    }
}

/// Mode actually used for the lifetime of one recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveMode {
    Passthrough,
    Record,
    Replay,
}

impl EffectiveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Record => "record",
            Self::Replay => "replay",
        }
    }
}

/// Snapshot of the process environment; non-UTF-8 entries are skipped.
pub fn process_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// The override named by `HTTP_RECORDER_MODE`. Unparseable values are ignored.
pub fn mode_override(env: &EnvMap) -> Option<RecorderMode> {
    env.get(MODE_ENV_VAR)
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| value.parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Fixed(EffectiveMode),
    ByArchiveExistence,
}

/// Precedence: override, then `Auto`, then the declared mode.
pub fn resolution(declared: RecorderMode, override_mode: Option<RecorderMode>) -> Resolution {
    match override_mode.unwrap_or(declared) {
        RecorderMode::Auto => Resolution::ByArchiveExistence,
        RecorderMode::Record => Resolution::Fixed(EffectiveMode::Record),
        RecorderMode::Replay => Resolution::Fixed(EffectiveMode::Replay),
        RecorderMode::Passthrough => Resolution::Fixed(EffectiveMode::Passthrough),
    }
}

pub async fn resolve_effective_mode(
    declared: RecorderMode,
    override_mode: Option<RecorderMode>,
    name: &str,
    store: &dyn InteractionStore,
) -> Result<EffectiveMode, RecorderError> {
    match resolution(declared, override_mode) {
        Resolution::Fixed(mode) => Ok(mode),
        Resolution::ByArchiveExistence => {
            if store.exists(name).await? {
                Ok(EffectiveMode::Replay)
            } else {
                Ok(EffectiveMode::Record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Interaction;
    use async_trait::async_trait;

    struct Existing(bool);

    #[async_trait]
    impl InteractionStore for Existing {
        async fn exists(&self, _name: &str) -> Result<bool, RecorderError> {
            Ok(self.0)
        }

        async fn load(&self, name: &str) -> Result<Interaction, RecorderError> {
            Ok(Interaction::new(name))
        }

        async fn store(&self, interaction: Interaction) -> Result<Interaction, RecorderError> {
            Ok(interaction)
        }
    }

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("Replay".parse::<RecorderMode>().expect("mode"), RecorderMode::Replay);
        assert_eq!(" PASSTHROUGH ".parse::<RecorderMode>().expect("mode"), RecorderMode::Passthrough);
        assert!(matches!(
            "sometimes".parse::<RecorderMode>(),
            Err(RecorderError::InvalidConfig(msg)) if msg.contains("sometimes")
        ));
    }

    #[test]
    fn override_comes_from_the_injected_environment() {
        let mut env = EnvMap::new();
        assert_eq!(mode_override(&env), None);
        env.insert(MODE_ENV_VAR.to_string(), "record".to_string());
        assert_eq!(mode_override(&env), Some(RecorderMode::Record));
        env.insert(MODE_ENV_VAR.to_string(), "bogus".to_string());
        assert_eq!(mode_override(&env), None);
    }

    #[tokio::test]
    async fn override_beats_declared_record() {
        let mode = resolve_effective_mode(
            RecorderMode::Record,
            Some(RecorderMode::Replay),
            "x",
            &Existing(false),
        )
        .await
        .expect("mode");
        assert_eq!(mode, EffectiveMode::Replay);
    }

    #[tokio::test]
    async fn auto_follows_archive_existence() {
        let absent = resolve_effective_mode(RecorderMode::Auto, None, "x", &Existing(false))
            .await
            .expect("mode");
        let present = resolve_effective_mode(RecorderMode::Auto, None, "x", &Existing(true))
            .await
            .expect("mode");
        assert_eq!(absent, EffectiveMode::Record);
        assert_eq!(present, EffectiveMode::Replay);
    }

    #[tokio::test]
    async fn auto_override_falls_back_to_existence() {
        let mode = resolve_effective_mode(
            RecorderMode::Record,
            Some(RecorderMode::Auto),
            "x",
            &Existing(true),
        )
        .await
        .expect("mode");
        assert_eq!(mode, EffectiveMode::Replay);
    }

    #[test]
    fn declared_mode_applies_without_override() {
        assert_eq!(
            resolution(RecorderMode::Replay, None),
            Resolution::Fixed(EffectiveMode::Replay)
        );
        assert_eq!(
            resolution(RecorderMode::Replay, Some(RecorderMode::Passthrough)),
            Resolution::Fixed(EffectiveMode::Passthrough)
        );
    }
}
