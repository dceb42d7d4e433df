//! Call configuration
//!
//! [`CallConfig`] is read from TOML (a string or a file) with every field
//! optional. A [`Phone`](crate::Phone) freezes its configuration at build
//! time and resolves options that depend on the attached collaborators.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};

/// What a bound key does when pressed on the primary call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    /// Key down flips the mute state, key up flips it back
    PushToTalk,
    /// Key is bound but does nothing
    Nothing,
}

/// A single key binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBinding {
    pub enabled: bool,
    pub action: KeyAction,
}

impl Default for KeyBinding {
    fn default() -> Self {
        Self {
            enabled: true,
            action: KeyAction::PushToTalk,
        }
    }
}

/// Key bindings honoured while a call is primary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub spacebar: KeyBinding,
}

/// Call behaviour options, captured by every call at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Route remote audio through the audio-mixing provider instead of the sinks
    pub use_audio_context: bool,
    /// React to key events while primary
    pub global_key_shortcuts: bool,
    /// Mute outbound audio once the session starts connecting
    pub start_with_audio_muted: bool,
    /// Mute outbound video once the session starts connecting
    pub start_with_video_muted: bool,
    /// Key bindings
    pub keys: KeyBindings,
    /// Advertised in the `User-Agent` header when accepting a session
    pub user_agent: Option<String>,
}

impl CallConfig {
    /// Create a new call configuration with defaults
    pub fn new() -> Self {
        Self {
            use_audio_context: false,
            global_key_shortcuts: true,
            start_with_audio_muted: false,
            start_with_video_muted: false,
            keys: KeyBindings::default(),
            user_agent: None,
        }
    }

    /// Parse a configuration from TOML; missing fields take their defaults
    pub fn from_toml_str(source: &str) -> CallResult<Self> {
        toml::from_str(source).map_err(|e| CallError::InvalidConfiguration {
            reason: e.to_string(),
        })
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CallResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| CallError::ConfigurationIo {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&source)
    }

    /// Resolve options that depend on which collaborators exist.
    ///
    /// The audio context can only be used when an audio-mixing provider is attached.
    pub fn effective(mut self, has_mixer: bool) -> Self {
        self.use_audio_context = self.use_audio_context && has_mixer;
        self
    }

    pub fn with_audio_context(mut self, enabled: bool) -> Self {
        self.use_audio_context = enabled;
        self
    }

    pub fn with_key_shortcuts(mut self, enabled: bool) -> Self {
        self.global_key_shortcuts = enabled;
        self
    }

    pub fn with_start_muted(mut self, audio: bool, video: bool) -> Self {
        self.start_with_audio_muted = audio;
        self.start_with_video_muted = video;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_spacebar(mut self, binding: KeyBinding) -> Self {
        self.keys.spacebar = binding;
        self
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert!(!config.use_audio_context);
        assert!(config.global_key_shortcuts);
        assert!(!config.start_with_audio_muted);
        assert!(!config.start_with_video_muted);
        assert!(config.keys.spacebar.enabled);
        assert_eq!(config.keys.spacebar.action, KeyAction::PushToTalk);
        assert_eq!(config.user_agent, None);
    }

    #[test]
    fn test_partial_toml() {
        let config = CallConfig::from_toml_str(
            r#"
            start_with_audio_muted = true
            user_agent = "Softphone/1.0"

            [keys.spacebar]
            enabled = false
            "#,
        )
        .unwrap();

        assert!(config.start_with_audio_muted);
        assert!(!config.start_with_video_muted);
        assert_eq!(config.user_agent.as_deref(), Some("Softphone/1.0"));
        assert!(config.global_key_shortcuts);
        assert!(!config.keys.spacebar.enabled);
        assert_eq!(config.keys.spacebar.action, KeyAction::PushToTalk);
    }

    #[test]
    fn test_invalid_toml() {
        let result = CallConfig::from_toml_str("use_audio_context = \"yes\"");
        assert!(matches!(result, Err(CallError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = CallConfig::from_file("/nonexistent/call.toml");
        assert!(matches!(result, Err(CallError::ConfigurationIo { .. })));
    }

    #[test]
    fn test_audio_context_requires_mixer() {
        let config = CallConfig::new().with_audio_context(true);
        assert!(!config.clone().effective(false).use_audio_context);
        assert!(config.effective(true).use_audio_context);
    }
}
