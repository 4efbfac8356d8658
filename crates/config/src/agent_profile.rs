//! Agent Profile: static per-coach identity loaded once at session start
//! (spec §3 "Agent Profile").

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub display_name: String,
    pub system_prompt_template: String,
    pub voice_id: String,
    #[serde(default = "default_emotion")]
    pub default_emotion: String,
}

fn default_emotion() -> String {
    "neutre".to_string()
}

impl AgentProfile {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let profile: AgentProfile =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField("agent_profile.id".into()));
        }
        if self.system_prompt_template.is_empty() {
            return Err(ConfigError::MissingField(
                "agent_profile.system_prompt_template".into(),
            ));
        }
        if self.voice_id.is_empty() {
            return Err(ConfigError::MissingField("agent_profile.voice_id".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_profile() {
        let raw = r#"
        id = "coach-fr-01"
        display_name = "Claire"
        system_prompt_template = "Tu es Claire, une coach vocale."
        voice_id = "fr-FR-Standard-A"
        "#;
        let profile = AgentProfile::from_toml_str(raw).unwrap();
        assert_eq!(profile.default_emotion, "neutre");
    }

    #[test]
    fn rejects_missing_voice_id() {
        let raw = r#"
        id = "coach-fr-01"
        display_name = "Claire"
        system_prompt_template = "Tu es Claire."
        voice_id = ""
        "#;
        assert!(AgentProfile::from_toml_str(raw).is_err());
    }
}
