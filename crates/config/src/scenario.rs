//! Scenario Template loading (spec §3, §4.4 step 2).
//!
//! Static content describing a coaching scenario as a small directed graph
//! of steps plus the variables the Dialogue Manager and Scenario Engine
//! bind as the learner progresses. Grounded on the same
//! deserialize-then-`validate()` shape the rest of this crate uses for
//! [`crate::settings::Settings`], rather than the YAML-domain-config
//! machinery the teacher used for its sales scenarios.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    Number,
    Boolean,
    Choice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    /// Valid only when `kind == Choice`.
    #[serde(default)]
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub id: String,
    pub name: String,
    pub prompt_template: String,
    #[serde(default)]
    pub expected_variables: Vec<String>,
    #[serde(default)]
    pub successors: Vec<String>,
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub id: String,
    pub title: String,
    pub first_step_id: String,
    #[serde(default)]
    pub variables: Vec<ScenarioVariable>,
    pub steps: Vec<ScenarioStep>,
}

impl ScenarioTemplate {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let template: ScenarioTemplate =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    pub fn step(&self, id: &str) -> Option<&ScenarioStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn first_step(&self) -> Option<&ScenarioStep> {
        self.step(&self.first_step_id)
    }

    /// Checks the graph is internally consistent: a unique first step, no
    /// duplicate step ids, and every successor/expected-variable reference
    /// resolves (spec §3 "Scenario Template" invariants).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::MissingField("scenario.steps".into()));
        }

        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if !seen_ids.insert(step.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "scenario.steps[].id".into(),
                    message: format!("duplicate step id `{}`", step.id),
                });
            }
        }

        if !seen_ids.contains(self.first_step_id.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "scenario.first_step_id".into(),
                message: format!("`{}` is not a known step id", self.first_step_id),
            });
        }

        let var_names: HashSet<&str> = self.variables.iter().map(|v| v.name.as_str()).collect();
        for step in &self.steps {
            for successor in &step.successors {
                if !seen_ids.contains(successor.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("scenario.steps[{}].successors", step.id),
                        message: format!("unknown successor `{successor}`"),
                    });
                }
            }
            for variable in &step.expected_variables {
                if !var_names.contains(variable.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("scenario.steps[{}].expected_variables", step.id),
                        message: format!("unknown variable `{variable}`"),
                    });
                }
            }
            if !step.terminal && step.successors.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("scenario.steps[{}].successors", step.id),
                    message: "non-terminal step must declare at least one successor".into(),
                });
            }
        }

        for variable in &self.variables {
            if variable.kind == VariableType::Choice && variable.choices.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("scenario.variables[{}].choices", variable.name),
                    message: "choice variable must declare at least one choice".into(),
                });
            }
        }

        Ok(())
    }
}
