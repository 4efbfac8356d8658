//! Scenario Engine: tracks which scenario variables have been bound and
//! advances through the step graph as the learner's answers fill them in
//! (spec §4.4 step 2, §3 Scenario Template).
//!
//! Grounded on the teacher's `DialogueStateTrait` (`dst/mod.rs`): a slot
//! dictionary with pending/confirmed bookkeeping and a `next_best_action`
//! query, generalized here from sales-call slots to scenario variables.

use std::collections::HashMap;

use eloquence_config::{ScenarioStep, ScenarioTemplate};

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Choice(String),
}

#[derive(Clone)]
pub struct ScenarioEngine {
    template: ScenarioTemplate,
    current_step_id: String,
    bound: HashMap<String, VariableValue>,
}

impl ScenarioEngine {
    pub fn new(template: ScenarioTemplate) -> Self {
        let current_step_id = template.first_step_id.clone();
        Self { template, current_step_id, bound: HashMap::new() }
    }

    pub fn current_step(&self) -> &ScenarioStep {
        self.template
            .step(&self.current_step_id)
            .expect("current_step_id always names a step in the loaded template")
    }

    pub fn bind(&mut self, variable: &str, value: VariableValue) {
        self.bound.insert(variable.to_string(), value);
    }

    pub fn value_of(&self, variable: &str) -> Option<&VariableValue> {
        self.bound.get(variable)
    }

    /// True once every variable the current step expects has been bound.
    pub fn current_step_satisfied(&self) -> bool {
        self.current_step()
            .expected_variables
            .iter()
            .all(|v| self.bound.contains_key(v))
    }

    /// Advances to the first successor once the current step's expected
    /// variables are all bound. Returns `false` if the step isn't satisfied
    /// yet or is terminal.
    pub fn advance(&mut self) -> bool {
        if !self.current_step_satisfied() {
            return false;
        }
        let Some(next) = self.current_step().successors.first().cloned() else {
            return false;
        };
        self.current_step_id = next;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.current_step().terminal
    }

    /// The prompt template for the current step with `{variable}` markers
    /// substituted from bound values, for the Dialogue Manager to pass to
    /// the LLM Client as grounding context.
    pub fn render_current_prompt(&self) -> String {
        let mut rendered = self.current_step().prompt_template.clone();
        for (name, value) in &self.bound {
            let marker = format!("{{{name}}}");
            let text = match value {
                VariableValue::Text(s) | VariableValue::Choice(s) => s.clone(),
                VariableValue::Number(n) => n.to_string(),
                VariableValue::Boolean(b) => b.to_string(),
            };
            rendered = rendered.replace(&marker, &text);
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ScenarioTemplate {
        ScenarioTemplate::from_toml_str(
            r#"
            id = "intro-call"
            title = "Cold open practice"
            first_step_id = "greet"

            [[variables]]
            name = "prospect_name"
            type = "text"
            required = true

            [[steps]]
            id = "greet"
            name = "Greeting"
            prompt_template = "Say hello to {prospect_name}."
            expected_variables = ["prospect_name"]
            successors = ["close"]

            [[steps]]
            id = "close"
            name = "Close"
            prompt_template = "Wrap up."
            terminal = true
            "#,
        )
        .unwrap()
    }

    #[test]
    fn does_not_advance_until_expected_variables_bound() {
        let mut engine = ScenarioEngine::new(template());
        assert!(!engine.advance());
        engine.bind("prospect_name", VariableValue::Text("Alice".into()));
        assert!(engine.current_step_satisfied());
        assert!(engine.advance());
        assert_eq!(engine.current_step().id, "close");
        assert!(engine.is_terminal());
    }

    #[test]
    fn renders_prompt_with_bound_variables() {
        let mut engine = ScenarioEngine::new(template());
        engine.bind("prospect_name", VariableValue::Text("Alice".into()));
        assert_eq!(engine.render_current_prompt(), "Say hello to Alice.");
    }
}
