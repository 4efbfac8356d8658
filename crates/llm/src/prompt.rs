//! Prompt assembly for the Dialogue Manager's LLM calls.

use std::fmt;

use eloquence_core::Emotion;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Six emotion-tagged canned fallback phrases used when the LLM call fails
/// or times out (spec §4.4 Failure path).
pub fn fallback_phrase(emotion: Emotion) -> &'static str {
    match emotion {
        Emotion::Neutre => "Je vous écoute, continuez.",
        Emotion::Encouragement => "C'est bien parti, continuez comme ça.",
        Emotion::Empathie => "Je comprends, prenons un instant.",
        Emotion::EnthousiasmeModere => "Très bien, poursuivons.",
        Emotion::Curiosite => "Pouvez-vous m'en dire un peu plus ?",
        Emotion::Reflexion => "Laissez-moi reformuler cela avec vous.",
    }
}

/// Builds the message list for one Dialogue Manager turn from the agent's
/// system prompt template, the current scenario step prompt, and the
/// running conversation history.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    system_prompt: Option<String>,
    history: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn push_history(&mut self, message: Message) -> &mut Self {
        self.history.push(message);
        self
    }

    pub fn build(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_prepends_system_prompt() {
        let mut builder = PromptBuilder::new().with_system_prompt("Tu es Claire.");
        builder.push_history(Message::user("Bonjour"));
        let messages = builder.build();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn fallback_phrases_are_nonempty_for_every_emotion() {
        for emotion in [
            Emotion::Neutre,
            Emotion::Encouragement,
            Emotion::Empathie,
            Emotion::EnthousiasmeModere,
            Emotion::Curiosite,
            Emotion::Reflexion,
        ] {
            assert!(!fallback_phrase(emotion).is_empty());
        }
    }
}
