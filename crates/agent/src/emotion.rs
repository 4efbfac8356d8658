//! Emotion Tagger: resolves the emotion label for a generated agent turn
//! from an inline marker the LLM was prompted to emit, falling back to the
//! lexical heuristic when the marker is absent or unparseable (spec §4.5).

use eloquence_core::Emotion;

const MARKER_PREFIX: &str = "[[emotion:";
const MARKER_SUFFIX: &str = "]]";

/// Strips a leading `[[emotion:xxx]]` marker if present and parses it,
/// returning the cleaned text and resolved emotion. Falls back to
/// [`Emotion::from_heuristic`] on the cleaned text when no marker is found
/// or its value isn't one of the closed labels.
pub fn tag(raw_text: &str) -> (String, Emotion) {
    let trimmed = raw_text.trim_start();
    if let Some(rest) = trimmed.strip_prefix(MARKER_PREFIX) {
        if let Some(end) = rest.find(MARKER_SUFFIX) {
            let label = &rest[..end];
            let remainder = rest[end + MARKER_SUFFIX.len()..].trim_start().to_string();
            if let Some(emotion) = parse_label(label) {
                return (remainder, emotion);
            }
            return (remainder.clone(), Emotion::from_heuristic(&remainder));
        }
    }
    (raw_text.to_string(), Emotion::from_heuristic(raw_text))
}

fn parse_label(label: &str) -> Option<Emotion> {
    match label {
        "neutre" => Some(Emotion::Neutre),
        "encouragement" => Some(Emotion::Encouragement),
        "empathie" => Some(Emotion::Empathie),
        "enthousiasme_modere" => Some(Emotion::EnthousiasmeModere),
        "curiosite" => Some(Emotion::Curiosite),
        "reflexion" => Some(Emotion::Reflexion),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_marker() {
        let (text, emotion) = tag("[[emotion:empathie]] Je comprends.");
        assert_eq!(text, "Je comprends.");
        assert_eq!(emotion, Emotion::Empathie);
    }

    #[test]
    fn falls_back_to_heuristic_on_unknown_label() {
        let (text, emotion) = tag("[[emotion:furieux]] Vraiment?");
        assert_eq!(text, "Vraiment?");
        assert_eq!(emotion, Emotion::Curiosite);
    }

    #[test]
    fn falls_back_to_heuristic_when_no_marker() {
        let (text, emotion) = tag("Bravo!");
        assert_eq!(text, "Bravo!");
        assert_eq!(emotion, Emotion::Encouragement);
    }
}
