//! Splits agent text into sentence-sized chunks for incremental synthesis
//! and dispatch, so audio starts playing before the whole turn is generated.

/// No utterance unit handed to synthesis exceeds this many characters
/// (spec §4.7 stage 1), so a single oversized sentence still yields
/// several small synthesis calls instead of one long one.
const MAX_CHUNK_CHARS: usize = 200;

/// Splits on sentence-ending punctuation, keeping the delimiter attached to
/// its sentence, then further splits any unit over [`MAX_CHUNK_CHARS`] on
/// whitespace. Falls back to the whole text as one chunk if no punctuation
/// is found.
pub fn split_into_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                chunks.extend(split_to_max_len(trimmed));
            }
            current.clear();
        }
    }

    let remainder = current.trim();
    if !remainder.is_empty() {
        chunks.extend(split_to_max_len(remainder));
    }

    if chunks.is_empty() {
        chunks.extend(split_to_max_len(text.trim()));
    }

    chunks
}

/// Splits `unit` on word boundaries into pieces of at most
/// [`MAX_CHUNK_CHARS`] characters. A single word longer than the cap is
/// hard-split at a char boundary rather than left oversized.
fn split_to_max_len(unit: &str) -> Vec<String> {
    if unit.chars().count() <= MAX_CHUNK_CHARS {
        return vec![unit.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in unit.split_whitespace() {
        let candidate_len = if current.is_empty() { word.chars().count() } else { current.chars().count() + 1 + word.chars().count() };

        if candidate_len > MAX_CHUNK_CHARS && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if word.chars().count() > MAX_CHUNK_CHARS {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            for hard_chunk in hard_split(word, MAX_CHUNK_CHARS) {
                pieces.push(hard_chunk);
            }
            continue;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Hard-splits `word` into char-boundary-safe pieces of at most `max_len`
/// characters (used only when a single word exceeds the cap on its own).
fn hard_split(word: &str, max_len: usize) -> Vec<String> {
    word.chars()
        .collect::<Vec<char>>()
        .chunks(max_len)
        .map(|chars| chars.iter().collect())
        .collect()
}
