//! Локальное сокращение текста реплики
//!
//! Используется, когда внешний сокращатель не настроен, отказал или вернул
//! текст без изменений.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::FitConfig;
use crate::timeline::time::Millis;

lazy_static! {
    /// Ведущая режиссерская пометка: `[whispering]` или `(laughs)`
    static ref LEADING_TAG_RE: Regex = Regex::new(r"^\s*(\[[^\]]*\]|\([^)]*\))\s*").unwrap();
}

/// Служебные слова, на которых фраза не должна обрываться
const DANGLING_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "so", "to", "of", "for", "with", "in", "on", "at", "by", "from",
    "your", "our", "my", "their", "that", "because", "than", "as", "is", "are",
];

const SENTENCE_END: &[char] = &['.', '!', '?', '…'];

/// Сократить текст до бюджета слов и концов предложений
///
/// Возвращает исходный текст (без лишних пробелов), если сокращать нечего.
pub fn shorten_locally(
    text: &str,
    slot: Millis,
    max_words: usize,
    max_sentence_endings: usize,
    config: &FitConfig,
) -> String {
    let mut current = text.trim().to_string();
    if slot < config.tight_slot {
        let stripped = LEADING_TAG_RE.replace(&current, "").to_string();
        if !stripped.trim().is_empty() {
            current = stripped;
        }
    }

    let mut tokens: Vec<String> = current.split_whitespace().map(String::from).collect();
    if tokens.is_empty() {
        return current;
    }
    let max_words = max_words.max(1);

    demote_sentence_endings(&mut tokens, max_sentence_endings.max(1));

    // Отбрасываем хвостовые придаточные по запятым
    while count_words(&tokens) > max_words {
        let last = tokens.len() - 1;
        match tokens[..last].iter().rposition(|t| t.ends_with(',')) {
            Some(i) => tokens.truncate(i + 1),
            None => break,
        }
    }

    if count_words(&tokens) > max_words {
        truncate_to_words(&mut tokens, max_words);
    }

    while tokens.len() > 1 && is_dangling(&tokens[tokens.len() - 1]) {
        tokens.pop();
    }

    ensure_terminal_punctuation(&mut tokens);
    tokens.join(" ")
}

/// Число слов в токенах (токены из одной пунктуации не считаются)
fn count_words(tokens: &[String]) -> usize {
    tokens.iter().filter(|t| t.chars().any(char::is_alphanumeric)).count()
}

/// Заменить концы предложений сверх разрешенного количества на запятые
///
/// Последнее предложение тоже считается, поэтому внутри текста остается
/// не больше `max_endings - 1` концов.
fn demote_sentence_endings(tokens: &mut [String], max_endings: usize) {
    let last = tokens.len().saturating_sub(1);
    let mut kept = 0;
    for token in tokens.iter_mut().take(last) {
        if !token.ends_with(SENTENCE_END) {
            continue;
        }
        if kept + 1 < max_endings {
            kept += 1;
            continue;
        }
        let base = token.trim_end_matches(SENTENCE_END).to_string();
        *token = format!("{},", base);
    }
}

fn truncate_to_words(tokens: &mut Vec<String>, max_words: usize) {
    let mut words = 0;
    let mut keep = tokens.len();
    for (i, token) in tokens.iter().enumerate() {
        if token.chars().any(char::is_alphanumeric) {
            words += 1;
            if words == max_words {
                keep = i + 1;
                break;
            }
        }
    }
    tokens.truncate(keep);
}

fn is_dangling(token: &str) -> bool {
    let bare: String = token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase();
    DANGLING_WORDS.contains(&bare.as_str())
}

fn ensure_terminal_punctuation(tokens: &mut [String]) {
    if let Some(last) = tokens.last_mut() {
        let trimmed = last.trim_end_matches(|c: char| matches!(c, ',' | ';' | ':' | '-' | '—')).to_string();
        *last = if trimmed.ends_with(SENTENCE_END) || trimmed.ends_with('"') {
            trimmed
        } else {
            format!("{}.", trimmed)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FitConfig {
        FitConfig::default()
    }

    #[test]
    fn demotes_extra_sentence_endings() {
        let text = "Fresh beans. Roasted daily. Delivered before sunrise.";
        let short = shorten_locally(text, Millis::from_secs(2), 100, 1, &config());
        assert_eq!(short, "Fresh beans, Roasted daily, Delivered before sunrise.");
    }

    #[test]
    fn drops_trailing_clauses_before_truncating() {
        let text = "Fresh beans, roasted daily, delivered to your door before sunrise.";
        let short = shorten_locally(text, Millis::from_secs(2), 5, 1, &config());
        assert_eq!(short, "Fresh beans, roasted daily.");
    }

    #[test]
    fn hard_truncates_and_strips_dangling_words() {
        let text = "Grab a cup of the boldest roast in town today";
        let short = shorten_locally(text, Millis::from_secs(3), 5, 1, &config());
        assert_eq!(short, "Grab a cup.");
    }

    #[test]
    fn strips_leading_tag_only_in_tight_slots() {
        let text = "[excited] Morning rush!";
        assert_eq!(shorten_locally(text, Millis::from_ms(1200), 10, 1, &config()), "Morning rush!");
        assert_eq!(shorten_locally(text, Millis::from_secs(3), 10, 1, &config()), "[excited] Morning rush!");
    }

    #[test]
    fn short_text_is_unchanged() {
        let text = "Hello world.";
        assert_eq!(shorten_locally(text, Millis::from_secs(3), 5, 1, &config()), text);
    }
}
