//! Приведение имен говорящих к каноническому виду
//!
//! Планировщик пишет говорящих свободным текстом ("Maya, at the docks",
//! "VO", "Sam (whispering)"). Для выбора сцен и голосов нужны стабильные имена
//! из реестра персонажей.

use lazy_static::lazy_static;
use regex::Regex;

use crate::timeline::model::NARRATOR;

lazy_static! {
    /// Разделители, после которых идет описательное уточнение
    static ref CLAUSE_RE: Regex = Regex::new(r"\s*(,|\(|\[|\s-\s|\s—\s|:).*$").unwrap();
}

const NARRATOR_ALIASES: &[&str] = &["narrator", "voiceover", "voice-over", "voice over", "vo", "v.o."];

/// Является ли имя псевдонимом закадрового голоса
pub fn is_narrator_alias(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    NARRATOR_ALIASES.contains(&lowered.as_str())
}

fn registry_match<'a>(name: &str, registry: &'a [String]) -> Option<&'a String> {
    let name = name.trim().to_lowercase();
    registry.iter().find(|known| known.to_lowercase() == name)
}

/// Отбросить описательное уточнение после имени
pub fn strip_clause(raw: &str) -> String {
    CLAUSE_RE.replace(raw.trim(), "").trim().to_string()
}

/// Привести имя говорящего к каноническому виду
///
/// Порядок: псевдонимы рассказчика, точное совпадение с реестром, имя без
/// уточнения, первое слово.
pub fn canonicalize(raw: &str, registry: &[String]) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_narrator_alias(trimmed) {
        return NARRATOR.to_string();
    }
    if let Some(known) = registry_match(trimmed, registry) {
        return known.clone();
    }

    let stripped = strip_clause(trimmed);
    if !stripped.is_empty() {
        if is_narrator_alias(&stripped) {
            return NARRATOR.to_string();
        }
        if let Some(known) = registry_match(&stripped, registry) {
            return known.clone();
        }
    }

    let base = if stripped.is_empty() { trimmed } else { stripped.as_str() };
    let first = base
        .split_whitespace()
        .next()
        .unwrap_or(base)
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-');
    if is_narrator_alias(first) {
        return NARRATOR.to_string();
    }
    match registry_match(first, registry) {
        Some(known) => known.clone(),
        None if first.is_empty() => NARRATOR.to_string(),
        None => first.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Vec<String> {
        vec!["Maya".to_string(), "Captain Reyes".to_string(), "Sam".to_string()]
    }

    #[test]
    fn narrator_aliases() {
        assert_eq!(canonicalize("VO", &registry()), "Narrator");
        assert_eq!(canonicalize("voiceover", &registry()), "Narrator");
        assert_eq!(canonicalize("NARRATOR (warm)", &registry()), "Narrator");
        assert_eq!(canonicalize("", &registry()), "Narrator");
    }

    #[test]
    fn exact_registry_match_keeps_registry_spelling() {
        assert_eq!(canonicalize("captain reyes", &registry()), "Captain Reyes");
        assert_eq!(canonicalize("Sam", &registry()), "Sam");
    }

    #[test]
    fn strips_descriptive_clauses() {
        assert_eq!(canonicalize("Maya, at the docks", &registry()), "Maya");
        assert_eq!(canonicalize("Captain Reyes (on radio)", &registry()), "Captain Reyes");
        assert_eq!(canonicalize("Sam - whispering", &registry()), "Sam");
    }

    #[test]
    fn falls_back_to_first_token() {
        assert_eq!(canonicalize("Maya Lopez", &registry()), "Maya");
        assert_eq!(canonicalize("Barista Joe", &registry()), "Barista");
    }
}
