//! Keyword intents recognized on normalized text.

use crate::normalize::{extract_digits, CPF_LEN};

const MENU_COMMAND_DIGIT: &str = "8";

const GREETINGS: &[&str] = &[
    "oi",
    "oie",
    "ola",
    "opa",
    "eai",
    "e ai",
    "bom dia",
    "boa tarde",
    "boa noite",
    "hello",
    "hi",
    "inicio",
    "comecar",
];

const FILLERS: &[&str] = &[
    "ok",
    "okay",
    "blz",
    "beleza",
    "certo",
    "ta",
    "ta bom",
    "ta certo",
    "entendi",
    "obrigado",
    "obrigada",
    "obg",
    "valeu",
    "vlw",
    "show",
    "joia",
    "perfeito",
    "sim",
    "nao",
    "👍",
    "🙏",
];

const HUMAN_REQUESTS: &[&str] = &[
    "atendente",
    "falar com alguem",
    "falar com uma pessoa",
    "quero falar com",
    "pessoa de verdade",
    "humano",
];

fn strip_trailing_punctuation(normalized: &str) -> &str {
    normalized.trim_end_matches(|c: char| matches!(c, '!' | '.' | ',' | '?' | ';' | '~'))
}

/// Literal `8` or any text containing `menu`.
pub fn is_menu_command(normalized: &str) -> bool {
    normalized == MENU_COMMAND_DIGIT || normalized.contains("menu")
}

pub fn is_greeting(normalized: &str) -> bool {
    let text = strip_trailing_punctuation(normalized);
    GREETINGS.contains(&text)
}

pub fn is_filler(normalized: &str) -> bool {
    let text = strip_trailing_punctuation(normalized);
    FILLERS.contains(&text)
}

pub fn asks_for_human(normalized: &str) -> bool {
    HUMAN_REQUESTS
        .iter()
        .any(|phrase| normalized.contains(phrase))
}

pub fn wants_pix(normalized: &str) -> bool {
    normalized == "1" || normalized.contains("pix")
}

pub fn wants_boleto(normalized: &str) -> bool {
    normalized == "2" || normalized.contains("boleto")
}

/// Eleven digits once everything else is dropped.
pub fn looks_like_document(raw: &str) -> bool {
    extract_digits(raw).len() == CPF_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_command_matches_eight_and_menu_substring() {
        assert!(is_menu_command("8"));
        assert!(is_menu_command("menu"));
        assert!(is_menu_command("voltar ao menu principal"));
        assert!(!is_menu_command("88"));
        assert!(!is_menu_command("oi"));
    }

    #[test]
    fn greetings_tolerate_trailing_punctuation() {
        assert!(is_greeting("oi"));
        assert!(is_greeting("bom dia!"));
        assert!(is_greeting("ola."));
        assert!(!is_greeting("oi quero pagar"));
    }

    #[test]
    fn fillers_are_exact_tokens() {
        assert!(is_filler("ok"));
        assert!(is_filler("obrigado!"));
        assert!(is_filler("ta bom"));
        assert!(!is_filler("ok mas minha internet caiu"));
    }

    #[test]
    fn human_requests_are_substring_phrases() {
        assert!(asks_for_human("quero falar com atendente"));
        assert!(asks_for_human("tem algum humano ai"));
        assert!(!asks_for_human("segunda via"));
    }

    #[test]
    fn payment_option_keywords() {
        assert!(wants_pix("1"));
        assert!(wants_pix("quero pagar no pix"));
        assert!(wants_boleto("2"));
        assert!(wants_boleto("manda o boleto"));
        assert!(!wants_pix("2"));
        assert!(!wants_boleto("pix"));
    }

    #[test]
    fn document_detection_uses_digit_count() {
        assert!(looks_like_document("111.444.777-35"));
        assert!(!looks_like_document("1114447773"));
    }
}
