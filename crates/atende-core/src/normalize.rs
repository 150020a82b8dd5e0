//! Text normalization and CPF validation.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const CPF_LEN: usize = 11;

/// Decomposes, drops combining marks, lowercases and trims.
///
/// `"  Boléto PÁGO "` becomes `"boleto pago"`.
pub fn normalize(text: &str) -> String {
    strip_diacritics(text).to_lowercase().trim().to_string()
}

pub fn strip_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

pub fn extract_digits(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Single menu digit `1`..=`9`.
pub fn is_menu_digit(normalized: &str) -> bool {
    matches!(normalized.as_bytes(), [b'1'..=b'9'])
}

/// Standard two check-digit mod-11 validation. Eleven repeated digits are
/// always rejected.
pub fn is_valid_cpf(digits: &str) -> bool {
    let bytes = digits.as_bytes();
    if bytes.len() != CPF_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let d: Vec<u32> = bytes.iter().map(|b| u32::from(b - b'0')).collect();
    if d.iter().all(|&x| x == d[0]) {
        return false;
    }

    let check_digit = |len: usize| -> u32 {
        let weight_start = len as u32 + 1;
        let sum: u32 = d[..len]
            .iter()
            .enumerate()
            .map(|(i, &x)| x * (weight_start - i as u32))
            .sum();
        let rest = (sum * 10) % 11;
        if rest == 10 {
            0
        } else {
            rest
        }
    };

    check_digit(9) == d[9] && check_digit(10) == d[10]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_case_and_whitespace() {
        assert_eq!(normalize("  Boléto PÁGO "), "boleto pago");
        assert_eq!(normalize("Olá"), "ola");
        assert_eq!(normalize("AÇÃO"), "acao");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn extract_digits_ignores_punctuation() {
        assert_eq!(extract_digits("111.444.777-35"), "11144477735");
        assert_eq!(extract_digits("meu cpf: 123"), "123");
        assert_eq!(extract_digits("sem numeros"), "");
    }

    #[test]
    fn menu_digits_are_single_one_to_nine() {
        for d in ["1", "5", "9"] {
            assert!(is_menu_digit(d));
        }
        for d in ["0", "10", "", "a", " 1"] {
            assert!(!is_menu_digit(d));
        }
    }

    #[test]
    fn cpf_known_valid_document_passes() {
        assert!(is_valid_cpf("11144477735"));
        assert!(is_valid_cpf("52998224725"));
    }

    #[test]
    fn cpf_with_changed_check_digit_fails() {
        assert!(!is_valid_cpf("11144477736"));
        assert!(!is_valid_cpf("11144477725"));
    }

    #[test]
    fn cpf_of_repeated_digits_fails() {
        assert!(!is_valid_cpf("11111111111"));
        assert!(!is_valid_cpf("00000000000"));
    }

    #[test]
    fn cpf_of_wrong_length_or_non_digits_fails() {
        assert!(!is_valid_cpf("1114447773"));
        assert!(!is_valid_cpf("111444777355"));
        assert!(!is_valid_cpf("111.444.777"));
    }
}
