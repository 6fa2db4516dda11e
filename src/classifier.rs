//! Fast-path heuristics
//!
//! Rule-based detectors that let triage skip the classification model for
//! unambiguous intents:
//! - Refinance intent: a loan keyword plus either financial context or a long message
//! - Option choice: an explicit reference to a ranked offer ("opción 4", "la 4")
//!
//! All matching runs on folded text (lowercase, accents stripped).

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Static keyword lists, already folded
const LOAN_KEYWORDS: &[&str] = &[
    "refinanc", "prestamo", "credito", "loan", "refinance",
];

const FINANCIAL_CONTEXT_KEYWORDS: &[&str] = &[
    // Debt
    "deuda", "cancelar", "unificar", "saldar", "pagar",
    // Offer terms
    "cuota", "tasa", "interes", "oferta", "monto", "plazo",
    // Cash out
    "sobrante", "efectivo", "plata", "$",
];

const ORDINALS: &[(&str, u8)] = &[
    ("primera", 1),
    ("segunda", 2),
    ("tercera", 3),
    ("cuarta", 4),
    ("quinta", 5),
    ("sexta", 6),
];

lazy_static! {
    /// "opción 4", "nro 2": an explicit option word anywhere in the message.
    /// Group 2 catches percentages and dates, which are not choices.
    static ref OPTION_NUMBER: Regex = Regex::new(
        r"\b(?:opcion|option|nro\.?|numero|num\.?)\s*#?\s*(\d{1,2})\b(\s*%|\s*por\s*ciento|\s*/\s*\d|\s+de\s+(?:enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|setiembre|octubre|noviembre|diciembre|\d))?"
    )
    .unwrap();
    /// "la 2", "me quedo con el 3": bare numbers only count as the whole reply
    static ref SHORT_REPLY: Regex = Regex::new(
        r"^(?:(?:me\s+quedo\s+con|quiero|elijo|prefiero|acepto)\s+)?(?:la|el)\s+(?:opcion\s+)?#?\s*(\d{1,2})\s*(?:,?\s*por\s+favor)?\s*[.!]*$"
    )
    .unwrap();
    static ref OPTION_ORDINAL: Regex =
        Regex::new(r"\b(?:opcion\s+(primera|segunda|tercera|cuarta|quinta|sexta)|(primera|segunda|tercera|cuarta|quinta|sexta)\s+opcion)\b").unwrap();
    static ref SHORT_ORDINAL_REPLY: Regex = Regex::new(
        r"^(?:(?:me\s+quedo\s+con|quiero|elijo|prefiero|acepto)\s+)?la\s+(primera|segunda|tercera|cuarta|quinta|sexta)(?:\s+opcion)?\s*(?:,?\s*por\s+favor)?\s*[.!]*$"
    )
    .unwrap();
}

/// Lowercase and strip combining accents ("Préstamo" → "prestamo")
pub fn fold_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Loan keyword AND (financial context OR longer than `min_len` chars)
pub fn is_refinance_intent(text: &str, min_len: usize) -> bool {
    let folded = fold_text(text);

    let has_loan_keyword = LOAN_KEYWORDS.iter().any(|kw| folded.contains(kw));
    if !has_loan_keyword {
        return false;
    }

    FINANCIAL_CONTEXT_KEYWORDS.iter().any(|kw| folded.contains(kw))
        || folded.chars().count() > min_len
}

/// 1-based option number referenced by the message, if any.
///
/// A bare "la 4" only counts when it is the whole reply; inside a longer
/// message it is usually a date ("el 3 de marzo"). Percentages are not choices.
pub fn option_choice(text: &str) -> Option<u8> {
    let folded = fold_text(text);
    let reply = folded.trim();

    for caps in OPTION_NUMBER.captures_iter(&folded) {
        if caps.get(2).is_some() {
            continue;
        }
        if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u8>().ok()) {
            if n >= 1 {
                return Some(n);
            }
        }
    }

    if let Some(n) = SHORT_REPLY
        .captures(reply)
        .and_then(|caps| caps.get(1)?.as_str().parse::<u8>().ok())
    {
        return (n >= 1).then_some(n);
    }

    let ordinal = OPTION_ORDINAL
        .captures(&folded)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .or_else(|| SHORT_ORDINAL_REPLY.captures(reply).and_then(|caps| caps.get(1)))?;
    ORDINALS
        .iter()
        .find(|(w, _)| *w == ordinal.as_str())
        .map(|(_, n)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("Refinanciación PRÉSTAMO"), "refinanciacion prestamo");
        assert_eq!(fold_text("año"), "ano");
    }

    #[test]
    fn test_refinance_intent_with_context() {
        let cases = vec![
            "quiero refinanciar mis préstamos y unificar la deuda",
            "cuánto me sobra si unifico el préstamo y bajo la cuota",
            "Quiero refinanciar, ¿qué tasa me dan?",
        ];
        for c in cases {
            assert!(is_refinance_intent(c, 50), "{}", c);
        }
    }

    #[test]
    fn test_refinance_intent_needs_loan_keyword() {
        assert!(!is_refinance_intent("cuánto es la cuota de la tarjeta", 50));
        assert!(!is_refinance_intent("hola, buenas tardes", 50));
    }

    #[test]
    fn test_refinance_intent_length_threshold() {
        let short = "tengo un crédito";
        assert!(!is_refinance_intent(short, 50));

        let long = "hola, tengo un crédito con ustedes y me gustaría que alguien me explique qué opciones tengo";
        assert!(is_refinance_intent(long, 50));
    }

    #[test]
    fn test_option_choice() {
        assert_eq!(option_choice("la opción 4"), Some(4));
        assert_eq!(option_choice("Me quedo con la 2"), Some(2));
        assert_eq!(option_choice("option #3 please"), Some(3));
        assert_eq!(option_choice("quiero la tercera"), Some(3));
    }

    #[test]
    fn test_option_choice_rejects_percentages_and_noise() {
        assert_eq!(option_choice("acepto perder el 10%"), None);
        assert_eq!(option_choice("el 15 por ciento"), None);
        assert_eq!(option_choice("hola, cómo están"), None);
        assert_eq!(option_choice("la opción 0"), None);
    }

    #[test]
    fn test_option_choice_ignores_dates_in_longer_messages() {
        assert_eq!(option_choice("me debitaron dos veces el 3 de marzo"), None);
        assert_eq!(option_choice("la transferencia que hice el 15 no llegó"), None);
        assert_eq!(option_choice("el pago del 12/04 figura dos veces"), None);
        assert_eq!(option_choice("es la primera vez que me pasa"), None);
        assert_eq!(option_choice("la opción 2 de marzo"), None);
    }

    #[test]
    fn test_option_choice_short_replies() {
        assert_eq!(option_choice("La 3."), Some(3));
        assert_eq!(option_choice("elijo el 1, por favor"), Some(1));
        assert_eq!(option_choice("la segunda opción"), Some(2));
        assert_eq!(option_choice("me quedo con la opción número 4"), Some(4));
    }

    #[test]
    fn test_fast_path_detection_is_deterministic() {
        let text = "la opción 4";
        assert_eq!(option_choice(text), option_choice(text));
        assert_eq!(is_refinance_intent(text, 50), is_refinance_intent(text, 50));
    }
}
