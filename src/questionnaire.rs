//! Investor-profile questionnaire
//!
//! Pure keyword interpretation of questionnaire answers and the
//! question-by-question script. No network or model calls.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{Horizon, InvestorProfile, ProfileUpdate, RiskLevel};

// Order matters: "muy alto" must win over "alto", "bajo" over everything.
const CONSERVATIVE_WORDS: &[&str] = &["bajo", "conservador", "seguridad", "seguro", "no quiero perder"];
const SUPER_AGGRESSIVE_WORDS: &[&str] = &[
    "muy alto", "super agresivo", "súper agresivo", "máximo riesgo", "maximo riesgo",
];
const MODERATE_WORDS: &[&str] = &["medio", "moderado", "balance", "equilibr"];
const AGGRESSIVE_WORDS: &[&str] = &[
    "alto", "agresivo", "arriesgar", "mucho riesgo", "máxima ganancia", "maxima ganancia",
];

const SHORT_WORDS: &[&str] = &["corto", "meses", "ya mismo", "pronto", "inmediato"];
const LONG_WORDS: &[&str] = &[
    "largo", "más de 3", "mas de 3", "muchos años", "5 años", "10 años",
];
const MEDIUM_WORDS: &[&str] = &["mediano", "año", "años", "1 a 3", "un par", "par de"];

lazy_static! {
    static ref LOSS_NUMBER: Regex = Regex::new(r"(\d+)").unwrap();
}

fn any_of(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn risk_from_text(text: &str) -> Option<RiskLevel> {
    if any_of(text, CONSERVATIVE_WORDS) {
        Some(RiskLevel::Conservador)
    } else if any_of(text, SUPER_AGGRESSIVE_WORDS) {
        Some(RiskLevel::SuperAgresivo)
    } else if any_of(text, MODERATE_WORDS) {
        Some(RiskLevel::Moderado)
    } else if any_of(text, AGGRESSIVE_WORDS) {
        Some(RiskLevel::Agresivo)
    } else {
        None
    }
}

/// First integer in 1..=100, with or without a percent sign
fn max_loss_from_text(text: &str) -> Option<u8> {
    LOSS_NUMBER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .find(|n| (1..=100).contains(n))
        .and_then(|n| u8::try_from(n).ok())
}

fn horizon_from_text(text: &str) -> Option<Horizon> {
    if any_of(text, SHORT_WORDS) {
        Some(Horizon::Short)
    } else if any_of(text, LONG_WORDS) {
        Some(Horizon::Long)
    } else if any_of(text, MEDIUM_WORDS) {
        Some(Horizon::Medium)
    } else {
        None
    }
}

/// Extract answers for the fields still missing in `current`.
///
/// `None` means nothing could be interpreted and the specialist should handle
/// the message.
pub fn interpret(user_text: &str, current: &InvestorProfile) -> Option<ProfileUpdate> {
    let text = user_text.trim().to_lowercase();

    let update = ProfileUpdate {
        risk_level: current.risk_level.is_none().then(|| risk_from_text(&text)).flatten(),
        max_loss_percent: current
            .max_loss_percent
            .is_none()
            .then(|| max_loss_from_text(&text))
            .flatten(),
        horizon: current.horizon.is_none().then(|| horizon_from_text(&text)).flatten(),
    };

    (!update.is_empty()).then_some(update)
}

/// Next unanswered question, or the completion summary
pub fn next_step(profile: &InvestorProfile) -> String {
    if profile.is_complete() {
        return profile_summary(profile);
    }

    match (profile.risk_level, profile.max_loss_percent) {
        (None, _) => "Para armar tu perfil de inversor necesito hacerte unas preguntas.\n\n\
             Empecemos: ¿qué nivel de riesgo aceptás para tus inversiones?\n\n\
             • Bajo: preferís seguridad, aunque la ganancia sea menor.\n\
             • Medio: aceptás algo de riesgo por una ganancia razonable.\n\
             • Alto: estás dispuesto a asumir riesgos importantes por mayor ganancia."
            .to_string(),
        (Some(risk), None) => format!(
            "Perfecto, registré tu nivel de riesgo como {}. \
             Ahora necesito saber: en el peor de los escenarios, \
             ¿cuánto estarías dispuesto a perder de tu inversión inicial? \
             Dame un porcentaje aproximado (ej: 5%, 15%, 30%).",
            risk.label()
        ),
        (Some(_), Some(_)) => "Última pregunta: ¿en cuánto tiempo pensás que vas a necesitar esta plata?\n\n\
             • Corto plazo: menos de 1 año.\n\
             • Mediano plazo: entre 1 y 3 años.\n\
             • Largo plazo: más de 3 años."
            .to_string(),
    }
}

pub fn profile_summary(profile: &InvestorProfile) -> String {
    let risk = profile
        .risk_level
        .map(|r| r.label())
        .unwrap_or("no definido");
    let horizon = profile
        .horizon
        .map(|h| h.label())
        .unwrap_or("no especificado");
    let loss_line = profile
        .max_loss_percent
        .map(|p| format!("• Pérdida máxima aceptada: {}%\n", p))
        .unwrap_or_default();

    format!(
        "¡Listo! Tu perfil de inversor quedó configurado:\n\n\
         • Nivel de riesgo: {}\n\
         {}\
         • Horizonte de inversión: {}\n\n\
         Ahora puedo informarte sobre los productos de inversión disponibles según tu perfil. \
         ¿Querés que te cuente sobre bonos, fondos de inversión, plazo fijo o dólar MEP?",
        risk, loss_line, horizon
    )
}
