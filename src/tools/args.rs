//! Tool-argument decoding
//!
//! Models emit tool arguments in several shapes: a plain object, an object
//! wrapped under a single key (`__arg1`, `args`, ...), a JSON document inside a
//! string, or a bare scalar. Everything goes through `ToolArgs::decode` and
//! comes out as one `ToolFields` value; call sites never inspect raw keys.

use serde_json::{Map, Value};

use crate::models::{Horizon, RiskLevel};

/// Keys under which a model may nest the real argument object
const WRAPPER_KEYS: &[&str] = &["__arg1", "args", "arguments", "input", "payload", "kwargs"];

const MAX_UNWRAP_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    RawDict(Map<String, Value>),
    RawJsonString(String),
    RawScalar(Value),
}

/// Normalized tool arguments; every field is optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolFields {
    pub customer_id: Option<String>,
    pub source_loan_ids: Option<Vec<String>>,
    /// 1-based index into the ranked refinance options
    pub option_index: Option<usize>,
    pub amount: Option<f64>,
    pub quotas: Option<u32>,
    pub rate: Option<f64>,
    pub expected_cash_out: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub max_loss_percent: Option<u8>,
    pub horizon: Option<Horizon>,
    /// A bare non-object argument (usually a customer id)
    pub scalar: Option<String>,
}

impl ToolArgs {
    pub fn classify(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => ToolArgs::RawDict(map.clone()),
            Value::String(s) if s.trim_start().starts_with('{') => {
                ToolArgs::RawJsonString(s.clone())
            }
            other => ToolArgs::RawScalar(other.clone()),
        }
    }

    pub fn decode(raw: &Value) -> ToolFields {
        Self::classify(raw).into_fields()
    }

    pub fn into_fields(self) -> ToolFields {
        let (map, scalar) = self.flatten(0);
        let mut fields = ToolFields::from_map(&map);
        fields.scalar = scalar;
        fields
    }

    /// Unwrap to one camelCase object plus an optional scalar
    fn flatten(self, depth: usize) -> (Map<String, Value>, Option<String>) {
        match self {
            ToolArgs::RawDict(map) => {
                let mut outer = Map::new();
                let mut inner: Option<(Map<String, Value>, Option<String>)> = None;

                for (key, value) in map {
                    if depth < MAX_UNWRAP_DEPTH
                        && inner.is_none()
                        && WRAPPER_KEYS.contains(&key.as_str())
                        && (value.is_object() || value.is_string())
                    {
                        inner = Some(ToolArgs::classify(&value).flatten(depth + 1));
                    } else {
                        outer.insert(camel_case(&key), value);
                    }
                }

                match inner {
                    // Inner fields win; outer keys fill the gaps
                    Some((mut merged, scalar)) => {
                        for (key, value) in outer {
                            merged.entry(key).or_insert(value);
                        }
                        (merged, scalar)
                    }
                    None => (outer, None),
                }
            }
            ToolArgs::RawJsonString(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => ToolArgs::RawDict(map).flatten(depth + 1),
                _ => (Map::new(), Some(text.trim().to_string())),
            },
            ToolArgs::RawScalar(value) => (Map::new(), scalar_string(&value)),
        }
    }
}

impl ToolFields {
    fn from_map(map: &Map<String, Value>) -> Self {
        let pick = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()));

        Self {
            customer_id: pick(&["customerId", "clientId"]).and_then(scalar_string),
            source_loan_ids: pick(&["sourceLoanIds", "loanIds", "sourceLoans", "loans"]).map(string_list),
            option_index: pick(&["optionIndex", "option", "selectedOption", "optionNumber"])
                .and_then(lenient_f64)
                .filter(|n| *n >= 1.0)
                .map(|n| n.round() as usize),
            amount: pick(&["offeredAmount", "amount", "maxAmount"]).and_then(lenient_f64),
            quotas: pick(&["selectedQuotas", "quotas", "maxQuotas"]).and_then(lenient_u32),
            rate: pick(&["appliedRate", "rate", "monthlyRate"]).and_then(lenient_f64),
            expected_cash_out: pick(&["expectedCashOut", "cashOut"]).and_then(lenient_f64),
            risk_level: pick(&["riskLevel"])
                .and_then(Value::as_str)
                .and_then(RiskLevel::parse_loose),
            max_loss_percent: pick(&["maxLossPercent", "maxLoss"])
                .and_then(lenient_f64)
                .filter(|n| (0.0..=100.0).contains(n))
                .map(|n| n.round() as u8),
            horizon: pick(&["horizon"])
                .and_then(Value::as_str)
                .and_then(Horizon::parse_loose),
            scalar: None,
        }
    }
}

/// `source_loan_ids` → `sourceLoanIds`; camelCase keys pass through
pub fn camel_case(key: &str) -> String {
    if !key.contains('_') || key.starts_with("__") {
        return key.to_string();
    }

    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Array(_)) => string_list(&parsed),
            _ => s
                .split(',')
                .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                .filter(|part| !part.is_empty())
                .collect(),
        },
        other => scalar_string(other).into_iter().collect(),
    }
}

/// Numbers, or strings like "$150.000,50", "85%", "120000"
fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, '$' | '%' | ' ' | '\u{a0}'))
                .collect();
            let cleaned = if cleaned.contains(',') && cleaned.contains('.') {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', ".")
            };
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn lenient_u32(value: &Value) -> Option<u32> {
    lenient_f64(value)
        .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_snake_case_object() {
        let fields = ToolArgs::decode(&json!({
            "customer_id": "C1",
            "source_loan_ids": ["a", "b"],
            "offered_amount": 300000,
            "selected_quotas": 36,
            "applied_rate": "75.5%"
        }));

        assert_eq!(fields.customer_id.as_deref(), Some("C1"));
        assert_eq!(fields.source_loan_ids, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(fields.amount, Some(300000.0));
        assert_eq!(fields.quotas, Some(36));
        assert_eq!(fields.rate, Some(75.5));
    }

    #[test]
    fn test_wrapped_dict_and_json_string() {
        let wrapped = ToolArgs::decode(&json!({"__arg1": {"amount": 50000, "quotas": 12, "rate": 70}}));
        assert_eq!(wrapped.amount, Some(50000.0));
        assert_eq!(wrapped.quotas, Some(12));

        let stringly = ToolArgs::decode(&json!({
            "__arg1": "{\"riskLevel\": \"moderado\", \"max_loss_percent\": \"15\"}"
        }));
        assert_eq!(stringly.risk_level, Some(RiskLevel::Moderado));
        assert_eq!(stringly.max_loss_percent, Some(15));

        let top_level_string = ToolArgs::decode(&json!("{\"horizon\": \"LONG\"}"));
        assert_eq!(top_level_string.horizon, Some(Horizon::Long));
    }

    #[test]
    fn test_inner_fields_win_over_outer() {
        let fields = ToolArgs::decode(&json!({
            "customerId": "OUTER",
            "amount": 1,
            "args": {"customerId": "INNER"}
        }));
        assert_eq!(fields.customer_id.as_deref(), Some("INNER"));
        assert_eq!(fields.amount, Some(1.0));
    }

    #[test]
    fn test_scalar_arguments() {
        assert_eq!(ToolArgs::decode(&json!("C42")).scalar.as_deref(), Some("C42"));
        assert_eq!(ToolArgs::decode(&json!({"__arg1": "C42"})).scalar.as_deref(), Some("C42"));
        assert_eq!(ToolArgs::decode(&json!(null)), ToolFields::default());
    }

    #[test]
    fn test_loan_id_list_shapes() {
        let from_csv = ToolArgs::decode(&json!({"sourceLoanIds": "LOAN-001, LOAN-002"}));
        assert_eq!(
            from_csv.source_loan_ids,
            Some(vec!["LOAN-001".to_string(), "LOAN-002".to_string()])
        );

        let from_json = ToolArgs::decode(&json!({"sourceLoanIds": "[\"x\", \"y\"]"}));
        assert_eq!(from_json.source_loan_ids, Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(lenient_f64(&json!("$150.000,50")), Some(150000.5));
        assert_eq!(lenient_f64(&json!("85%")), Some(85.0));
        assert_eq!(lenient_f64(&json!("n/a")), None);
        assert_eq!(lenient_u32(&json!(-3)), None);
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("source_loan_ids"), "sourceLoanIds");
        assert_eq!(camel_case("offeredAmount"), "offeredAmount");
        assert_eq!(camel_case("__arg1"), "__arg1");
    }
}
