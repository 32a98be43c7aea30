//! Response Validator
//!
//! Model output is untrusted input. Parsing and shape checks never panic and
//! never propagate an error: every response becomes a classified
//! [`ExtractionResult`]. Checks are structural only; an implausible lap
//! number is still a valid lap number.

use serde_json::{Map, Value};

use crate::domain::{Datatype, ExtractionResult};

/// Parse `raw_text` and check it against the expected shape for `datatype`.
pub fn validate(raw_text: &str, datatype: &Datatype) -> ExtractionResult {
    let body = strip_code_fence(raw_text);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return ExtractionResult::validation_failed(
                datatype.clone(),
                raw_text,
                format!("malformed structured response: {e}"),
            )
        }
    };

    match check_shape(&value, datatype) {
        Ok(()) => ExtractionResult::success(datatype.clone(), raw_text, value),
        Err(reason) => ExtractionResult::validation_failed(datatype.clone(), raw_text, reason),
    }
}

/// Remove surrounding whitespace and a Markdown code fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    match rest.strip_suffix("```") {
        Some(body) => body.trim(),
        None => trimmed,
    }
}

fn check_shape(value: &Value, datatype: &Datatype) -> Result<(), String> {
    let obj = as_object(value, "response")?;
    match datatype {
        Datatype::LapNumber => positive_int(require(obj, "lap_number", "")?, "lap_number", ""),
        Datatype::TimingTable => {
            let entries = non_empty_array(require(obj, "timing_table", "")?, "timing_table")?;
            for (i, entry) in entries.iter().enumerate() {
                let ctx = format!("timing_table[{i}]: ");
                let entry = as_object(entry, &format!("timing_table[{i}]"))?;
                positive_int(require(entry, "position", &ctx)?, "position", &ctx)?;
                non_empty_string(require(entry, "driver", &ctx)?, "driver", &ctx)?;
                string_or_number(require(entry, "gap", &ctx)?, "gap", &ctx)?;
                string_or_number(require(entry, "interval", &ctx)?, "interval", &ctx)?;
            }
            Ok(())
        }
        Datatype::TireInfo => {
            let entries = non_empty_array(require(obj, "tire_info", "")?, "tire_info")?;
            for (i, entry) in entries.iter().enumerate() {
                let ctx = format!("tire_info[{i}]: ");
                let entry = as_object(entry, &format!("tire_info[{i}]"))?;
                non_empty_string(require(entry, "driver", &ctx)?, "driver", &ctx)?;
                non_empty_string(require(entry, "compound", &ctx)?, "compound", &ctx)?;
                non_negative_int(require(entry, "age", &ctx)?, "age", &ctx)?;
            }
            Ok(())
        }
        Datatype::Custom(_) => Ok(()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("{what} must be a JSON object, got {}", json_kind(value)))
}

fn require<'a>(obj: &'a Map<String, Value>, field: &str, ctx: &str) -> Result<&'a Value, String> {
    obj.get(field)
        .ok_or_else(|| format!("{ctx}missing required field '{field}'"))
}

fn positive_int(value: &Value, field: &str, ctx: &str) -> Result<(), String> {
    match value.as_u64() {
        Some(n) if n >= 1 => Ok(()),
        _ => Err(format!(
            "{ctx}field '{field}' must be a positive integer, got {value}"
        )),
    }
}

fn non_negative_int(value: &Value, field: &str, ctx: &str) -> Result<(), String> {
    match value.as_u64() {
        Some(_) => Ok(()),
        None => Err(format!(
            "{ctx}field '{field}' must be a non-negative integer, got {value}"
        )),
    }
}

fn non_empty_string(value: &Value, field: &str, ctx: &str) -> Result<(), String> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(format!(
            "{ctx}field '{field}' must be a non-empty string, got {value}"
        )),
    }
}

fn string_or_number(value: &Value, field: &str, ctx: &str) -> Result<(), String> {
    match value {
        Value::String(_) | Value::Number(_) => Ok(()),
        other => Err(format!(
            "{ctx}field '{field}' must be a string or number, got {}",
            json_kind(other)
        )),
    }
}

fn non_empty_array<'a>(value: &'a Value, field: &str) -> Result<&'a Vec<Value>, String> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items),
        Some(_) => Err(format!("field '{field}' must contain at least one entry")),
        None => Err(format!(
            "field '{field}' must be an array, got {}",
            json_kind(value)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;
    use serde_json::json;

    fn reason(result: &ExtractionResult) -> &str {
        result.reason.as_deref().unwrap_or("")
    }

    #[test]
    fn lap_number_success_attaches_value() {
        let result = validate(r#"{"lap_number": 42}"#, &Datatype::LapNumber);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.parsed, Some(json!({"lap_number": 42})));
    }

    #[test]
    fn implausible_lap_number_is_still_valid() {
        let result = validate(r#"{"lap_number": 9999}"#, &Datatype::LapNumber);
        assert!(result.is_success());
    }

    #[test]
    fn lap_number_rejects_zero_negative_and_strings() {
        for body in [
            r#"{"lap_number": 0}"#,
            r#"{"lap_number": -3}"#,
            r#"{"lap_number": "12"}"#,
            r#"{"lap_number": 4.5}"#,
        ] {
            let result = validate(body, &Datatype::LapNumber);
            assert_eq!(result.outcome, Outcome::ValidationFailed, "{body}");
            assert!(reason(&result).contains("positive integer"), "{body}");
            assert!(result.parsed.is_none());
        }
    }

    #[test]
    fn malformed_text_is_classified_not_raised() {
        let result = validate("Lap 42 of 57", &Datatype::LapNumber);
        assert_eq!(result.outcome, Outcome::ValidationFailed);
        assert!(reason(&result).starts_with("malformed structured response"));
        assert_eq!(result.raw_text.as_deref(), Some("Lap 42 of 57"));
    }

    #[test]
    fn code_fenced_json_is_accepted() {
        let body = "```json\n{\"lap_number\": 7}\n```";
        let result = validate(body, &Datatype::LapNumber);
        assert!(result.is_success(), "{:?}", result.reason);
        assert_eq!(result.parsed, Some(json!({"lap_number": 7})));
    }

    #[test]
    fn non_object_response_fails_shape() {
        let result = validate("[1, 2, 3]", &Datatype::LapNumber);
        assert_eq!(result.outcome, Outcome::ValidationFailed);
        assert!(reason(&result).contains("must be a JSON object"));
    }

    #[test]
    fn timing_table_missing_gap_names_field_and_entry() {
        let body = json!({
            "timing_table": [
                {"position": 1, "driver": "VER", "gap": "LEADER", "interval": ""},
                {"position": 2, "driver": "NOR", "interval": "+1.2"}
            ]
        })
        .to_string();
        let result = validate(&body, &Datatype::TimingTable);
        assert_eq!(result.outcome, Outcome::ValidationFailed);
        assert_eq!(reason(&result), "timing_table[1]: missing required field 'gap'");
    }

    #[test]
    fn timing_table_accepts_string_and_numeric_gaps() {
        let body = json!({
            "timing_table": [
                {"position": 1, "driver": "VER", "gap": "LEADER", "interval": "LEADER"},
                {"position": 2, "driver": "NOR", "gap": 1.234, "interval": 1.234}
            ]
        })
        .to_string();
        assert!(validate(&body, &Datatype::TimingTable).is_success());
    }

    #[test]
    fn timing_table_must_be_non_empty_array() {
        let empty = validate(r#"{"timing_table": []}"#, &Datatype::TimingTable);
        assert!(reason(&empty).contains("at least one entry"));

        let wrong = validate(r#"{"timing_table": {"1": "VER"}}"#, &Datatype::TimingTable);
        assert!(reason(&wrong).contains("must be an array"));
    }

    #[test]
    fn tire_info_requires_compound_and_age() {
        let ok = json!({"tire_info": [{"driver": "HAM", "compound": "MEDIUM", "age": 0}]});
        assert!(validate(&ok.to_string(), &Datatype::TireInfo).is_success());

        let bad = json!({"tire_info": [{"driver": "HAM", "compound": "MEDIUM"}]});
        let result = validate(&bad.to_string(), &Datatype::TireInfo);
        assert_eq!(reason(&result), "tire_info[0]: missing required field 'age'");
    }

    #[test]
    fn custom_datatype_only_needs_an_object() {
        let custom = Datatype::Custom("weather".into());
        assert!(validate(r#"{"track_temp": 41}"#, &custom).is_success());
        assert!(!validate(r#""sunny""#, &custom).is_success());
    }
}
