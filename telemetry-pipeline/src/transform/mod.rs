use serde_json::Value;
use telemetry_client::{NewRow, Reading};

use crate::pipeline::PipelineError;
use crate::schema::{DecodedMessage, LegacyFields, ReadingFields};

/// Permissive check applied at intake.
///
/// Rules:
/// - all five keys present and not `null`.
/// - string values non-empty after trimming.
/// - values are otherwise not type-checked; `0` is accepted.
pub fn validate_intake(fields: ReadingFields) -> Result<ReadingFields, PipelineError> {
    let missing: Vec<&str> = [
        ("deviceCode", &fields.device_code),
        ("time", &fields.time),
        ("Level", &fields.level),
        ("Flow", &fields.flow),
        ("Energy", &fields.energy),
    ]
    .into_iter()
    .filter(|(_, v)| !is_present(v))
    .map(|(name, _)| name)
    .collect();

    if !missing.is_empty() {
        return Err(PipelineError::InvalidPayload(format!(
            "missing or empty fields: {}",
            missing.join(", ")
        )));
    }

    Ok(fields)
}

fn is_present(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Strict check applied by the worker before anything is written.
///
/// Rules:
/// - identifier and timestamp must be JSON strings, non-empty after trimming.
/// - measurements must be finite JSON numbers; `0` and negatives are fine,
///   numeric strings are not.
pub fn validate_message(message: DecodedMessage) -> Result<NewRow, PipelineError> {
    match message {
        DecodedMessage::V2(fields) => validate_reading(fields).map(NewRow::from),
        DecodedMessage::V1(fields) => validate_legacy(fields),
    }
}

pub fn validate_reading(fields: ReadingFields) -> Result<Reading, PipelineError> {
    Ok(Reading {
        device_code: require_text("deviceCode", fields.device_code)?,
        time: require_text("time", fields.time)?,
        level: require_number("Level", fields.level)?,
        flow: require_number("Flow", fields.flow)?,
        energy: require_number("Energy", fields.energy)?,
    })
}

fn validate_legacy(fields: LegacyFields) -> Result<NewRow, PipelineError> {
    Ok(NewRow {
        device_id: require_text("deviceId", fields.device_id)?,
        timestamp: require_text("timestamp", fields.timestamp)?,
        level: require_number("level", fields.level)?,
        flow: None,
        energy: None,
    })
}

fn require_text(name: &str, value: Option<Value>) -> Result<String, PipelineError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(other) => Err(PipelineError::MalformedMessage(format!(
            "{name} must be a non-empty string, got {other}"
        ))),
        None => Err(PipelineError::MalformedMessage(format!("{name} is missing"))),
    }
}

fn require_number(name: &str, value: Option<Value>) -> Result<f64, PipelineError> {
    match value {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(PipelineError::MalformedMessage(format!("{name} is not a finite number"))),
        },
        Some(other) => Err(PipelineError::MalformedMessage(format!(
            "{name} must be a number, got {other}"
        ))),
        None => Err(PipelineError::MalformedMessage(format!("{name} is missing"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> ReadingFields {
        ReadingFields {
            device_code: Some(json!("D1")),
            time: Some(json!("2024-01-01T00:00:00Z")),
            level: Some(json!(1.2)),
            flow: Some(json!(3.4)),
            energy: Some(json!(5.6)),
        }
    }

    #[test]
    fn intake_accepts_complete_payload() {
        assert_eq!(validate_intake(fields()).unwrap(), fields());
    }

    #[test]
    fn intake_accepts_zero_and_unchecked_types() {
        let mut f = fields();
        f.level = Some(json!(0));
        f.flow = Some(json!("3.4"));
        assert!(validate_intake(f).is_ok());
    }

    #[test]
    fn intake_rejects_missing_null_and_blank_fields() {
        let mut missing = fields();
        missing.energy = None;

        let mut blank = fields();
        blank.device_code = Some(json!("  "));

        let mut null_time = fields();
        null_time.time = Some(Value::Null);

        for f in [missing, blank, null_time] {
            let res = validate_intake(f);
            assert!(matches!(res, Err(PipelineError::InvalidPayload(_))));
        }
    }

    #[test]
    fn intake_error_names_every_missing_field() {
        let err = validate_intake(ReadingFields {
            device_code: Some(json!("D1")),
            ..Default::default()
        })
        .unwrap_err();

        let msg = err.to_string();
        for name in ["time", "Level", "Flow", "Energy"] {
            assert!(msg.contains(name), "{msg} should mention {name}");
        }
        assert!(!msg.contains("deviceCode"));
    }

    #[test]
    fn message_validation_builds_full_row() {
        let row = validate_message(DecodedMessage::V2(fields())).unwrap();

        assert_eq!(
            row,
            NewRow {
                device_id: "D1".to_string(),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                level: 1.2,
                flow: Some(3.4),
                energy: Some(5.6),
            }
        );
    }

    #[test]
    fn message_validation_keeps_zero_and_negative_values() {
        let mut f = fields();
        f.level = Some(json!(0));
        f.flow = Some(json!(-2.5));

        let row = validate_message(DecodedMessage::V2(f)).unwrap();
        assert_eq!(row.level, 0.0);
        assert_eq!(row.flow, Some(-2.5));
    }

    #[test]
    fn message_validation_rejects_numeric_strings_and_missing_fields() {
        let mut as_string = fields();
        as_string.level = Some(json!("1.2"));

        let mut missing = fields();
        missing.flow = None;

        let mut numeric_id = fields();
        numeric_id.device_code = Some(json!(17));

        for f in [as_string, missing, numeric_id] {
            let res = validate_message(DecodedMessage::V2(f));
            assert!(matches!(res, Err(PipelineError::MalformedMessage(_))));
        }
    }

    #[test]
    fn legacy_message_leaves_flow_and_energy_empty() {
        let row = validate_message(DecodedMessage::V1(LegacyFields {
            device_id: Some(json!("D9")),
            timestamp: Some(json!("2023-05-01T10:00:00Z")),
            level: Some(json!(0.5)),
        }))
        .unwrap();

        assert_eq!(row.device_id, "D9");
        assert_eq!(row.level, 0.5);
        assert_eq!(row.flow, None);
        assert_eq!(row.energy, None);
    }
}
