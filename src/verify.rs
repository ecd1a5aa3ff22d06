//! Echo verification: check that what the remote returned for a created
//! resource matches what was submitted.

use serde_json::Value;

/// True when every field of `submitted` is echoed back equal in `returned`.
///
/// Fields present only in `returned` are ignored. A submitted field missing
/// from `returned` fails verification. `estimate` compares total duration,
/// `description` and `comment` treat null and `""` as equal.
pub fn verify_echo(submitted: &Value, returned: &Value) -> bool {
    match (submitted, returned) {
        (Value::Object(submitted), Value::Object(returned)) => {
            submitted.iter().all(|(key, value)| {
                returned
                    .get(key)
                    .is_some_and(|echoed| field_matches(key, value, echoed))
            })
        }
        _ => submitted == returned,
    }
}

/// List form: equal length and pairwise match in order.
pub fn verify_echo_list(submitted: &[Value], returned: &[Value]) -> bool {
    submitted.len() == returned.len()
        && submitted
            .iter()
            .zip(returned)
            .all(|(s, r)| verify_echo(s, r))
}

fn field_matches(key: &str, submitted: &Value, returned: &Value) -> bool {
    match key {
        "estimate" => match (submitted.as_str(), returned.as_str()) {
            (Some(s), Some(r)) => match (timespan_secs(s), timespan_secs(r)) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => s == r,
            },
            _ => submitted == returned,
        },
        "description" | "comment" => blank_as_empty(submitted) == blank_as_empty(returned),
        _ => submitted == returned,
    }
}

fn blank_as_empty(v: &Value) -> Option<&Value> {
    match v {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(other),
    }
}

/// Sum of a space-separated duration like `1m 40s`, in seconds.
pub fn timespan_secs(text: &str) -> Option<f64> {
    text.split_whitespace()
        .map(part_secs)
        .try_fold(0.0, |total, part| part.map(|secs| total + secs))
}

fn part_secs(part: &str) -> Option<f64> {
    let split = part
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(part.len());
    let (number, unit) = part.split_at(split);
    let number: f64 = number.parse().ok()?;
    let scale = match unit.to_ascii_lowercase().as_str() {
        "ms" => 0.001,
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600.0,
        "d" | "day" | "days" => 86_400.0,
        "w" | "week" | "weeks" => 604_800.0,
        _ => return None,
    };
    Some(number * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn estimates_compare_by_total_duration() {
        for (sent, echoed) in [
            ("1m 40s", "1m 40s"),
            ("1m 60s", "2m"),
            ("120s", "2m"),
            ("36000s", "10h"),
        ] {
            assert!(
                verify_echo(&json!({"estimate": sent}), &json!({"estimate": echoed})),
                "{sent} vs {echoed}"
            );
        }
        assert!(!verify_echo(&json!({"estimate": "30s"}), &json!({"estimate": "1m"})));
    }

    #[test]
    fn other_keys_compare_exactly() {
        assert!(verify_echo(&json!({"time": "2m"}), &json!({"time": "2m"})));
        assert!(!verify_echo(&json!({"time": "120s"}), &json!({"time": "2m"})));
    }

    #[test]
    fn null_and_empty_text_are_equal() {
        for key in ["description", "comment"] {
            assert!(verify_echo(&json!({key: ""}), &json!({key: null})));
            assert!(verify_echo(&json!({key: null}), &json!({key: ""})));
            assert!(!verify_echo(&json!({key: "x"}), &json!({key: null})));
        }
    }

    #[test]
    fn extra_returned_fields_are_ignored() {
        assert!(verify_echo(
            &json!({"title": "Case1"}),
            &json!({"title": "Case1", "id": 1, "section_id": 3})
        ));
    }

    #[test]
    fn missing_returned_field_fails() {
        assert!(!verify_echo(&json!({"title": "Case1"}), &json!({"id": 1})));
    }

    #[test]
    fn list_lengths_must_match() {
        let sent = vec![json!({"title": "a"}), json!({"title": "b"})];
        let echoed = vec![json!({"title": "a", "id": 1})];
        assert!(!verify_echo_list(&sent, &echoed));
    }

    #[test]
    fn unknown_unit_is_not_a_timespan() {
        assert_eq!(timespan_secs("3 parsecs"), None);
        assert_eq!(timespan_secs("1h 30m"), Some(5_400.0));
    }
}
