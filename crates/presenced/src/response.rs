//! JSON envelopes returned by every D-Bus method.
//!
//! Callers always get `{"success": true, "data": ...}` or
//! `{"success": false, "error": "..."}`. Backend failures are logged here
//! with full detail and reduced to a generic message.

use presence_core::EngineError;
use serde::Serialize;

const INTERNAL_ERROR: &str = "Internal error; see daemon log";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn success<T: Serialize>(data: &T) -> String {
    serialize(&Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
}

pub fn failure(operation: &str, err: &EngineError) -> String {
    match err {
        EngineError::Storage(_) | EngineError::Extractor(_) => {
            tracing::error!(operation, error = %err, "request failed");
        }
        _ => tracing::info!(operation, error = %err, "request rejected"),
    }
    serialize(&Envelope::<()> {
        success: false,
        data: None,
        error: Some(public_message(err)),
    })
}

pub fn respond<T: Serialize>(operation: &str, result: Result<T, EngineError>) -> String {
    match result {
        Ok(data) => success(&data),
        Err(err) => failure(operation, &err),
    }
}

/// Message shown to callers; never includes backend detail.
pub fn public_message(err: &EngineError) -> String {
    match err {
        EngineError::NotAFace(reason) => format!("No face detected in image: {reason}"),
        EngineError::NoMatch => "Face not recognized".to_string(),
        EngineError::AlreadyMarked { date, .. } => format!("Attendance already marked for {date}"),
        EngineError::DuplicateSubject(id) => format!("Subject {id} is already enrolled"),
        EngineError::InvalidRequest(msg) => format!("Invalid request: {msg}"),
        EngineError::Storage(_) | EngineError::Extractor(_) => INTERNAL_ERROR.to_string(),
    }
}

fn serialize<T: Serialize>(envelope: &T) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|e| {
        tracing::error!(error = %e, "response serialization failed");
        format!(r#"{{"success":false,"error":"{INTERNAL_ERROR}"}}"#)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_success_envelope() {
        let body = parse(&success(&json!({"subject_id": "E1"})));
        assert_eq!(body, json!({"success": true, "data": {"subject_id": "E1"}}));
    }

    #[test]
    fn test_business_failure_envelope() {
        let err = EngineError::AlreadyMarked {
            subject_id: "E1".into(),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        };
        let body = parse(&failure("check_in", &err));
        assert_eq!(
            body,
            json!({"success": false, "error": "Attendance already marked for 2026-10-19"})
        );
    }

    #[test]
    fn test_backend_failure_hides_detail() {
        for err in [
            EngineError::Storage("disk I/O error at /var/lib/presence".into()),
            EngineError::Extractor("python3 exited with 1".into()),
        ] {
            let body = parse(&failure("recognize", &err));
            assert_eq!(body["success"], json!(false));
            assert_eq!(body["error"], json!(INTERNAL_ERROR));
        }
    }

    #[test]
    fn test_respond_maps_no_match() {
        let body = parse(&respond::<()>("recognize", Err(EngineError::NoMatch)));
        assert_eq!(body["error"], json!("Face not recognized"));
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_fallback_is_valid_json() {
        let text = format!(r#"{{"success":false,"error":"{INTERNAL_ERROR}"}}"#);
        assert_eq!(parse(&text)["success"], json!(false));
    }
}
