use crate::engine::EngineHandle;
use crate::response;
use chrono::NaiveDate;
use presence_core::codec::decode_image_payload;
use presence_core::{AttendanceEntry, EngineError};
use serde::Serialize;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.Presence1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Presence1";

#[derive(Serialize)]
struct AttendanceDay {
    date: NaiveDate,
    records: Vec<AttendanceEntry>,
}

/// D-Bus interface for the Presence attendance daemon.
///
/// Bus name: org.freedesktop.Presence1
/// Object path: /org/freedesktop/Presence1
///
/// Images are base64 strings, optionally as `data:image/...;base64,` URIs.
/// Every method answers with a JSON envelope (see [`response`]).
pub struct PresenceService {
    engine: EngineHandle,
    db_path: PathBuf,
}

impl PresenceService {
    pub fn new(engine: EngineHandle, db_path: PathBuf) -> Self {
        Self { engine, db_path }
    }
}

#[interface(name = "org.freedesktop.Presence1")]
impl PresenceService {
    /// Enroll a new subject from a face image.
    async fn enroll(&self, subject_id: &str, name: &str, category: &str, image: &str) -> String {
        tracing::info!(subject_id, "enroll requested");
        let result = match decode_image_payload(image) {
            Ok(bytes) => {
                self.engine
                    .enroll(subject_id.to_string(), name.to_string(), category.to_string(), bytes)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        response::respond("enroll", result)
    }

    /// Identify the face in an image without recording attendance.
    async fn recognize(&self, image: &str) -> String {
        tracing::debug!("recognize requested");
        let result = match decode_image_payload(image) {
            Ok(bytes) => self.engine.recognize(bytes).await,
            Err(e) => Err(e.into()),
        };
        response::respond("recognize", result)
    }

    /// Identify the face and record today's attendance.
    async fn check_in(&self, image: &str) -> String {
        tracing::debug!("check_in requested");
        let result = match decode_image_payload(image) {
            Ok(bytes) => self.engine.check_in(bytes).await,
            Err(e) => Err(e.into()),
        };
        response::respond("check_in", result)
    }

    /// List enrolled subjects in enrollment order.
    async fn list_subjects(&self) -> String {
        response::respond("list_subjects", self.engine.subjects().await)
    }

    /// Attendance records for `date` (YYYY-MM-DD, empty for today).
    async fn list_attendance(&self, date: &str) -> String {
        let result = match parse_date(date) {
            Ok(date) => self
                .engine
                .attendance(date)
                .await
                .map(|(date, records)| AttendanceDay { date, records }),
            Err(e) => Err(e),
        };
        response::respond("list_attendance", result)
    }

    /// Present, late and absent counts for `date` (empty for today).
    async fn summary(&self, date: &str) -> String {
        let result = match parse_date(date) {
            Ok(date) => self.engine.summary(date).await,
            Err(e) => Err(e),
        };
        response::respond("summary", result)
    }

    /// Return daemon status information.
    async fn status(&self) -> String {
        response::success(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.db_path.display().to_string(),
            "extractor": self.engine.extractor_name(),
            "match_threshold": self.engine.threshold(),
            "late_cutoff": self.engine.late_cutoff().to_string(),
        }))
    }
}

fn parse_date(text: &str) -> Result<Option<NaiveDate>, EngineError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| EngineError::InvalidRequest(format!("date {text:?} is not YYYY-MM-DD")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use presence_core::{AttendanceEngine, EngineConfig, HashExtractor};
    use serde_json::{json, Value};

    /// base64 of `b"ada"`.
    const ADA_IMAGE: &str = "YWRh";

    fn service() -> PresenceService {
        let store = SqliteStore::open_in_memory().unwrap();
        let engine = AttendanceEngine::new(store, Box::new(HashExtractor), EngineConfig::default());
        PresenceService::new(EngineHandle::new(engine), PathBuf::from(":memory:"))
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_check_in_invalid_image_envelope() {
        let service = service();
        let body = parse(&service.check_in("%%% not base64 %%%").await);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().unwrap().starts_with("No face detected"));
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_bad_date_is_invalid_request() {
        let service = service();
        for body in [
            parse(&service.list_attendance("19/10/2026").await),
            parse(&service.summary("yesterday").await),
        ] {
            assert_eq!(body["success"], json!(false));
            assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));
        }
    }

    #[tokio::test]
    async fn test_enroll_check_in_and_list() {
        let service = service();
        let body = parse(&service.enroll("E1", "Ada", "Eng", ADA_IMAGE).await);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["id"], json!("E1"));

        let body = parse(&service.check_in(&format!("data:image/png;base64,{ADA_IMAGE}")).await);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["subject_id"], json!("E1"));
        assert_eq!(body["data"]["name"], json!("Ada"));

        let body = parse(&service.check_in(ADA_IMAGE).await);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().unwrap().starts_with("Attendance already marked"));

        let body = parse(&service.list_attendance("").await);
        assert_eq!(body["data"]["records"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["records"][0]["category"], json!("Eng"));

        let body = parse(&service.list_subjects().await);
        assert_eq!(body["data"][0]["name"], json!("Ada"));
        assert!(body["data"][0].get("signature").is_none());
    }

    #[tokio::test]
    async fn test_status_reports_configuration() {
        let body = parse(&service().status().await);
        assert_eq!(body["data"]["extractor"], json!("hash"));
        assert_eq!(body["data"]["late_cutoff"], json!("09:30:00"));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("").unwrap(), None);
        assert_eq!(
            parse_date(" 2026-10-19 ").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 19)
        );
        assert!(matches!(
            parse_date("19/10/2026"),
            Err(EngineError::InvalidRequest(_))
        ));
    }
}
