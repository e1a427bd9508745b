use crate::kiosk::{Kiosk, KioskError};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance kiosk.
///
/// Bus name: org.rollcall.Kiosk1
/// Object path: /org/rollcall/Kiosk1
///
/// Every method returns its result as a JSON string.
pub struct KioskService {
    kiosk: Arc<Kiosk>,
}

impl KioskService {
    pub fn new(kiosk: Arc<Kiosk>) -> Self {
        Self { kiosk }
    }
}

pub const BUS_NAME: &str = "org.rollcall.Kiosk1";
pub const OBJECT_PATH: &str = "/org/rollcall/Kiosk1";

#[interface(name = "org.rollcall.Kiosk1")]
impl KioskService {
    /// Register a student by name and matric number.
    async fn register_student(&self, name: &str, matric_number: &str) -> zbus::fdo::Result<String> {
        tracing::info!(matric_number, "register_student requested");
        to_json(self.kiosk.register_student(name, matric_number).await)
    }

    /// Capture the student's face and enroll it.
    async fn enroll(&self, matric_number: &str) -> zbus::fdo::Result<String> {
        tracing::info!(matric_number, "enroll requested");
        to_json(self.kiosk.enroll(matric_number).await)
    }

    /// Capture a face and mark attendance for the course.
    async fn mark_attendance(&self, course_code: &str) -> zbus::fdo::Result<String> {
        tracing::info!(course_code, "mark_attendance requested");
        to_json(self.kiosk.mark_attendance(course_code).await)
    }

    /// Capture a face and report who it is, without marking attendance.
    async fn identify(&self) -> zbus::fdo::Result<String> {
        tracing::info!("identify requested");
        to_json(self.kiosk.identify().await)
    }

    async fn list_students(&self) -> zbus::fdo::Result<String> {
        to_json(self.kiosk.list_students().await)
    }

    async fn remove_student(&self, matric_number: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(matric_number, "remove_student requested");
        self.kiosk.remove_student(matric_number).await.map_err(to_fdo)?;
        Ok(true)
    }

    /// Attendance for a course. `date` is `YYYY-MM-DD`, or empty for today.
    async fn attendance(&self, course_code: &str, date: &str) -> zbus::fdo::Result<String> {
        let date = if date.trim().is_empty() {
            None
        } else {
            Some(NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
                zbus::fdo::Error::InvalidArgs(format!("invalid date {date:?}: {e}"))
            })?)
        };
        to_json(self.kiosk.attendance(course_code, date).await)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.kiosk.status().await.map_err(to_fdo)?;
        let mut value = serde_json::to_value(status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        value["version"] = serde_json::Value::from(env!("CARGO_PKG_VERSION"));
        Ok(value.to_string())
    }
}

fn to_json<T: Serialize>(result: Result<T, KioskError>) -> zbus::fdo::Result<String> {
    let value = result.map_err(to_fdo)?;
    serde_json::to_string(&value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn to_fdo(err: KioskError) -> zbus::fdo::Error {
    if err.is_invalid_input() {
        tracing::info!(error = %err, "request rejected");
        zbus::fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::warn!(error = %err, "request failed");
        zbus::fdo::Error::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::KioskState;

    #[test]
    fn test_validation_maps_to_invalid_args() {
        let err = to_fdo(KioskError::Validation("invalid course code: must not be empty".into()));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn test_busy_maps_to_failed() {
        let err = to_fdo(KioskError::Busy(KioskState::Capturing));
        match err {
            zbus::fdo::Error::Failed(msg) => assert!(msg.contains("capturing")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_to_json_ok() {
        let json = to_json(Ok::<_, KioskError>(vec!["a", "b"])).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }
}
