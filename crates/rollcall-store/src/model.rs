//! Stored entities and input normalization.

use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::Embedding;
use serde::Serialize;

const MAX_NAME_LEN: usize = 120;
const MAX_CODE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    /// Registered, no face on file yet.
    Pending,
    Enrolled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Enrolled => "enrolled",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrollmentStatus::Pending),
            "enrolled" => Some(EnrollmentStatus::Enrolled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub matric_number: String,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// An enrolled student with the decrypted embedding, as returned by gallery pages.
#[derive(Debug, Clone)]
pub struct EnrolledStudent {
    /// Scan cursor for the next page.
    pub seq: i64,
    pub student: Student,
    pub embedding: Embedding,
}

/// One page of the enrolled gallery.
#[derive(Debug, Clone, Default)]
pub struct GalleryPage {
    pub students: Vec<EnrolledStudent>,
    /// Rows read from the database, including unreadable ones.
    pub fetched: usize,
    /// Rows whose embedding failed authentication or had the wrong length.
    pub unreadable: usize,
    /// Cursor for the next page: the `seq` of the last row read, readable or not.
    pub last_seq: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub course_code: String,
    pub date: NaiveDate,
    pub confidence: f32,
    pub marked_at: DateTime<Utc>,
}

/// Attendance row joined with the student it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEntry {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub name: String,
    pub matric_number: String,
}

/// Result of an attendance insert.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceInsert {
    Recorded(AttendanceRecord),
    /// The student was already marked for this course and day; holds the existing row.
    AlreadyRecorded(AttendanceRecord),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub students: i64,
    pub enrolled: i64,
    pub attendance: i64,
}

/// Trim and collapse internal whitespace.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(StoreError::invalid("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(StoreError::invalid("name", format!("longer than {MAX_NAME_LEN} characters")));
    }
    Ok(name)
}

/// Upper-case and validate a matric number (`A-Z`, `0-9`, `/`, `-`).
pub fn normalize_matric(raw: &str) -> Result<String> {
    let matric = raw.trim().to_ascii_uppercase();
    validate_code("matric number", &matric, |c| {
        c.is_ascii_alphanumeric() || c == '/' || c == '-'
    })?;
    Ok(matric)
}

/// Strip whitespace and upper-case a course code ("csc 401" → "CSC401").
pub fn normalize_course_code(raw: &str) -> Result<String> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    validate_code("course code", &code, |c| c.is_ascii_alphanumeric() || c == '-')?;
    Ok(code)
}

fn validate_code(field: &'static str, value: &str, allowed: impl Fn(char) -> bool) -> Result<()> {
    if value.is_empty() {
        return Err(StoreError::invalid(field, "must not be empty"));
    }
    if value.len() > MAX_CODE_LEN {
        return Err(StoreError::invalid(field, format!("longer than {MAX_CODE_LEN} characters")));
    }
    if let Some(bad) = value.chars().find(|&c| !allowed(c)) {
        return Err(StoreError::invalid(field, format!("unexpected character {bad:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Ada   Lovelace ").unwrap(), "Ada Lovelace");
        assert!(normalize_name("   ").is_err());
        assert!(normalize_name(&"x".repeat(121)).is_err());
    }

    #[test]
    fn test_normalize_matric() {
        assert_eq!(normalize_matric(" cs/2021/042 ").unwrap(), "CS/2021/042");
        assert!(normalize_matric("").is_err());
        assert!(matches!(
            normalize_matric("CS 2021"),
            Err(StoreError::Invalid { field: "matric number", .. })
        ));
    }

    #[test]
    fn test_normalize_course_code() {
        assert_eq!(normalize_course_code("csc 401").unwrap(), "CSC401");
        assert_eq!(normalize_course_code("MTH-101").unwrap(), "MTH-101");
        assert!(normalize_course_code(" \t").is_err());
        assert!(normalize_course_code("CSC;401").is_err());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [EnrollmentStatus::Pending, EnrollmentStatus::Enrolled] {
            assert_eq!(EnrollmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EnrollmentStatus::parse("unknown"), None);
    }
}
