//! rollcall-store: persistent state for the attendance kiosk.
//!
//! Students and their face embeddings live in SQLite alongside one
//! attendance row per student, course and day. Embeddings are encrypted
//! at rest with a key kept outside the database.

pub mod crypto;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;

pub use crypto::EmbeddingCipher;
pub use error::{Result, StoreError};
pub use model::{
    normalize_course_code, normalize_matric, normalize_name, AttendanceEntry, AttendanceInsert,
    AttendanceRecord, EnrolledStudent, EnrollmentStatus, GalleryPage, StoreCounts, Student,
};
pub use store::{Store, MAX_PAGE_SIZE};
