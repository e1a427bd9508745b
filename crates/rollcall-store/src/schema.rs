//! SQLite schema for students, attendance and store metadata.

pub const SCHEMA_VERSION: i64 = 1;

/// Students with their (encrypted) face embedding.
///
/// `seq` gives a stable scan order for keyset pagination.
pub const CREATE_STUDENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS students (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    matric_number TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL CHECK (status IN ('pending', 'enrolled')),
    embedding BLOB,
    embedding_dim INTEGER,
    model_version TEXT,
    created_at TEXT NOT NULL,
    enrolled_at TEXT
)
";

pub const CREATE_STUDENTS_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_students_status ON students(status, seq)
";

/// One row per student, course and day.
pub const CREATE_ATTENDANCE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS attendance (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    course_code TEXT NOT NULL,
    date TEXT NOT NULL,
    confidence REAL NOT NULL,
    marked_at TEXT NOT NULL,
    UNIQUE (student_id, course_code, date)
)
";

pub const CREATE_ATTENDANCE_COURSE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_attendance_course_date ON attendance(course_code, date)
";

pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_STUDENTS_TABLE,
    CREATE_STUDENTS_STATUS_INDEX,
    CREATE_ATTENDANCE_TABLE,
    CREATE_ATTENDANCE_COURSE_INDEX,
    CREATE_METADATA_TABLE,
];
