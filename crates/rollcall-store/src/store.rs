//! Async SQLite store for students, embeddings and attendance.
//!
//! All statements run on a single `tokio-rusqlite` connection thread, so
//! each call below is atomic with respect to every other call.

use crate::crypto::EmbeddingCipher;
use crate::error::{is_constraint_violation, Result, StoreError};
use crate::model::{
    normalize_course_code, normalize_matric, normalize_name, AttendanceEntry, AttendanceInsert,
    AttendanceRecord, EnrolledStudent, EnrollmentStatus, GalleryPage, Student, StoreCounts,
};
use crate::schema::{SCHEMA_STATEMENTS, SCHEMA_VERSION};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::Embedding;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on rows fetched per gallery page.
pub const MAX_PAGE_SIZE: usize = 50;

const STUDENT_COLUMNS: &str = "id, name, matric_number, status, created_at, enrolled_at";
const ATTENDANCE_COLUMNS: &str = "a.id, a.student_id, a.course_code, a.date, a.confidence, a.marked_at";

/// Handle to the attendance database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
    cipher: Arc<EmbeddingCipher>,
    path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Row as read from the connection thread, before decryption.
struct SealedRow {
    seq: i64,
    student: Student,
    blob: Vec<u8>,
    dim: i64,
    model_version: Option<String>,
}

impl Store {
    /// Open or create the database at `path` and apply the schema.
    ///
    /// Fails with [`StoreError::KeyMismatch`] if the database was created with
    /// a different embedding key.
    pub async fn open(path: &Path, cipher: EmbeddingCipher) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connection(format!("{}: {e}", parent.display())))?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self {
            conn,
            cipher: Arc::new(cipher),
            path: path.to_path_buf(),
        };
        store.initialize(true).await?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// In-memory database, for tests and dry runs.
    pub async fn open_in_memory(cipher: EmbeddingCipher) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self {
            conn,
            cipher: Arc::new(cipher),
            path: PathBuf::from(":memory:"),
        };
        store.initialize(false).await?;
        Ok(store)
    }

    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(f).await.map_err(StoreError::from)
    }

    async fn initialize(&self, wal: bool) -> Result<()> {
        let fingerprint = self.cipher.fingerprint().to_string();
        self.call(move |conn| {
            if wal {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            }
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;

            let tx = conn.transaction()?;
            for stmt in SCHEMA_STATEMENTS {
                tx.execute(stmt, [])?;
            }
            tx.execute(
                "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )?;

            let stored: Option<String> = tx
                .query_row(
                    "SELECT value FROM metadata WHERE key = 'key_fingerprint'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            match stored {
                Some(expected) if expected != fingerprint => {
                    return Err(StoreError::KeyMismatch {
                        expected,
                        found: fingerprint,
                    });
                }
                Some(_) => {}
                None => {
                    tx.execute(
                        "INSERT INTO metadata (key, value) VALUES ('key_fingerprint', ?1)",
                        [&fingerprint],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Register a student with no face on file.
    pub async fn insert_student(&self, name: &str, matric_number: &str) -> Result<Student> {
        let student = Student {
            id: uuid::Uuid::new_v4().to_string(),
            name: normalize_name(name)?,
            matric_number: normalize_matric(matric_number)?,
            status: EnrollmentStatus::Pending,
            created_at: Utc::now(),
            enrolled_at: None,
        };

        let row = student.clone();
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO students (id, name, matric_number, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id,
                    row.name,
                    row.matric_number,
                    row.status.as_str(),
                    row.created_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(StoreError::DuplicateMatric(row.matric_number))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        tracing::debug!(id = %student.id, matric = %student.matric_number, "student registered");
        Ok(student)
    }

    pub async fn student_by_matric(&self, matric_number: &str) -> Result<Option<Student>> {
        let matric = normalize_matric(matric_number)?;
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE matric_number = ?1"),
                    [matric],
                    |row| student_from_row(row, 0),
                )
                .optional()?)
        })
        .await
    }

    pub async fn student_by_id(&self, id: &str) -> Result<Option<Student>> {
        let id = id.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
                    [id],
                    |row| student_from_row(row, 0),
                )
                .optional()?)
        })
        .await
    }

    /// All students in registration order.
    pub async fn list_students(&self) -> Result<Vec<Student>> {
        self.call(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY seq"))?;
            let students = stmt
                .query_map([], |row| student_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(students)
        })
        .await
    }

    /// Delete a student and their attendance. Returns false if no such student.
    pub async fn remove_student(&self, matric_number: &str) -> Result<bool> {
        let matric = normalize_matric(matric_number)?;
        let removed = self
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM students WHERE matric_number = ?1", [matric])?)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Store (or replace) a student's embedding and mark them enrolled.
    pub async fn save_embedding(&self, student_id: &str, embedding: &Embedding) -> Result<Student> {
        if embedding.values.is_empty() {
            return Err(StoreError::invalid("embedding", "must not be empty"));
        }
        let blob = self.cipher.seal(student_id, &embedding.values)?;
        let dim = embedding.dim() as i64;
        let model_version = embedding.model_version.clone();
        let id = student_id.to_string();
        let now = Utc::now().to_rfc3339();

        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE students
                 SET embedding = ?1, embedding_dim = ?2, model_version = ?3,
                     status = 'enrolled', enrolled_at = ?4
                 WHERE id = ?5",
                params![blob, dim, model_version, now, id],
            )?;
            if updated == 0 {
                return Err(StoreError::UnknownStudent(id));
            }
            Ok(conn.query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
                [&id],
                |row| student_from_row(row, 0),
            )?)
        })
        .await
    }

    /// Enrolled students with `seq > after`, at most `limit` (capped at [`MAX_PAGE_SIZE`]).
    ///
    /// Pass `last_seq` to fetch the next page; a page with fewer than `limit`
    /// rows fetched is the last one. Rows that cannot be decrypted are logged,
    /// counted in `unreadable` and left out, so one damaged row does not stop
    /// every scan.
    pub async fn enrolled_page(&self, after: i64, limit: usize) -> Result<GalleryPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE) as i64;
        let rows = self
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT seq, {STUDENT_COLUMNS}, embedding, embedding_dim, model_version
                     FROM students
                     WHERE status = 'enrolled' AND seq > ?1
                     ORDER BY seq
                     LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![after, limit], |row| {
                        Ok(SealedRow {
                            seq: row.get(0)?,
                            student: student_from_row(row, 1)?,
                            blob: row.get(7)?,
                            dim: row.get(8)?,
                            model_version: row.get(9)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut page = GalleryPage {
            fetched: rows.len(),
            last_seq: rows.last().map(|row| row.seq),
            ..GalleryPage::default()
        };
        for row in rows {
            let matric = row.student.matric_number.clone();
            match self.unseal(row) {
                Ok(entry) => page.students.push(entry),
                Err(e) => {
                    tracing::warn!(%matric, error = %e, "skipping unreadable embedding");
                    page.unreadable += 1;
                }
            }
        }
        Ok(page)
    }

    fn unseal(&self, row: SealedRow) -> Result<EnrolledStudent> {
        let values = self.cipher.open(&row.student.id, &row.blob)?;
        if values.len() as i64 != row.dim {
            return Err(StoreError::Cipher(format!(
                "embedding for {} has {} values, expected {}",
                row.student.matric_number,
                values.len(),
                row.dim
            )));
        }
        Ok(EnrolledStudent {
            seq: row.seq,
            student: row.student,
            embedding: Embedding {
                values,
                model_version: row.model_version,
            },
        })
    }

    /// Mark attendance unless the student already has a row for this course and day.
    pub async fn record_attendance(
        &self,
        student_id: &str,
        course_code: &str,
        date: NaiveDate,
        confidence: f32,
    ) -> Result<AttendanceInsert> {
        let course = normalize_course_code(course_code)?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(StoreError::invalid("confidence", format!("{confidence} outside [0, 1]")));
        }
        let record = AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            course_code: course,
            date,
            confidence,
            marked_at: Utc::now(),
        };

        self.call(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO attendance (id, student_id, course_code, date, confidence, marked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (student_id, course_code, date) DO NOTHING",
                params![
                    record.id,
                    record.student_id,
                    record.course_code,
                    record.date.to_string(),
                    record.confidence as f64,
                    record.marked_at.to_rfc3339(),
                ],
            );
            let inserted = match inserted {
                Ok(n) => n,
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::UnknownStudent(record.student_id));
                }
                Err(e) => return Err(e.into()),
            };

            let outcome = if inserted == 1 {
                AttendanceInsert::Recorded(record)
            } else {
                let existing = tx.query_row(
                    &format!(
                        "SELECT {ATTENDANCE_COLUMNS} FROM attendance a
                         WHERE a.student_id = ?1 AND a.course_code = ?2 AND a.date = ?3"
                    ),
                    params![record.student_id, record.course_code, record.date.to_string()],
                    |row| attendance_from_row(row, 0),
                )?;
                AttendanceInsert::AlreadyRecorded(existing)
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    /// Attendance for a course on a day, in marking order.
    pub async fn attendance_for(&self, course_code: &str, date: NaiveDate) -> Result<Vec<AttendanceEntry>> {
        let course = normalize_course_code(course_code)?;
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTENDANCE_COLUMNS}, s.name, s.matric_number
                 FROM attendance a JOIN students s ON s.id = a.student_id
                 WHERE a.course_code = ?1 AND a.date = ?2
                 ORDER BY a.marked_at, a.id"
            ))?;
            let entries = stmt
                .query_map(params![course, date.to_string()], |row| {
                    Ok(AttendanceEntry {
                        record: attendance_from_row(row, 0)?,
                        name: row.get(6)?,
                        matric_number: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        self.call(|conn| {
            Ok(conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM students),
                    (SELECT COUNT(*) FROM students WHERE status = 'enrolled'),
                    (SELECT COUNT(*) FROM attendance)",
                [],
                |row| {
                    Ok(StoreCounts {
                        students: row.get(0)?,
                        enrolled: row.get(1)?,
                        attendance: row.get(2)?,
                    })
                },
            )?)
        })
        .await
    }
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

/// Map `STUDENT_COLUMNS` starting at column `base`.
fn student_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Student> {
    let status: String = row.get(base + 3)?;
    let status = EnrollmentStatus::parse(&status).ok_or_else(|| {
        conversion_error(
            base + 3,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad status {status:?}")),
        )
    })?;
    let enrolled_at = match row.get::<_, Option<String>>(base + 5)? {
        Some(_) => Some(timestamp(row, base + 5)?),
        None => None,
    };
    Ok(Student {
        id: row.get(base)?,
        name: row.get(base + 1)?,
        matric_number: row.get(base + 2)?,
        status,
        created_at: timestamp(row, base + 4)?,
        enrolled_at,
    })
}

/// Map `ATTENDANCE_COLUMNS` starting at column `base`.
fn attendance_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<AttendanceRecord> {
    let date: String = row.get(base + 3)?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| conversion_error(base + 3, e))?;
    let confidence: f64 = row.get(base + 4)?;
    Ok(AttendanceRecord {
        id: row.get(base)?,
        student_id: row.get(base + 1)?,
        course_code: row.get(base + 2)?,
        date,
        confidence: confidence as f32,
        marked_at: timestamp(row, base + 5)?,
    })
}
