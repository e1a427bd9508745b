//! Kiosk operations: enrollment, attendance marking and reporting.

use crate::engine::{CaptureResult, EngineError, EngineHandle};
use crate::session::{KioskState, StateTracker};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{Candidate, Embedding, EuclideanMatcher, GalleryEntry, MatchReport, Matcher, Ranking};
use rollcall_store::{
    normalize_course_code, AttendanceEntry, AttendanceInsert, Store, StoreError, Student,
    MAX_PAGE_SIZE,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("kiosk is busy ({0})")]
    Busy(KioskState),
    #[error("no student with matric number {0}")]
    UnknownStudent(String),
    #[error("face already enrolled for {matric_number} (score {score:.3})")]
    DuplicateFace { matric_number: String, score: f32 },
    #[error("no face detected in {frames_examined} frames")]
    NoFace { frames_examined: usize },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Engine(EngineError),
}

impl KioskError {
    /// Errors caused by the caller's input rather than the kiosk.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            KioskError::Validation(_) | KioskError::UnknownStudent(_) | KioskError::DuplicateFace { .. }
        )
    }
}

impl From<StoreError> for KioskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid { .. } | StoreError::DuplicateMatric(_) => {
                KioskError::Validation(err.to_string())
            }
            StoreError::UnknownStudent(id) => KioskError::UnknownStudent(id),
            other => KioskError::Store(other),
        }
    }
}

impl From<EngineError> for KioskError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoFaceDetected { frames_examined } => KioskError::NoFace { frames_examined },
            other => KioskError::Engine(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KioskSettings {
    pub match_threshold: f32,
    pub top_k: usize,
    pub result_hold: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub student: Student,
    /// Detection confidence of the enrolled face.
    pub quality: f32,
    /// True when an earlier embedding was replaced.
    pub replaced: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    Marked {
        student: Student,
        course_code: String,
        date: NaiveDate,
        score: f32,
        candidates: Vec<Candidate>,
    },
    AlreadyMarked {
        student: Student,
        course_code: String,
        date: NaiveDate,
        score: f32,
        marked_at: DateTime<Utc>,
    },
    NoMatch {
        course_code: String,
        threshold: f32,
        candidates: Vec<Candidate>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub student: Option<Student>,
    pub quality: f32,
    pub report: MatchReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct KioskStatus {
    pub state: KioskState,
    pub source: String,
    pub match_threshold: f32,
    pub top_k: usize,
    pub students: i64,
    pub enrolled: i64,
    pub attendance: i64,
}

/// Returns the kiosk to `Ready` if a capture ends without reaching `Showing`.
struct CaptureGuard<'a> {
    state: &'a StateTracker,
    finished: bool,
}

impl<'a> CaptureGuard<'a> {
    fn claim(state: &'a StateTracker) -> Result<Self, KioskError> {
        if !state.try_begin() {
            return Err(KioskError::Busy(state.current()));
        }
        Ok(Self {
            state,
            finished: false,
        })
    }

    fn advance(&self, next: KioskState) {
        self.state.transition(next);
    }

    /// The engine is gone; nothing can be captured until restart.
    fn fault(&mut self) {
        self.finished = true;
        self.state.transition(KioskState::Faulted);
    }

    fn finish(mut self) {
        self.finished = true;
        self.state.transition(KioskState::Showing);
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.transition(KioskState::Ready);
        }
    }
}

pub struct Kiosk {
    store: Store,
    engine: EngineHandle,
    state: Arc<StateTracker>,
    matcher: EuclideanMatcher,
    result_hold: Duration,
}

impl Kiosk {
    pub fn new(store: Store, engine: EngineHandle, settings: KioskSettings) -> Self {
        let state = Arc::new(StateTracker::new());
        state.transition(KioskState::Ready);
        Self {
            store,
            engine,
            state,
            matcher: EuclideanMatcher {
                threshold: settings.match_threshold,
                top_k: settings.top_k,
            },
            result_hold: settings.result_hold,
        }
    }

    pub fn state(&self) -> &Arc<StateTracker> {
        &self.state
    }

    pub async fn register_student(&self, name: &str, matric_number: &str) -> Result<Student, KioskError> {
        let student = self.store.insert_student(name, matric_number).await?;
        tracing::info!(matric = %student.matric_number, "student registered");
        Ok(student)
    }

    /// Capture the student's face and store it as their embedding.
    ///
    /// Rejected when the face already matches a different enrolled student.
    pub async fn enroll(&self, matric_number: &str) -> Result<EnrollOutcome, KioskError> {
        let student = self.require_student(matric_number).await?;
        let mut guard = CaptureGuard::claim(&self.state)?;

        let capture = self.capture(&mut guard).await?;
        guard.advance(KioskState::Processing);
        let probe = validate_probe(&capture)?;

        guard.advance(KioskState::Matching);
        let report = self.scan_gallery(probe).await?;
        if let Some(best) = report.best.as_ref().filter(|b| b.subject_id != student.id) {
            tracing::warn!(
                matric = %student.matric_number,
                existing = %best.label,
                score = best.score,
                "enrollment rejected: face belongs to another student"
            );
            return Err(KioskError::DuplicateFace {
                matric_number: best.label.clone(),
                score: best.score,
            });
        }

        let replaced = student.enrolled_at.is_some();
        let student = self.store.save_embedding(&student.id, probe).await?;
        tracing::info!(
            matric = %student.matric_number,
            quality = capture.quality,
            replaced,
            "student enrolled"
        );

        guard.finish();
        self.schedule_ready();
        Ok(EnrollOutcome {
            student,
            quality: capture.quality,
            replaced,
        })
    }

    /// Capture a face, find the student and record attendance for today.
    pub async fn mark_attendance(&self, course_code: &str) -> Result<AttendanceOutcome, KioskError> {
        let course_code = normalize_course_code(course_code)?;
        let mut guard = CaptureGuard::claim(&self.state)?;

        let capture = self.capture(&mut guard).await?;
        guard.advance(KioskState::Processing);
        let probe = validate_probe(&capture)?;

        guard.advance(KioskState::Matching);
        let report = self.scan_gallery(probe).await?;
        let Some(best) = report.best.clone() else {
            tracing::info!(
                course = %course_code,
                scanned = report.scanned,
                top_score = report.ranked.first().map(|c| c.score),
                "no match"
            );
            guard.finish();
            self.schedule_ready();
            return Ok(AttendanceOutcome::NoMatch {
                course_code,
                threshold: report.threshold,
                candidates: report.ranked,
            });
        };

        let student = self
            .store
            .student_by_id(&best.subject_id)
            .await?
            .ok_or_else(|| KioskError::UnknownStudent(best.label.clone()))?;
        let date = today();
        let outcome = match self
            .store
            .record_attendance(&student.id, &course_code, date, best.score)
            .await?
        {
            AttendanceInsert::Recorded(record) => {
                tracing::info!(
                    matric = %student.matric_number,
                    course = %record.course_code,
                    score = best.score,
                    "attendance marked"
                );
                AttendanceOutcome::Marked {
                    student,
                    course_code: record.course_code,
                    date,
                    score: best.score,
                    candidates: report.ranked,
                }
            }
            AttendanceInsert::AlreadyRecorded(record) => {
                tracing::info!(
                    matric = %student.matric_number,
                    course = %record.course_code,
                    "attendance already marked today"
                );
                AttendanceOutcome::AlreadyMarked {
                    student,
                    course_code: record.course_code,
                    date,
                    score: best.score,
                    marked_at: record.marked_at,
                }
            }
        };

        guard.finish();
        self.schedule_ready();
        Ok(outcome)
    }

    /// Capture and rank without recording anything.
    pub async fn identify(&self) -> Result<Identification, KioskError> {
        let mut guard = CaptureGuard::claim(&self.state)?;

        let capture = self.capture(&mut guard).await?;
        guard.advance(KioskState::Processing);
        let probe = validate_probe(&capture)?;

        guard.advance(KioskState::Matching);
        let report = self.scan_gallery(probe).await?;
        let student = match &report.best {
            Some(best) => self.store.student_by_id(&best.subject_id).await?,
            None => None,
        };

        guard.finish();
        self.schedule_ready();
        Ok(Identification {
            student,
            quality: capture.quality,
            report,
        })
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, KioskError> {
        Ok(self.store.list_students().await?)
    }

    pub async fn remove_student(&self, matric_number: &str) -> Result<(), KioskError> {
        if !self.store.remove_student(matric_number).await? {
            return Err(KioskError::UnknownStudent(matric_number.trim().to_ascii_uppercase()));
        }
        tracing::info!(matric = %matric_number, "student removed");
        Ok(())
    }

    /// Attendance for a course; `date` defaults to today.
    pub async fn attendance(
        &self,
        course_code: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceEntry>, KioskError> {
        let date = date.unwrap_or_else(today);
        Ok(self.store.attendance_for(course_code, date).await?)
    }

    pub async fn status(&self) -> Result<KioskStatus, KioskError> {
        let counts = self.store.counts().await?;
        Ok(KioskStatus {
            state: self.state.current(),
            source: self.engine.source().to_string(),
            match_threshold: self.matcher.threshold,
            top_k: self.matcher.top_k,
            students: counts.students,
            enrolled: counts.enrolled,
            attendance: counts.attendance,
        })
    }

    async fn capture(&self, guard: &mut CaptureGuard<'_>) -> Result<CaptureResult, KioskError> {
        match self.engine.capture().await {
            Ok(capture) => Ok(capture),
            Err(EngineError::ChannelClosed) => {
                guard.fault();
                Err(KioskError::Engine(EngineError::ChannelClosed))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn require_student(&self, matric_number: &str) -> Result<Student, KioskError> {
        self.store
            .student_by_matric(matric_number)
            .await?
            .ok_or_else(|| KioskError::UnknownStudent(matric_number.trim().to_ascii_uppercase()))
    }

    /// Linear scan over every enrolled student, one page at a time.
    async fn scan_gallery(&self, probe: &Embedding) -> Result<MatchReport, KioskError> {
        let mut ranking = Ranking::new(self.matcher.top_k);
        let mut after = 0;
        let mut pages = 0;
        let mut unreadable = 0;
        loop {
            let page = self.store.enrolled_page(after, MAX_PAGE_SIZE).await?;
            let Some(last) = page.last_seq else {
                break;
            };
            after = last;
            pages += 1;
            unreadable += page.unreadable;

            let full = page.fetched == MAX_PAGE_SIZE;
            let entries: Vec<GalleryEntry> = page
                .students
                .into_iter()
                .map(|e| GalleryEntry {
                    subject_id: e.student.id,
                    label: e.student.matric_number,
                    embedding: e.embedding,
                })
                .collect();
            self.matcher.scan(probe, &entries, &mut ranking);
            if !full {
                break;
            }
        }

        let report = ranking.into_report(self.matcher.threshold);
        if unreadable > 0 {
            tracing::warn!(unreadable, "gallery rows could not be decrypted and were not compared");
        }
        tracing::debug!(
            pages,
            scanned = report.scanned,
            skipped = report.skipped,
            best = report.best.as_ref().map(|c| c.score),
            "gallery scanned"
        );
        Ok(report)
    }

    /// Hold `Showing` for the configured time, then return to `Ready`.
    fn schedule_ready(&self) {
        if self.result_hold.is_zero() {
            self.state.transition(KioskState::Ready);
            return;
        }
        let state = Arc::clone(&self.state);
        let hold = self.result_hold;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            state.transition(KioskState::Ready);
        });
    }
}

fn validate_probe(capture: &CaptureResult) -> Result<&Embedding, KioskError> {
    let probe = &capture.embedding;
    if probe.values.is_empty() || probe.values.iter().any(|v| !v.is_finite()) {
        return Err(KioskError::Engine(EngineError::InvalidEmbedding { dim: probe.dim() }));
    }
    Ok(probe)
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, CaptureSettings};
    use image::{Rgb, RgbImage};
    use rollcall_core::{AnalyzeError, BoundingBox, FaceAnalyzer, FaceSample};
    use rollcall_hw::StillImageSource;
    use rollcall_store::{EmbeddingCipher, EnrollmentStatus};
    use std::sync::Mutex;

    /// Whoever is "in front of the camera": the analyzer returns this embedding for every frame.
    #[derive(Clone, Default)]
    struct Subject(Arc<Mutex<Option<Vec<f32>>>>);

    impl Subject {
        fn show(&self, values: &[f32]) {
            *self.0.lock().unwrap() = Some(values.to_vec());
        }

        fn leave(&self) {
            *self.0.lock().unwrap() = None;
        }
    }

    struct SubjectAnalyzer(Subject);

    impl FaceAnalyzer for SubjectAnalyzer {
        fn analyze(&mut self, _image: &RgbImage) -> Result<Option<FaceSample>, AnalyzeError> {
            Ok(self.0 .0.lock().unwrap().clone().map(|values| FaceSample {
                face: BoundingBox {
                    x: 10.0,
                    y: 10.0,
                    width: 120.0,
                    height: 120.0,
                    confidence: 0.9,
                    landmarks: None,
                },
                embedding: Embedding::new(values),
            }))
        }
    }

    const ADA: [f32; 4] = [1.0, 0.0, 0.0, 0.0];
    const ADA_AGAIN: [f32; 4] = [0.96, 0.28, 0.0, 0.0];
    const GRACE: [f32; 4] = [0.0, 1.0, 0.0, 0.0];
    const STRANGER: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    async fn kiosk_with(analyzer: Box<dyn FaceAnalyzer + Send>, hold: Duration) -> Kiosk {
        let source =
            StillImageSource::from_images("fixture", vec![RgbImage::from_pixel(16, 16, Rgb([120, 110, 100]))]);
        let engine = spawn_engine(
            Box::new(source),
            analyzer,
            CaptureSettings {
                frames_per_capture: 2,
                timeout: Duration::from_millis(60),
                poll_interval: Duration::from_millis(5),
            },
            0,
        )
        .unwrap();
        let store = Store::open_in_memory(EmbeddingCipher::generate()).await.unwrap();
        Kiosk::new(
            store,
            engine,
            KioskSettings {
                match_threshold: 0.45,
                top_k: 5,
                result_hold: hold,
            },
        )
    }

    async fn kiosk_with_hold(hold: Duration) -> (Kiosk, Subject) {
        let subject = Subject::default();
        let kiosk = kiosk_with(Box::new(SubjectAnalyzer(subject.clone())), hold).await;
        (kiosk, subject)
    }

    async fn kiosk() -> (Kiosk, Subject) {
        kiosk_with_hold(Duration::ZERO).await
    }

    async fn enrolled(kiosk: &Kiosk, subject: &Subject, name: &str, matric: &str, face: &[f32]) {
        kiosk.register_student(name, matric).await.unwrap();
        subject.show(face);
        kiosk.enroll(matric).await.unwrap();
    }

    #[tokio::test]
    async fn test_enroll_then_mark_attendance() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Ada Lovelace", "CS/001", &ADA).await;
        enrolled(&kiosk, &subject, "Grace Hopper", "CS/002", &GRACE).await;

        subject.show(&ADA_AGAIN);
        let outcome = kiosk.mark_attendance("csc 401").await.unwrap();
        let (student, course_code, score, candidates) = match outcome {
            AttendanceOutcome::Marked { student, course_code, score, candidates, .. } => {
                (student, course_code, score, candidates)
            }
            other => panic!("expected Marked, got {other:?}"),
        };
        assert_eq!(student.matric_number, "CS/001");
        assert_eq!(course_code, "CSC401");
        assert!(score > 0.8);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].label, "CS/001");
        assert_eq!(kiosk.state().current(), KioskState::Ready);

        let report = kiosk.attendance("CSC401", None).await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_second_scan_same_day_already_marked() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Ada", "CS/001", &ADA).await;

        subject.show(&ADA);
        assert!(matches!(
            kiosk.mark_attendance("CSC401").await.unwrap(),
            AttendanceOutcome::Marked { .. }
        ));
        assert!(matches!(
            kiosk.mark_attendance("CSC401").await.unwrap(),
            AttendanceOutcome::AlreadyMarked { .. }
        ));
        assert_eq!(kiosk.status().await.unwrap().attendance, 1);
    }

    #[tokio::test]
    async fn test_unknown_face_no_match() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Ada", "CS/001", &ADA).await;

        subject.show(&STRANGER);
        let outcome = kiosk.mark_attendance("CSC401").await.unwrap();
        let (candidates, threshold) = match outcome {
            AttendanceOutcome::NoMatch { candidates, threshold, .. } => (candidates, threshold),
            other => panic!("expected NoMatch, got {other:?}"),
        };
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].score < threshold);
        assert_eq!(kiosk.status().await.unwrap().attendance, 0);
    }

    #[tokio::test]
    async fn test_enroll_rejects_face_of_other_student() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Ada", "CS/001", &ADA).await;
        kiosk.register_student("Impostor", "CS/002").await.unwrap();

        subject.show(&ADA_AGAIN);
        let err = kiosk.enroll("CS/002").await.unwrap_err();
        assert!(matches!(err, KioskError::DuplicateFace { ref matric_number, .. } if matric_number == "CS/001"));
        assert!(err.is_invalid_input());
        assert_eq!(kiosk.state().current(), KioskState::Ready);

        let students = kiosk.list_students().await.unwrap();
        assert_eq!(students[1].status, EnrollmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_re_enroll_same_student_replaces() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Ada", "CS/001", &ADA).await;

        subject.show(&ADA_AGAIN);
        let outcome = kiosk.enroll("cs/001").await.unwrap();
        assert!(outcome.replaced);
        assert_eq!(kiosk.status().await.unwrap().enrolled, 1);
    }

    #[tokio::test]
    async fn test_enroll_unknown_student_does_not_capture() {
        let (kiosk, _subject) = kiosk().await;
        let err = kiosk.enroll("CS/404").await.unwrap_err();
        assert!(matches!(err, KioskError::UnknownStudent(m) if m == "CS/404"));
        assert_eq!(kiosk.state().current(), KioskState::Ready);
    }

    #[tokio::test]
    async fn test_no_face_returns_to_ready() {
        let (kiosk, subject) = kiosk().await;
        subject.leave();
        let err = kiosk.mark_attendance("CSC401").await.unwrap_err();
        assert!(matches!(err, KioskError::NoFace { frames_examined } if frames_examined > 0));
        assert_eq!(kiosk.state().current(), KioskState::Ready);
    }

    #[tokio::test]
    async fn test_unusable_embedding_rejected_before_matching() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Ada Lovelace", "CS/001", &ADA).await;

        subject.show(&[f32::NAN, 0.0, 0.0, 0.0]);
        let err = kiosk.mark_attendance("CSC401").await.unwrap_err();
        assert!(matches!(
            err,
            KioskError::Engine(EngineError::InvalidEmbedding { dim: 4 })
        ));
        assert_eq!(kiosk.state().current(), KioskState::Ready);
        assert!(kiosk.attendance("CSC401", None).await.unwrap().is_empty());

        kiosk.register_student("Grace Hopper", "CS/002").await.unwrap();
        subject.show(&[]);
        let err = kiosk.enroll("CS/002").await.unwrap_err();
        assert!(matches!(
            err,
            KioskError::Engine(EngineError::InvalidEmbedding { dim: 0 })
        ));
        assert_eq!(kiosk.state().current(), KioskState::Ready);
        let status = kiosk.status().await.unwrap();
        assert_eq!((status.enrolled, status.attendance), (1, 0));
    }

    #[tokio::test]
    async fn test_busy_while_capture_in_progress() {
        let (kiosk, _subject) = kiosk().await;
        assert!(kiosk.state().try_begin());
        let err = kiosk.identify().await.unwrap_err();
        assert!(matches!(err, KioskError::Busy(KioskState::Capturing)));
    }

    #[tokio::test]
    async fn test_invalid_course_rejected_before_capture() {
        let (kiosk, _subject) = kiosk().await;
        let err = kiosk.mark_attendance("  ").await.unwrap_err();
        assert!(matches!(err, KioskError::Validation(_)));
        assert_eq!(kiosk.state().current(), KioskState::Ready);
    }

    #[tokio::test]
    async fn test_identify_writes_nothing() {
        let (kiosk, subject) = kiosk().await;
        enrolled(&kiosk, &subject, "Grace", "CS/002", &GRACE).await;

        subject.show(&GRACE);
        let id = kiosk.identify().await.unwrap();
        assert_eq!(id.student.unwrap().matric_number, "CS/002");
        assert!(id.report.is_match());
        assert_eq!(kiosk.status().await.unwrap().attendance, 0);
    }

    #[tokio::test]
    async fn test_scan_covers_every_page() {
        let (kiosk, subject) = kiosk().await;
        // 120 enrolled students: three gallery pages. The match sits on the last one.
        for i in 0..120 {
            let s = kiosk.store.insert_student("Student", &format!("M{i:03}")).await.unwrap();
            let mut values = vec![0.0f32; 4];
            values[(i % 3) + 1] = 1.0;
            kiosk.store.save_embedding(&s.id, &Embedding::new(values)).await.unwrap();
        }
        let last = kiosk.register_student("Last", "M999").await.unwrap();
        kiosk.store.save_embedding(&last.id, &Embedding::new(ADA.to_vec())).await.unwrap();

        subject.show(&ADA);
        let id = kiosk.identify().await.unwrap();
        assert_eq!(id.report.scanned, 121);
        assert_eq!(id.report.ranked.len(), 5);
        assert_eq!(id.student.unwrap().matric_number, "M999");
    }

    #[tokio::test]
    async fn test_result_held_before_ready() {
        let (kiosk, subject) = kiosk_with_hold(Duration::from_millis(400)).await;
        enrolled(&kiosk, &subject, "Ada", "CS/001", &ADA).await;
        assert_eq!(kiosk.state().current(), KioskState::Showing);
        assert!(matches!(kiosk.identify().await, Err(KioskError::Busy(KioskState::Showing))));

        let mut rx = kiosk.state().subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == KioskState::Ready))
            .await
            .unwrap()
            .unwrap();
    }

    struct CrashingAnalyzer;

    impl FaceAnalyzer for CrashingAnalyzer {
        fn analyze(&mut self, _image: &RgbImage) -> Result<Option<FaceSample>, AnalyzeError> {
            panic!("inference backend crashed");
        }
    }

    #[tokio::test]
    async fn test_engine_loss_faults_kiosk() {
        let kiosk = kiosk_with(Box::new(CrashingAnalyzer), Duration::ZERO).await;
        let err = kiosk.identify().await.unwrap_err();
        assert!(matches!(err, KioskError::Engine(EngineError::ChannelClosed)));
        assert_eq!(kiosk.state().current(), KioskState::Faulted);
        assert!(matches!(kiosk.identify().await, Err(KioskError::Busy(KioskState::Faulted))));
    }

    #[tokio::test]
    async fn test_remove_student() {
        let (kiosk, _subject) = kiosk().await;
        kiosk.register_student("Ada", "CS/001").await.unwrap();
        kiosk.remove_student("cs/001").await.unwrap();
        assert!(matches!(
            kiosk.remove_student("CS/001").await,
            Err(KioskError::UnknownStudent(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_matric_is_validation_error() {
        let (kiosk, _subject) = kiosk().await;
        kiosk.register_student("Ada", "CS/001").await.unwrap();
        let err = kiosk.register_student("Other", "CS/001").await.unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = AttendanceOutcome::NoMatch {
            course_code: "CSC401".into(),
            threshold: 0.45,
            candidates: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "no_match");
        assert_eq!(json["course_code"], "CSC401");
    }
}
