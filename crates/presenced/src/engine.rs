use crate::store::SqliteStore;
use chrono::NaiveDate;
use presence_core::{AttendanceEngine, AttendanceEntry, CheckIn, DailySummary, EngineError, Recognition, SubjectInfo};
use std::sync::Arc;

pub type Engine = AttendanceEngine<SqliteStore>;

/// Clone-safe handle to the shared engine.
///
/// Engine calls block on SQLite and on the extractor, so every request runs
/// on Tokio's blocking pool and the D-Bus executor never stalls.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Engine>,
}

impl EngineHandle {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn extractor_name(&self) -> &'static str {
        self.engine.extractor_name()
    }

    pub fn threshold(&self) -> f32 {
        self.engine.threshold()
    }

    pub fn late_cutoff(&self) -> chrono::NaiveTime {
        self.engine.policy().cutoff()
    }

    async fn run<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || op(&engine))
            .await
            .map_err(|e| EngineError::Storage(format!("engine task failed: {e}")))?
    }

    pub async fn enroll(
        &self,
        subject_id: String,
        name: String,
        category: String,
        image: Vec<u8>,
    ) -> Result<SubjectInfo, EngineError> {
        self.run(move |engine| {
            engine
                .enroll(&subject_id, &name, &category, &image)
                .map(|subject| subject.info())
        })
        .await
    }

    pub async fn recognize(&self, image: Vec<u8>) -> Result<Recognition, EngineError> {
        self.run(move |engine| engine.recognize(&image)).await
    }

    pub async fn check_in(&self, image: Vec<u8>) -> Result<CheckIn, EngineError> {
        self.run(move |engine| engine.check_in(&image)).await
    }

    pub async fn subjects(&self) -> Result<Vec<SubjectInfo>, EngineError> {
        self.run(|engine| Ok(engine.subjects()?.iter().map(|s| s.info()).collect()))
            .await
    }

    /// Records for `date`, or for today when `None`.
    pub async fn attendance(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<(NaiveDate, Vec<AttendanceEntry>), EngineError> {
        self.run(move |engine| {
            let date = date.unwrap_or_else(|| engine.today());
            Ok((date, engine.attendance_for_date(date)?))
        })
        .await
    }

    pub async fn summary(&self, date: Option<NaiveDate>) -> Result<DailySummary, EngineError> {
        self.run(move |engine| engine.daily_summary(date.unwrap_or_else(|| engine.today())))
            .await
    }
}
