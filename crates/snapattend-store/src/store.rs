use crate::codec;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use snapattend_core::{AttendanceOutcome, Descriptor, DescriptorError, EnrolledPerson, EnrollmentStore};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS students (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    roll_number TEXT NOT NULL UNIQUE,
    descriptor  BLOB,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    student_id  TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    date        TEXT NOT NULL,
    present     INTEGER NOT NULL,
    confidence  REAL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS attendance_by_date ON attendance(date);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("roll number already registered: {0}")]
    DuplicateRollNumber(String),
    #[error("unknown person: {0}")]
    UnknownPerson(String),
    #[error("stored descriptor for {person} is corrupt: {source}")]
    CorruptDescriptor {
        person: String,
        source: DescriptorError,
    },
    #[error("stored timestamp is corrupt: {0}")]
    CorruptTimestamp(#[from] chrono::ParseError),
}

/// One student's attendance on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    pub present: bool,
    pub confidence: Option<f32>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
}

impl AttendanceSummary {
    fn tally(flags: impl IntoIterator<Item = bool>) -> Self {
        let (mut total, mut present) = (0, 0);
        for flag in flags {
            total += 1;
            present += usize::from(flag);
        }
        Self {
            total,
            present,
            absent: total - present,
        }
    }

    pub fn from_records(records: &[AttendanceRecord]) -> Self {
        Self::tally(records.iter().map(|r| r.present))
    }

    pub fn from_outcomes(outcomes: &[AttendanceOutcome]) -> Self {
        Self::tally(outcomes.iter().map(|o| o.is_present))
    }
}

/// Student roster, reference descriptors and attendance sessions in one
/// SQLite database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::debug!(dir = %parent.display(), "created database directory");
            }
        }
        let store = Self::init(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Register a student without a reference descriptor.
    pub fn add_student(&self, name: &str, roll_number: &str) -> Result<EnrolledPerson, StoreError> {
        if self.find_by_roll(roll_number)?.is_some() {
            return Err(StoreError::DuplicateRollNumber(roll_number.to_string()));
        }

        let person = EnrolledPerson::new(uuid::Uuid::new_v4().to_string(), name, roll_number);
        self.conn.execute(
            "INSERT INTO students (id, name, roll_number, descriptor, created_at) VALUES (?1, ?2, ?3, NULL, ?4)",
            params![person.id, person.name, person.roll_number, Utc::now().to_rfc3339()],
        )?;
        tracing::info!(id = %person.id, roll = roll_number, "student registered");
        Ok(person)
    }

    /// The full roster ordered by roll number, reference descriptors attached.
    pub fn students(&self) -> Result<Vec<EnrolledPerson>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, roll_number, descriptor FROM students ORDER BY roll_number")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
            ))
        })?;

        let mut roster = Vec::new();
        for row in rows {
            let (id, name, roll, blob) = row?;
            roster.push(person_from_row(id, name, roll, blob)?);
        }
        Ok(roster)
    }

    pub fn find_by_roll(&self, roll_number: &str) -> Result<Option<EnrolledPerson>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, roll_number, descriptor FROM students WHERE roll_number = ?1",
                params![roll_number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, roll, blob)| person_from_row(id, name, roll, blob))
            .transpose()
    }

    /// Store one run's outcomes for `date` as a new session. Returns the
    /// session id.
    pub fn record_attendance(
        &mut self,
        date: NaiveDate,
        outcomes: &[AttendanceOutcome],
    ) -> Result<String, StoreError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let day = date.format(DATE_FORMAT).to_string();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        {
            let mut known = tx.prepare("SELECT 1 FROM students WHERE id = ?1")?;
            let mut insert = tx.prepare(
                "INSERT INTO attendance (session_id, student_id, date, present, confidence, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for outcome in outcomes {
                if !known.exists(params![outcome.person_id])? {
                    return Err(StoreError::UnknownPerson(outcome.person_id.clone()));
                }
                insert.execute(params![
                    session_id,
                    outcome.person_id,
                    day,
                    outcome.is_present,
                    outcome.confidence.map(f64::from),
                    now,
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            session = %session_id,
            date = %day,
            records = outcomes.len(),
            "attendance recorded"
        );
        Ok(session_id)
    }

    /// Records of the most recent session on `date`, ordered by roll number.
    pub fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let day = date.format(DATE_FORMAT).to_string();
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.name, s.roll_number, a.present, a.confidence, a.recorded_at
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE a.session_id = (
                 SELECT session_id FROM attendance WHERE date = ?1 ORDER BY id DESC LIMIT 1
             )
             ORDER BY s.roll_number",
        )?;
        let rows = stmt.query_map(params![day], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (student_id, name, roll_number, present, confidence, recorded_at) = row?;
            records.push(AttendanceRecord {
                student_id,
                name,
                roll_number,
                present,
                confidence: confidence.map(|c| c as f32),
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)?.with_timezone(&Utc),
            });
        }
        Ok(records)
    }
}

impl EnrollmentStore for SqliteStore {
    type Error = StoreError;

    fn get_descriptor(&self, person_id: &str) -> Result<Option<Descriptor>, StoreError> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT descriptor FROM students WHERE id = ?1",
                params![person_id],
                |row| row.get(0),
            )
            .optional()?;

        blob.flatten()
            .map(|b| {
                codec::decode(&b).map_err(|source| StoreError::CorruptDescriptor {
                    person: person_id.to_string(),
                    source,
                })
            })
            .transpose()
    }

    fn set_descriptor(&mut self, person_id: &str, descriptor: Descriptor) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE students SET descriptor = ?1 WHERE id = ?2",
            params![codec::encode(&descriptor), person_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownPerson(person_id.to_string()));
        }
        tracing::info!(person = person_id, "reference descriptor stored");
        Ok(())
    }
}

fn person_from_row(
    id: String,
    name: String,
    roll_number: String,
    blob: Option<Vec<u8>>,
) -> Result<EnrolledPerson, StoreError> {
    let reference = blob
        .map(|b| codec::decode(&b))
        .transpose()
        .map_err(|source| StoreError::CorruptDescriptor {
            person: id.clone(),
            source,
        })?;
    Ok(EnrolledPerson {
        id,
        name,
        roll_number,
        reference,
    })
}
