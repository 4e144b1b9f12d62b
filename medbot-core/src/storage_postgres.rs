use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::models::{
    AnalysisRecord, Difficulty, Doctor, ImageAnalysisResult, MedicalCase, TextAnalysisResult,
    TrainingReport,
};
use crate::storage::{AnalysisStore, CaseStore, DoctorStore, ReportStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS doctors (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        speciality TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS medical_cases (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        speciality TEXT NOT NULL,
        steps TEXT[] NOT NULL,
        correct_answer TEXT NOT NULL,
        difficulty TEXT NOT NULL CHECK (difficulty IN ('easy', 'medium', 'hard')),
        tags TEXT[] NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS training_reports (
        id TEXT PRIMARY KEY,
        doctor_id TEXT NOT NULL REFERENCES doctors(id),
        case_id TEXT NOT NULL REFERENCES medical_cases(id),
        result TEXT NOT NULL,
        feedback TEXT NOT NULL,
        time_taken INTEGER NOT NULL,
        score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analysis_results (
        id TEXT PRIMARY KEY,
        image_path TEXT,
        text TEXT,
        speciality TEXT,
        image_analysis JSONB,
        text_analysis JSONB,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// PostgreSQL-backed implementation of every store trait, sharing one pool.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("PostgreSQL schema ready");
        Ok(())
    }
}

fn doctor_from_row(row: &PgRow) -> Result<Doctor> {
    Ok(Doctor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        speciality: row.try_get("speciality")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn case_from_row(row: &PgRow) -> Result<MedicalCase> {
    let difficulty: String = row.try_get("difficulty")?;
    Ok(MedicalCase {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        speciality: row.try_get("speciality")?,
        steps: row.try_get("steps")?,
        correct_answer: row.try_get("correct_answer")?,
        difficulty: difficulty.parse::<Difficulty>()?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
    })
}

fn report_from_row(row: &PgRow) -> Result<TrainingReport> {
    let time_taken: i32 = row.try_get("time_taken")?;
    let score: i32 = row.try_get("score")?;
    Ok(TrainingReport {
        id: row.try_get("id")?,
        doctor_id: row.try_get("doctor_id")?,
        case_id: row.try_get("case_id")?,
        result: row.try_get("result")?,
        feedback: row.try_get("feedback")?,
        time_taken: u32::try_from(time_taken)
            .map_err(|_| StoreError::InvalidRecord(format!("negative time_taken {time_taken}")))?,
        score: u32::try_from(score)
            .map_err(|_| StoreError::InvalidRecord(format!("negative score {score}")))?,
        created_at: row.try_get("created_at")?,
    })
}

fn analysis_from_row(row: &PgRow) -> Result<AnalysisRecord> {
    let image_analysis: Option<Json<ImageAnalysisResult>> = row.try_get("image_analysis")?;
    let text_analysis: Option<Json<TextAnalysisResult>> = row.try_get("text_analysis")?;
    Ok(AnalysisRecord {
        id: row.try_get("id")?,
        image_path: row.try_get("image_path")?,
        text: row.try_get("text")?,
        speciality: row.try_get("speciality")?,
        image_analysis: image_analysis.map(|Json(result)| result),
        text_analysis: text_analysis.map(|Json(result)| result),
        created_at: row.try_get("created_at")?,
    })
}

fn to_i32(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::InvalidRecord(format!("{field} too large")))
}

#[async_trait]
impl DoctorStore for PostgresStorage {
    async fn insert(&self, doctor: Doctor) -> Result<()> {
        let outcome = sqlx::query(
            r#"
            INSERT INTO doctors (id, name, email, password_hash, speciality, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&doctor.id)
        .bind(&doctor.name)
        .bind(&doctor.email)
        .bind(&doctor.password_hash)
        .bind(&doctor.speciality)
        .bind(doctor.created_at)
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateEmail(doctor.email))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Doctor>> {
        let row = sqlx::query("SELECT * FROM doctors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doctor_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Doctor>> {
        let row = sqlx::query("SELECT * FROM doctors WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doctor_from_row).transpose()
    }
}

#[async_trait]
impl CaseStore for PostgresStorage {
    async fn insert(&self, case: MedicalCase) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO medical_cases
                (id, title, description, speciality, steps, correct_answer, difficulty, tags, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&case.id)
        .bind(&case.title)
        .bind(&case.description)
        .bind(&case.speciality)
        .bind(&case.steps)
        .bind(&case.correct_answer)
        .bind(case.difficulty.as_str())
        .bind(&case.tags)
        .bind(case.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MedicalCase>> {
        let row = sqlx::query("SELECT * FROM medical_cases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(case_from_row).transpose()
    }
}

#[async_trait]
impl ReportStore for PostgresStorage {
    async fn insert(&self, report: TrainingReport) -> Result<()> {
        report.validate()?;
        sqlx::query(
            r#"
            INSERT INTO training_reports
                (id, doctor_id, case_id, result, feedback, time_taken, score, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&report.id)
        .bind(&report.doctor_id)
        .bind(&report.case_id)
        .bind(&report.result)
        .bind(&report.feedback)
        .bind(to_i32(report.time_taken, "time_taken")?)
        .bind(to_i32(report.score, "score")?)
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TrainingReport>> {
        let row = sqlx::query("SELECT * FROM training_reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn list_for_doctor(&self, doctor_id: &str) -> Result<Vec<TrainingReport>> {
        let rows = sqlx::query(
            "SELECT * FROM training_reports WHERE doctor_id = $1 ORDER BY created_at ASC",
        )
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(report_from_row).collect()
    }
}

#[async_trait]
impl AnalysisStore for PostgresStorage {
    async fn insert(&self, record: AnalysisRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_results
                (id, image_path, text, speciality, image_analysis, text_analysis, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.id)
        .bind(&record.image_path)
        .bind(&record.text)
        .bind(&record.speciality)
        .bind(record.image_analysis.as_ref().map(Json))
        .bind(record.text_analysis.as_ref().map(Json))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let row = sqlx::query("SELECT * FROM analysis_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(analysis_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query("SELECT * FROM analysis_results ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(analysis_from_row).collect()
    }
}
