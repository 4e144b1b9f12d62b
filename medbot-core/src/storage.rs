use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::models::{AnalysisRecord, Doctor, MedicalCase, TrainingReport};

/// Trait for storing and retrieving doctors. Emails are unique.
#[async_trait]
pub trait DoctorStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateEmail`] when the email is already registered.
    async fn insert(&self, doctor: Doctor) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Doctor>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Doctor>>;
}

/// Trait for storing and retrieving medical cases
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn insert(&self, case: MedicalCase) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<MedicalCase>>;
}

/// Trait for storing and retrieving training reports
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert(&self, report: TrainingReport) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<TrainingReport>>;
    async fn list_for_doctor(&self, doctor_id: &str) -> Result<Vec<TrainingReport>>;
}

/// Every completed combined analysis is recorded here.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn insert(&self, record: AnalysisRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>>;
    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<AnalysisRecord>>;
}

/// In-memory implementation of DoctorStore
#[derive(Default)]
pub struct InMemoryDoctorStorage {
    doctors: Arc<DashMap<String, Doctor>>,
    // email -> id, mirrors a unique index
    emails: Arc<DashMap<String, String>>,
}

impl InMemoryDoctorStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DoctorStore for InMemoryDoctorStorage {
    async fn insert(&self, doctor: Doctor) -> Result<()> {
        match self.emails.entry(doctor.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateEmail(doctor.email)),
            Entry::Vacant(slot) => {
                slot.insert(doctor.id.clone());
                self.doctors.insert(doctor.id.clone(), doctor);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Doctor>> {
        Ok(self.doctors.get(id).map(|entry| entry.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Doctor>> {
        let Some(id) = self.emails.get(email).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        Ok(self.doctors.get(&id).map(|entry| entry.clone()))
    }
}

/// In-memory implementation of CaseStore
#[derive(Default)]
pub struct InMemoryCaseStorage {
    cases: Arc<DashMap<String, MedicalCase>>,
}

impl InMemoryCaseStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStorage {
    async fn insert(&self, case: MedicalCase) -> Result<()> {
        self.cases.insert(case.id.clone(), case);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MedicalCase>> {
        Ok(self.cases.get(id).map(|entry| entry.clone()))
    }
}

/// In-memory implementation of ReportStore
#[derive(Default)]
pub struct InMemoryReportStorage {
    reports: Arc<DashMap<String, TrainingReport>>,
}

impl InMemoryReportStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStorage {
    async fn insert(&self, report: TrainingReport) -> Result<()> {
        report.validate()?;
        self.reports.insert(report.id.clone(), report);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TrainingReport>> {
        Ok(self.reports.get(id).map(|entry| entry.clone()))
    }

    async fn list_for_doctor(&self, doctor_id: &str) -> Result<Vec<TrainingReport>> {
        let mut reports: Vec<TrainingReport> = self
            .reports
            .iter()
            .filter(|entry| entry.doctor_id == doctor_id)
            .map(|entry| entry.clone())
            .collect();
        reports.sort_by_key(|report| report.created_at);
        Ok(reports)
    }
}

#[derive(Default)]
pub struct InMemoryAnalysisStorage {
    records: Arc<DashMap<String, AnalysisRecord>>,
}

impl InMemoryAnalysisStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStorage {
    async fn insert(&self, record: AnalysisRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.records.get(id).map(|entry| entry.clone()))
    }

    async fn list(&self) -> Result<Vec<AnalysisRecord>> {
        let mut records: Vec<AnalysisRecord> =
            self.records.iter().map(|entry| entry.clone()).collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }
}
