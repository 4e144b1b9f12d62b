pub mod error;
pub mod invoker;
pub mod models;
pub mod storage;
#[cfg(feature = "postgres")]
pub mod storage_postgres;

// Re-export commonly used types
pub use error::{InvokeError, Result, StoreError, ValidationError};
pub use invoker::{AnalysisInvoker, AnalysisProgram};
pub use models::{
    AnalysisRecord, AnalysisRequest, AnalysisResponse, AnalysisResult, Difficulty, Doctor,
    ImageAnalysisResult, MedicalCase, TextAnalysisResult, TrainingReport,
};
pub use storage::{
    AnalysisStore, CaseStore, DoctorStore, InMemoryAnalysisStorage, InMemoryCaseStorage,
    InMemoryDoctorStorage, InMemoryReportStorage, ReportStore,
};
#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
