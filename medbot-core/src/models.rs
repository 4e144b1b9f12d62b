use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ValidationError::UnknownDifficulty(other.to_string())),
        }
    }
}

/// A training case authored by a doctor. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalCase {
    pub id: String,
    pub title: String,
    pub description: String,
    pub speciality: String,
    pub steps: Vec<String>,
    pub correct_answer: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MedicalCase {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        speciality: impl Into<String>,
        steps: Vec<String>,
        correct_answer: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            speciality: speciality.into(),
            steps,
            correct_answer: correct_answer.into(),
            difficulty: Difficulty::default(),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    /// Unique across all doctors.
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub speciality: String,
    pub created_at: DateTime<Utc>,
}

impl Doctor {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        speciality: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            speciality: speciality.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a doctor working through a [`MedicalCase`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub id: String,
    pub doctor_id: String,
    pub case_id: String,
    pub result: String,
    pub feedback: String,
    /// Minutes spent on the case.
    pub time_taken: u32,
    pub score: u32,
    pub created_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn new(
        doctor_id: impl Into<String>,
        case_id: impl Into<String>,
        result: impl Into<String>,
        feedback: impl Into<String>,
        time_taken: u32,
        score: u32,
    ) -> Result<Self, ValidationError> {
        let report = Self {
            id: Uuid::new_v4().to_string(),
            doctor_id: doctor_id.into(),
            case_id: case_id.into(),
            result: result.into(),
            feedback: feedback.into(),
            time_taken,
            score,
            created_at: Utc::now(),
        };
        report.validate()?;
        Ok(report)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.score > 100 {
            return Err(ValidationError::ScoreOutOfRange(self.score));
        }
        if self.result.trim().is_empty() {
            return Err(ValidationError::Missing("Result is required"));
        }
        if self.feedback.trim().is_empty() {
            return Err(ValidationError::Missing("Feedback is required"));
        }
        Ok(())
    }
}

/// Input of the combined image + text analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub image: Option<PathBuf>,
    pub text: Option<String>,
    pub speciality: Option<String>,
}

impl AnalysisRequest {
    /// Blank text counts as absent. At least one of image and text must remain.
    pub fn new(
        image: Option<PathBuf>,
        text: Option<String>,
        speciality: Option<String>,
    ) -> Result<Self, ValidationError> {
        let text = text.filter(|t| !t.trim().is_empty());
        let speciality = speciality.filter(|s| !s.trim().is_empty());
        if image.is_none() && text.is_none() {
            return Err(ValidationError::Missing("An image or text is required"));
        }
        Ok(Self {
            image,
            text,
            speciality,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysisResult {
    #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Label to probability, e.g. `"Pneumonia": 0.2`.
    #[serde(flatten)]
    pub predictions: BTreeMap<String, f64>,
}

impl ImageAnalysisResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The line a viewer shows first: the verdict, else the error.
    pub fn headline(&self) -> Option<&str> {
        self.result.as_deref().or(self.error.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextAnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Entity label to the matched text.
    #[serde(flatten)]
    pub entities: BTreeMap<String, String>,
}

impl TextAnalysisResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// All entries in display order, with the error (if any) first.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries = Vec::with_capacity(self.entities.len() + 1);
        if let Some(error) = &self.error {
            entries.push(("error", error.as_str()));
        }
        entries.extend(self.entities.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        entries
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    Image(ImageAnalysisResult),
    Text(TextAnalysisResult),
}

/// Wire shape of the combined analysis endpoint: one optional slot per result kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub image_analysis: Option<ImageAnalysisResult>,
    #[serde(default)]
    pub text_analysis: Option<TextAnalysisResult>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl AnalysisResponse {
    pub fn insert(&mut self, result: AnalysisResult) {
        match result {
            AnalysisResult::Image(image) => {
                if image.image_url.is_some() {
                    self.image_url = image.image_url.clone();
                }
                self.image_analysis = Some(image);
            }
            AnalysisResult::Text(text) => self.text_analysis = Some(text),
        }
    }

    pub fn results(&self) -> Vec<AnalysisResult> {
        let mut results = Vec::with_capacity(2);
        if let Some(image) = &self.image_analysis {
            results.push(AnalysisResult::Image(image.clone()));
        }
        if let Some(text) = &self.text_analysis {
            results.push(AnalysisResult::Text(text.clone()));
        }
        results
    }

    pub fn is_empty(&self) -> bool {
        self.image_analysis.is_none() && self.text_analysis.is_none()
    }
}

impl FromIterator<AnalysisResult> for AnalysisResponse {
    fn from_iter<I: IntoIterator<Item = AnalysisResult>>(iter: I) -> Self {
        let mut response = AnalysisResponse::default();
        for result in iter {
            response.insert(result);
        }
        response
    }
}

/// One completed combined analysis, kept as an audit trail of what was submitted and returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    /// Stored upload path, when an image was analyzed.
    pub image_path: Option<String>,
    pub text: Option<String>,
    pub speciality: Option<String>,
    pub image_analysis: Option<ImageAnalysisResult>,
    pub text_analysis: Option<TextAnalysisResult>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(request: &AnalysisRequest, response: &AnalysisResponse) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            image_path: request
                .image
                .as_ref()
                .map(|path| path.display().to_string()),
            text: request.text.clone(),
            speciality: request.speciality.clone(),
            image_analysis: response.image_analysis.clone(),
            text_analysis: response.text_analysis.clone(),
            created_at: Utc::now(),
        }
    }
}
