use serde::{Deserialize, Serialize};

// Every field is optional so that a missing value is reported as a validation error by the
// handler rather than as a deserialization failure.

#[derive(Debug, Deserialize)]
pub struct AskAiRequest {
    pub question: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: Option<String>,
    pub speciality: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCaseRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub speciality: Option<String>,
    pub steps: Option<Vec<String>>,
    pub correct_answer: Option<String>,
    pub difficulty: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub speciality: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// The value of a required text field, unless it is missing or blank.
pub fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
