use medbot_core::{AnalysisResponse, Difficulty};
use reqwest::{
    Client, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("push channel is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// An image picked for upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCase {
    pub title: String,
    pub description: String,
    pub speciality: String,
    pub steps: Vec<String>,
    pub correct_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Answer {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CaseCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Token {
    token: String,
}

/// HTTP client for the Medical AI Bot server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Posts the combined analysis form. The image part is sent only when an image is given,
    /// the text part only when the text is not blank.
    pub async fn analyze(
        &self,
        image: Option<ImageFile>,
        text: Option<&str>,
        speciality: Option<&str>,
    ) -> Result<AnalysisResponse> {
        let mut form = Form::new();
        if let Some(image) = image {
            form = form.part("image", Part::bytes(image.bytes).file_name(image.file_name));
        }
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            form = form.text("text", text.to_string());
        }
        if let Some(speciality) = speciality.filter(|s| !s.trim().is_empty()) {
            form = form.text("speciality", speciality.to_string());
        }

        debug!(url = %self.url("/"), "Submitting analysis form");
        let response = self.http.post(self.url("/")).multipart(form).send().await?;
        decode(response).await
    }

    pub async fn ask_ai(&self, question: &str) -> Result<String> {
        let answer: Answer = self.post_json("/ask-ai", &json!({ "question": question })).await?;
        Ok(answer.answer)
    }

    pub async fn ask(&self, question: &str, speciality: &str) -> Result<String> {
        let answer: Answer = self
            .post_json(
                "/ask",
                &json!({ "question": question, "speciality": speciality }),
            )
            .await?;
        Ok(answer.answer)
    }

    /// Returns the id of the stored case.
    pub async fn add_case(&self, case: &NewCase) -> Result<String> {
        let created: CaseCreated = self.post_json("/add-case", case).await?;
        Ok(created.id)
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        speciality: &str,
    ) -> Result<String> {
        let body = json!({
            "name": name,
            "email": email,
            "password": password,
            "speciality": speciality
        });
        let message: Message = self.post_json("/register", &body).await?;
        Ok(message.message)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let token: Token = self
            .post_json("/login", &json!({ "email": email, "password": password }))
            .await?;
        Ok(token.token)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Api { status, message })
}
