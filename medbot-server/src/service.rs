use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::Json,
    routing::{get, post},
};
use medbot_core::{
    AnalysisInvoker, AnalysisRecord, AnalysisRequest, AnalysisResponse, AnalysisResult,
    AnalysisStore, CaseStore, Difficulty, Doctor, DoctorStore, ImageAnalysisResult,
    InMemoryAnalysisStorage, InMemoryCaseStorage, InMemoryDoctorStorage, InvokeError,
    MedicalCase, PostgresStorage, TextAnalysisResult,
};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    auth::{CredentialError, PasswordHasher, Pbkdf2Hasher, TokenIssuer},
    config::{AnalysisPrograms, ServerConfig},
    middleware::{RateLimiter, correlation_id_middleware, rate_limit_middleware, security_headers},
    models::{
        AddCaseRequest, AnswerResponse, AskAiRequest, AskRequest, LoginRequest, RegisterRequest,
        TokenResponse, required,
    },
    upload::{AnalysisUpload, UploadSettings},
};

pub const BANNER: &str = "Server is running! Welcome to Medical AI Bot.";
const NUL_MESSAGE: &str = "Input must not contain NUL characters";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn unauthorized_error(message: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

fn not_found_error(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message })))
}

fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
}

fn created(body: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(body))
}

#[derive(Clone)]
pub struct AppState {
    pub doctors: Arc<dyn DoctorStore>,
    pub cases: Arc<dyn CaseStore>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub invoker: AnalysisInvoker,
    pub programs: Arc<AnalysisPrograms>,
    pub uploads: UploadSettings,
    pub hasher: Arc<dyn PasswordHasher>,
    pub tokens: TokenIssuer,
    pub rate_limiter: RateLimiter,
}

impl FromRef<AppState> for UploadSettings {
    fn from_ref(state: &AppState) -> Self {
        state.uploads.clone()
    }
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        doctors: Arc<dyn DoctorStore>,
        cases: Arc<dyn CaseStore>,
        analyses: Arc<dyn AnalysisStore>,
    ) -> Self {
        Self {
            doctors,
            cases,
            analyses,
            invoker: AnalysisInvoker::new(config.analysis_timeout),
            programs: Arc::new(config.programs.clone()),
            uploads: UploadSettings::new(&config.upload_dir),
            hasher: Arc::new(Pbkdf2Hasher::new(config.password_hash_iterations)),
            tokens: TokenIssuer::new(config.jwt_secret.clone()),
            rate_limiter: RateLimiter::new(&config.rate_limit),
        }
    }

    pub fn in_memory(config: &ServerConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryDoctorStorage::new()),
            Arc::new(InMemoryCaseStorage::new()),
            Arc::new(InMemoryAnalysisStorage::new()),
        )
    }
}

pub async fn create_app(config: &ServerConfig) -> anyhow::Result<Router> {
    let app_state = create_app_state(config).await?;
    Ok(build_router(app_state))
}

async fn create_app_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // Check for DATABASE_URL and use PostgreSQL if available, otherwise use in-memory
    let Some(database_url) = &config.database_url else {
        info!("Using in-memory storage (set DATABASE_URL to use PostgreSQL)");
        return Ok(AppState::in_memory(config));
    };

    match PostgresStorage::connect(database_url).await {
        Ok(storage) => {
            info!("Using PostgreSQL storage");
            let storage = Arc::new(storage);
            Ok(AppState::new(
                config,
                storage.clone(),
                storage.clone(),
                storage,
            ))
        }
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            );
            Ok(AppState::in_memory(config))
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let body_limit = app_state.uploads.body_limit();
    let uploads = ServeDir::new(&app_state.uploads.dir);

    let mut router = Router::new()
        .route(
            "/",
            get(root)
                .post(analyze)
                .layer::<_, Infallible>(DefaultBodyLimit::max(body_limit))
                .layer::<_, Infallible>(RequestBodyLimitLayer::new(body_limit)),
        )
        .route("/ask-ai", post(ask_ai))
        .route("/ask", post(ask))
        .route("/add-case", post(add_case))
        .route("/register", post(register))
        .route("/login", post(login))
        .nest_service("/uploads", uploads)
        .layer(from_fn_with_state(
            app_state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    for header in security_headers() {
        router = router.layer(header);
    }

    router
        .layer(from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn root() -> &'static str {
    BANNER
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "Rejected request body");
        bad_request_error(&rejection.body_text())
    })
}

async fn analyze(
    State(state): State<AppState>,
    upload: AnalysisUpload,
) -> ApiResult<AnalysisResponse> {
    let image = upload.image;
    let request = AnalysisRequest::new(
        image.as_ref().map(|stored| stored.path.clone()),
        upload.text,
        upload.speciality,
    )
    .map_err(|e| bad_request_error(&e.to_string()))?;

    info!(
        has_image = request.image.is_some(),
        has_text = request.text.is_some(),
        "Starting combined analysis"
    );

    let image_task = async {
        let stored = image.as_ref()?;
        let path = stored.path.to_string_lossy().into_owned();
        let result = match state
            .invoker
            .invoke_json::<ImageAnalysisResult>(&state.programs.analyze_image, &[path.as_str()])
            .await
        {
            Ok(mut result) => {
                result.image_url = Some(format!("/uploads/{}", stored.stored_name));
                result
            }
            Err(e) => {
                error!(error = %e, "Image analysis failed");
                ImageAnalysisResult::failed("Failed to analyze image")
            }
        };
        Some(AnalysisResult::Image(result))
    };

    let text_task = async {
        let text = request.text.as_deref()?;
        let mut args = vec![text];
        if let Some(speciality) = request.speciality.as_deref() {
            args.push(speciality);
        }
        let result = match state
            .invoker
            .invoke_json::<TextAnalysisResult>(&state.programs.extract_entities, &args)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Text analysis failed");
                TextAnalysisResult::failed("Failed to analyze text")
            }
        };
        Some(AnalysisResult::Text(result))
    };

    let (image_result, text_result) = tokio::join!(image_task, text_task);
    let response: AnalysisResponse = image_result.into_iter().chain(text_result).collect();

    let record = AnalysisRecord::new(&request, &response);
    let record_id = record.id.clone();
    match state.analyses.insert(record).await {
        Ok(()) => info!(record_id = %record_id, "Analysis recorded"),
        Err(e) => error!(error = %e, "Failed to record analysis"),
    }

    Ok(Json(response))
}

async fn ask_ai(
    State(state): State<AppState>,
    payload: Result<Json<AskAiRequest>, JsonRejection>,
) -> ApiResult<AnswerResponse> {
    let request = json_body(payload)?;
    let Some(question) = required(request.question) else {
        return Err(bad_request_error("Question is required"));
    };

    info!(question_length = question.len(), "Processing AI question");

    match state.invoker.invoke(&state.programs.ask_ai, &[question.as_str()]).await {
        Ok(answer) => Ok(Json(AnswerResponse { answer })),
        Err(InvokeError::InvalidArgument { .. }) => Err(bad_request_error(NUL_MESSAGE)),
        Err(e) => {
            error!(error = %e, "Error processing AI request");
            Err(internal_error("Failed to process request"))
        }
    }
}

async fn ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<AnswerResponse> {
    let request = json_body(payload)?;
    let (Some(question), Some(speciality)) =
        (required(request.question), required(request.speciality))
    else {
        return Err(bad_request_error("Question and speciality are required"));
    };

    info!(speciality = %speciality, "Analyzing question");

    match state
        .invoker
        .invoke(
            &state.programs.analyze_text,
            &[question.as_str(), speciality.as_str()],
        )
        .await
    {
        Ok(answer) => Ok(Json(AnswerResponse { answer })),
        Err(InvokeError::InvalidArgument { .. }) => Err(bad_request_error(NUL_MESSAGE)),
        Err(e) => {
            error!(error = %e, "Error analyzing question");
            Err(internal_error("Failed to analyze question"))
        }
    }
}

async fn add_case(
    State(state): State<AppState>,
    payload: Result<Json<AddCaseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = json_body(payload)?;
    let (Some(title), Some(description), Some(speciality), Some(steps), Some(correct_answer)) = (
        required(request.title),
        required(request.description),
        required(request.speciality),
        request.steps,
        required(request.correct_answer),
    ) else {
        return Err(bad_request_error("All fields are required"));
    };

    let difficulty = match request.difficulty.as_deref() {
        None => Difficulty::default(),
        Some(raw) => raw
            .parse::<Difficulty>()
            .map_err(|e| bad_request_error(&e.to_string()))?,
    };

    let case = MedicalCase::new(title, description, speciality, steps, correct_answer)
        .with_difficulty(difficulty)
        .with_tags(request.tags.unwrap_or_default());
    let case_id = case.id.clone();

    state.cases.insert(case).await.map_err(|e| {
        error!(error = %e, "Failed to add medical case");
        internal_error("Failed to add medical case")
    })?;

    info!(case_id = %case_id, "Medical case added");
    Ok(created(json!({
        "message": "Medical case added successfully",
        "id": case_id
    })))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = json_body(payload)?;
    let (Some(name), Some(email), Some(password), Some(speciality)) = (
        required(request.name),
        required(request.email),
        required(request.password),
        required(request.speciality),
    ) else {
        return Err(bad_request_error("All fields are required"));
    };

    let hasher = state.hasher.clone();
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| e.to_string())
        .and_then(|hashed| hashed.map_err(|e| e.to_string()))
        .map_err(|e| {
            error!(error = %e, "Failed to hash password");
            internal_error("Failed to register doctor")
        })?;

    let doctor = Doctor::new(name, email, password_hash, speciality);
    let doctor_id = doctor.id.clone();

    state.doctors.insert(doctor).await.map_err(|e| {
        error!(error = %e, "Failed to register doctor");
        internal_error("Failed to register doctor")
    })?;

    info!(doctor_id = %doctor_id, "Doctor registered");
    Ok(created(json!({ "message": "Doctor registered successfully" })))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<TokenResponse> {
    let request = json_body(payload)?;
    let (Some(email), Some(password)) = (required(request.email), required(request.password))
    else {
        return Err(bad_request_error("Email and password are required"));
    };

    let doctor = match state.doctors.find_by_email(&email).await {
        Ok(Some(doctor)) => doctor,
        Ok(None) => return Err(not_found_error("Doctor not found")),
        Err(e) => {
            error!(error = %e, "Failed to load doctor");
            return Err(internal_error("Login failed"));
        }
    };

    let hasher = state.hasher.clone();
    let stored_hash = doctor.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored_hash))
        .await
        .map_err(|e| e.to_string())
        .and_then(|checked| checked.map_err(|e| e.to_string()));

    match verified {
        Ok(true) => {}
        Ok(false) => {
            warn!(doctor_id = %doctor.id, "Invalid credentials");
            return Err(unauthorized_error("Invalid credentials"));
        }
        Err(e) => {
            error!(error = %e, "Failed to verify password");
            return Err(internal_error("Login failed"));
        }
    }

    match state.tokens.issue(&doctor.id) {
        Ok(token) => {
            info!(doctor_id = %doctor.id, "Doctor logged in");
            Ok(Json(TokenResponse { token }))
        }
        Err(e @ CredentialError::MissingSecret) => {
            error!(error = %e, "Cannot issue login token");
            Err(internal_error("Login failed"))
        }
        Err(e) => {
            error!(error = %e, "Failed to sign login token");
            Err(internal_error("Login failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenIssuer;
    use crate::upload::MAX_FILE_SIZE;
    use axum::{
        body::Body,
        http::{Request, header},
    };
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    const BOUNDARY: &str = "medbot-test-boundary";

    struct Fixture {
        dir: TempDir,
        state: AppState,
        app: Router,
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(|_| {})
        }

        fn with(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path();
            std::fs::create_dir_all(root.join("uploads")).unwrap();

            let marker = |name: &str| root.join(format!("{name}.ran")).display().to_string();
            let ask_ai = write_script(
                root,
                "ask_ai.sh",
                &format!("echo ran > '{}'\necho \"mock answer to: $1\"\n", marker("ask_ai")),
            );
            let analyze_text = write_script(
                root,
                "analyze_text.sh",
                &format!("echo ran > '{}'\necho \"$2 says: $1\"\n", marker("analyze_text")),
            );
            let analyze_image = write_script(
                root,
                "analyze_image.sh",
                &format!(
                    "echo ran > '{}'\necho '{}'\n",
                    marker("analyze_image"),
                    r#"{"Result": "Pneumonia", "No Finding": 0.1, "Pneumonia": 0.3}"#
                ),
            );
            let extract_entities = write_script(
                root,
                "extract_entities.sh",
                "printf '{\"SYMPTOM\": \"%s\", \"SPECIALITY\": \"%s\"}\\n' \"$1\" \"${2:-none}\"\n",
            );

            let vars: HashMap<&str, String> = HashMap::from([
                ("PYTHON_BIN", "sh".to_string()),
                ("JWT_SECRET", "test-secret".to_string()),
                ("UPLOAD_DIR", root.join("uploads").display().to_string()),
                ("ASK_AI_SCRIPT", ask_ai),
                ("ANALYZE_TEXT_SCRIPT", analyze_text),
                ("ANALYZE_IMAGE_SCRIPT", analyze_image),
                ("EXTRACT_ENTITIES_SCRIPT", extract_entities),
                ("PASSWORD_HASH_ITERATIONS", "1000".to_string()),
            ]);
            let mut config = ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
            adjust(&mut config);

            let state = AppState::in_memory(&config);
            let app = build_router(state.clone());
            Self { dir, state, app }
        }

        fn ran(&self, script: &str) -> bool {
            self.dir.path().join(format!("{script}.ran")).exists()
        }

        fn uploads(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir.path().join("uploads"))
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn script_path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
            (status, json)
        }

        async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn post_form(&self, parts: &[Part<'_>]) -> (StatusCode, Value) {
            let body = multipart_body(parts);
            self.send(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .header(header::CONTENT_LENGTH, body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
        }
    }

    enum Part<'a> {
        File(&'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    #[tokio::test]
    async fn root_serves_the_banner() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .send(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String(BANNER.to_string()));
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let fixture = Fixture::new();
        let response = fixture
            .app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert_eq!(headers["referrer-policy"], "no-referrer");
    }

    #[tokio::test]
    async fn ask_ai_answers_with_first_output_line() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .post_json("/ask-ai", json!({ "question": "What causes a fever?" }))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "answer": "mock answer to: What causes a fever?" }));
        assert!(fixture.ran("ask_ai"));
    }

    #[tokio::test]
    async fn blank_questions_never_reach_the_program() {
        let fixture = Fixture::new();

        for payload in [json!({}), json!({ "question": "" }), json!({ "question": "  \t " })] {
            let (status, body) = fixture.post_json("/ask-ai", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Question is required");
        }

        let (status, _) = fixture
            .post_json("/ask", json!({ "question": " ", "speciality": "radiology" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(!fixture.ran("ask_ai"));
        assert!(!fixture.ran("analyze_text"));
    }

    #[tokio::test]
    async fn nul_in_a_question_is_a_bad_request() {
        let fixture = Fixture::new();

        let (status, body) = fixture
            .post_json("/ask-ai", json!({ "question": "fever\u{0}?" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Input must not contain NUL characters");

        let (status, _) = fixture
            .post_json(
                "/ask",
                json!({ "question": "fever?", "speciality": "radio\u{0}logy" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(!fixture.ran("ask_ai"));
        assert!(!fixture.ran("analyze_text"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/ask-ai")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"question\": "))
                    .unwrap(),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert!(!fixture.ran("ask_ai"));
    }

    #[tokio::test]
    async fn ask_passes_question_and_speciality() {
        let fixture = Fixture::new();

        let (status, body) = fixture
            .post_json("/ask", json!({ "question": "Is this a fracture?" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Question and speciality are required");

        let (status, body) = fixture
            .post_json(
                "/ask",
                json!({ "question": "Is this a fracture?", "speciality": "radiology" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "radiology says: Is this a fracture?");
    }

    #[tokio::test]
    async fn failing_program_is_a_generic_500() {
        let fixture = Fixture::new();
        std::fs::write(fixture.script_path("ask_ai.sh"), "echo 'Traceback' >&2\nexit 1\n")
            .unwrap();

        let (status, body) = fixture
            .post_json("/ask-ai", json!({ "question": "anything" }))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to process request" }));
    }

    #[tokio::test]
    async fn hanging_program_times_out_as_500() {
        let fixture = Fixture::with(|config| config.analysis_timeout = Duration::from_millis(200));
        std::fs::write(fixture.script_path("analyze_text.sh"), "sleep 5\necho late\n").unwrap();

        let (status, body) = fixture
            .post_json("/ask", json!({ "question": "q", "speciality": "general" }))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to analyze question");
    }

    #[tokio::test]
    async fn add_case_stores_identical_fields() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .post_json(
                "/add-case",
                json!({
                    "title": "Chest X-ray",
                    "description": "Productive cough with fever for three days",
                    "speciality": "radiology",
                    "steps": ["step1", "step2"],
                    "correctAnswer": "pneumonia"
                }),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Medical case added successfully");

        let id = body["id"].as_str().unwrap();
        let stored = fixture.state.cases.get(id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Chest X-ray");
        assert_eq!(stored.description, "Productive cough with fever for three days");
        assert_eq!(stored.speciality, "radiology");
        assert_eq!(stored.steps, vec!["step1", "step2"]);
        assert_eq!(stored.correct_answer, "pneumonia");
        assert_eq!(stored.difficulty, Difficulty::Medium);
        assert!(stored.tags.is_empty());
    }

    #[tokio::test]
    async fn add_case_validates_fields() {
        let fixture = Fixture::new();

        let (status, body) = fixture
            .post_json(
                "/add-case",
                json!({ "title": "Chest X-ray", "speciality": "radiology" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "All fields are required");

        let (status, body) = fixture
            .post_json(
                "/add-case",
                json!({
                    "title": "t", "description": "d", "speciality": "s",
                    "steps": [], "correctAnswer": "a", "difficulty": "extreme"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("extreme"));
    }

    async fn register(fixture: &Fixture, email: &str, password: &str) -> (StatusCode, Value) {
        fixture
            .post_json(
                "/register",
                json!({
                    "name": "Dr. Salma",
                    "email": email,
                    "password": password,
                    "speciality": "radiology"
                }),
            )
            .await
    }

    #[tokio::test]
    async fn register_hashes_before_storing() {
        let fixture = Fixture::new();
        let (status, body) = register(&fixture, "salma@example.com", "correct horse").await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Doctor registered successfully");

        let doctor = fixture
            .state
            .doctors
            .find_by_email("salma@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(doctor.password_hash, "correct horse");
        assert!(!doctor.password_hash.contains("correct horse"));
    }

    #[tokio::test]
    async fn duplicate_registration_fails_at_the_store() {
        let fixture = Fixture::new();
        let (first, _) = register(&fixture, "salma@example.com", "pw-one").await;
        let (second, body) = register(&fixture, "salma@example.com", "pw-two").await;

        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to register doctor");
    }

    #[tokio::test]
    async fn register_requires_every_field() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .post_json("/register", json!({ "name": "Dr. Salma", "email": "s@example.com" }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "All fields are required");
    }

    #[tokio::test]
    async fn login_outcomes() {
        let fixture = Fixture::new();
        register(&fixture, "salma@example.com", "correct horse").await;

        let (status, body) = fixture.post_json("/login", json!({ "email": "salma@example.com" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email and password are required");

        let (status, body) = fixture
            .post_json("/login", json!({ "email": "nobody@example.com", "password": "x" }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Doctor not found");

        let (status, body) = fixture
            .post_json(
                "/login",
                json!({ "email": "salma@example.com", "password": "wrong horse" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, body) = fixture
            .post_json(
                "/login",
                json!({ "email": "salma@example.com", "password": "correct horse" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let doctor = fixture
            .state
            .doctors
            .find_by_email("salma@example.com")
            .await
            .unwrap()
            .unwrap();
        let claims = TokenIssuer::new(Some("test-secret".to_string()))
            .verify(body["token"].as_str().unwrap())
            .unwrap();
        assert_eq!(claims.id, doctor.id);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn login_without_signing_secret_is_500() {
        let fixture = Fixture::with(|config| config.jwt_secret = None);
        register(&fixture, "salma@example.com", "pw").await;

        let (status, body) = fixture
            .post_json("/login", json!({ "email": "salma@example.com", "password": "pw" }))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Login failed");
    }

    #[tokio::test]
    async fn analyze_fills_both_slots() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .post_form(&[
                Part::File("scan.PNG", b"fake image bytes"),
                Part::Text("text", "chest pain"),
                Part::Text("speciality", "cardiology"),
            ])
            .await;

        assert_eq!(status, StatusCode::OK);

        let stored = fixture.uploads();
        assert_eq!(stored.len(), 1);
        let (millis, name) = stored[0].split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(name, "scan.PNG");

        let image_url = format!("/uploads/{}", stored[0]);
        assert_eq!(body["image_analysis"]["Result"], "Pneumonia");
        assert_eq!(body["image_analysis"]["Pneumonia"], 0.3);
        assert_eq!(body["image_analysis"]["image_url"], image_url.as_str());
        assert_eq!(body["image_url"], image_url.as_str());
        assert_eq!(
            body["text_analysis"],
            json!({ "SYMPTOM": "chest pain", "SPECIALITY": "cardiology" })
        );

        let (status, served) = fixture
            .send(Request::builder().uri(&image_url).body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(served, Value::String("fake image bytes".to_string()));
    }

    #[tokio::test]
    async fn every_analysis_is_recorded() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .post_form(&[
                Part::File("scan.png", b"png bytes"),
                Part::Text("text", "chest pain"),
                Part::Text("speciality", "cardiology"),
            ])
            .await;
        assert_eq!(status, StatusCode::OK);

        let records = fixture.state.analyses.list().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];

        let stored = fixture.uploads();
        assert!(record.image_path.as_deref().unwrap().ends_with(&stored[0]));
        assert_eq!(record.text.as_deref(), Some("chest pain"));
        assert_eq!(record.speciality.as_deref(), Some("cardiology"));

        let image = record.image_analysis.as_ref().unwrap();
        assert_eq!(image.headline(), Some("Pneumonia"));
        assert_eq!(image.predictions["Pneumonia"], 0.3);
        assert_eq!(
            record.text_analysis.as_ref().unwrap().entities["SYMPTOM"],
            "chest pain"
        );
        assert_eq!(body["image_url"], format!("/uploads/{}", stored[0]).as_str());

        let (status, _) = fixture.post_form(&[Part::Text("text", " ")]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(fixture.state.analyses.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn analyze_text_only_leaves_image_slot_empty() {
        let fixture = Fixture::new();
        let (status, body) = fixture.post_form(&[Part::Text("text", "headache")]).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["image_analysis"].is_null());
        assert_eq!(body["text_analysis"]["SYMPTOM"], "headache");
        assert_eq!(body["text_analysis"]["SPECIALITY"], "none");
        assert!(!fixture.ran("analyze_image"));
        assert!(fixture.uploads().is_empty());
    }

    #[tokio::test]
    async fn analyze_requires_image_or_text() {
        let fixture = Fixture::new();
        let (status, body) = fixture.post_form(&[Part::Text("text", "   ")]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "An image or text is required");
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected_before_the_handler() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .post_form(&[
                Part::File("notes.txt", b"plain text"),
                Part::Text("text", "chest pain"),
            ])
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Only images and DICOM files are allowed. Supported formats: .png, .jpg, .jpeg, .dcm"
        );
        assert!(fixture.uploads().is_empty());
        assert!(!fixture.ran("analyze_image"));
    }

    #[tokio::test]
    async fn second_image_field_is_rejected() {
        let fixture = Fixture::new();
        let (status, _) = fixture
            .post_form(&[Part::File("a.png", b"a"), Part::File("b.png", b"b")])
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(fixture.uploads().is_empty());
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let fixture = Fixture::new();
        let too_big = vec![0u8; MAX_FILE_SIZE as usize + 1];
        let (status, body) = fixture.post_form(&[Part::File("scan.dcm", &too_big)]).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "File too large. Maximum size is 10 MB");
        assert!(fixture.uploads().is_empty());
        assert!(!fixture.ran("analyze_image"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_up_front() {
        let fixture = Fixture::new();
        let way_too_big = vec![0u8; 11 * 1024 * 1024];
        let (status, _) = fixture.post_form(&[Part::File("scan.png", &way_too_big)]).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(fixture.uploads().is_empty());
    }

    #[tokio::test]
    async fn malformed_image_output_becomes_slot_error() {
        let fixture = Fixture::new();
        std::fs::write(fixture.script_path("analyze_image.sh"), "echo 'not json'\n").unwrap();

        let (status, body) = fixture
            .post_form(&[Part::File("scan.jpg", b"jpeg"), Part::Text("text", "cough")])
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image_analysis"]["error"], "Failed to analyze image");
        assert!(body["image_analysis"].get("image_url").is_none());
        assert_eq!(body["text_analysis"]["SYMPTOM"], "cough");
    }

    #[tokio::test]
    async fn rate_limit_answers_429() {
        let fixture = Fixture::with(|config| config.rate_limit.max_requests = 2);
        let get_root = || Request::builder().uri("/").body(Body::empty()).unwrap();

        assert_eq!(fixture.send(get_root()).await.0, StatusCode::OK);
        assert_eq!(fixture.send(get_root()).await.0, StatusCode::OK);

        let (status, body) = fixture.send(get_root()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body,
            Value::String(crate::middleware::RATE_LIMIT_MESSAGE.to_string())
        );
    }
}
