pub mod chat;
pub mod client;
pub mod form;
pub mod render;

pub use chat::{ChannelPushClient, ChatController, ChatEntry, PushClient};
pub use client::{ApiClient, ClientError, ImageFile, NewCase};
pub use form::{FormController, FormInput};

#[cfg(test)]
pub(crate) mod test_support {
    use medbot_server::{AppState, ServerConfig, build_router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// The real router on an ephemeral port, with `sh` scripts standing in for the models.
    pub struct TestServer {
        pub base_url: String,
        _dir: TempDir,
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    impl TestServer {
        pub async fn start() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path();
            std::fs::create_dir_all(root.join("uploads")).unwrap();

            let vars: HashMap<&str, String> = HashMap::from([
                ("PYTHON_BIN", "sh".to_string()),
                ("JWT_SECRET", "client-test-secret".to_string()),
                ("PASSWORD_HASH_ITERATIONS", "1000".to_string()),
                ("UPLOAD_DIR", root.join("uploads").display().to_string()),
                (
                    "ASK_AI_SCRIPT",
                    script(root, "ask_ai.sh", "echo \"mock answer to: $1\"\n"),
                ),
                (
                    "ANALYZE_TEXT_SCRIPT",
                    script(root, "analyze_text.sh", "echo \"$2 says: $1\"\n"),
                ),
                (
                    "ANALYZE_IMAGE_SCRIPT",
                    script(
                        root,
                        "analyze_image.sh",
                        "echo '{\"Result\": \"Pneumonia\", \"Pneumonia\": 0.3}'\n",
                    ),
                ),
                (
                    "EXTRACT_ENTITIES_SCRIPT",
                    script(
                        root,
                        "extract_entities.sh",
                        "printf '{\"SYMPTOM\": \"%s\", \"SPECIALITY\": \"%s\"}\\n' \"$1\" \"${2:-none}\"\n",
                    ),
                ),
            ]);
            let config = ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
            let app = build_router(AppState::in_memory(&config));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                .unwrap();
            });

            Self {
                base_url: format!("http://{addr}"),
                _dir: dir,
            }
        }
    }
}
