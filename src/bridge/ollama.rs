//! Local-model runtime (Ollama) access over its HTTP API.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::ModelRuntimeStatus;
use crate::bridge::docker::run_command;
use crate::error::BridgeError;

pub const OLLAMA_DOWNLOAD_URL: &str = "https://ollama.com/download/Ollama-darwin.zip";

const MAC_APP_PATH: &str = "/Applications/Ollama.app";

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Thin client for the runtime's local HTTP endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The server answers its root path with "Ollama is running".
    async fn is_serving(&self) -> bool {
        match self.http.get(&self.base_url).send().await {
            Ok(resp) => resp
                .text()
                .await
                .map(|body| body.contains("Ollama"))
                .unwrap_or(false),
            Err(e) => {
                tracing::debug!("Ollama not reachable at {}: {}", self.base_url, e);
                false
            }
        }
    }

    async fn version(&self) -> Option<String> {
        let resp = self
            .http
            .get(format!("{}/api/version", self.base_url))
            .send()
            .await
            .ok()?;
        resp.json::<VersionResponse>().await.ok().map(|v| v.version)
    }

    /// Probe the runtime. A reachable server implies an installation;
    /// otherwise the binary or app bundle decides.
    pub async fn check(&self) -> ModelRuntimeStatus {
        if self.is_serving().await {
            return ModelRuntimeStatus {
                installed: true,
                running: true,
                version: self.version().await,
            };
        }

        let installed = Path::new(MAC_APP_PATH).exists()
            || run_command("ollama", &["--version"]).await.is_ok();
        ModelRuntimeStatus {
            installed,
            running: false,
            version: None,
        }
    }

    /// Names of the locally available models.
    pub async fn list_models(&self) -> Result<Vec<String>, BridgeError> {
        let tags: TagsResponse = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Download the macOS app, copy it into /Applications, and launch it.
    pub async fn install(&self) -> Result<String, BridgeError> {
        if !cfg!(target_os = "macos") {
            return Err(BridgeError::Rejected(
                "Automatic Ollama installation is only available on macOS. Install it from https://ollama.com/download"
                    .to_string(),
            ));
        }

        let tmp = std::env::temp_dir();
        let zip_path = tmp.join("Ollama-darwin.zip");
        let unzip_dir = tmp.join("Ollama-unzipped");
        let zip = zip_path.to_string_lossy();
        let unzip = unzip_dir.to_string_lossy();

        run_command("curl", &["-fSL", "-o", &zip, OLLAMA_DOWNLOAD_URL]).await?;
        let _ = tokio::fs::remove_dir_all(&unzip_dir).await;
        let installed = async {
            run_command("unzip", &["-o", "-q", &zip, "-d", &unzip]).await?;
            let _ = tokio::fs::remove_dir_all(MAC_APP_PATH).await;
            run_command(
                "cp",
                &["-R", &format!("{unzip}/Ollama.app"), MAC_APP_PATH],
            )
            .await
        }
        .await;
        let _ = tokio::fs::remove_file(&zip_path).await;
        let _ = tokio::fs::remove_dir_all(&unzip_dir).await;
        installed?;

        if let Err(e) = run_command("open", &[MAC_APP_PATH]).await {
            tracing::debug!("Could not launch Ollama: {}", e);
        }
        tracing::info!("Ollama installed");
        Ok("Ollama installed. Waiting for it to start...".to_string())
    }
}
