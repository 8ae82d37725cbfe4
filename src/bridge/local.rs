//! Bridge implementation backed by the local machine.

use async_trait::async_trait;

use crate::bootstrap::AgentLayout;
use crate::bridge::docker;
use crate::bridge::keys::{generate_near_keypair, persist_key};
use crate::bridge::ollama::OllamaClient;
use crate::bridge::writer::{ConfigWriter, generate_gateway_token};
use crate::bridge::{ContainerEngineStatus, GeneratedWallet, ModelRuntimeStatus, NativeBridge};
use crate::config::SetupRuntimeConfig;
use crate::error::BridgeError;
use crate::setup::guardrails::{GuardrailBundle, SecurityPreset, fallback_bundle};
use crate::setup::request::ProvisioningRequest;

/// Marker returned by a commit that has no active wallet.
pub const SETUP_COMPLETE_MARKER: &str = "setup_complete";

/// Talks to Docker, Ollama, and the filesystem of this host.
pub struct LocalBridge {
    writer: ConfigWriter,
    ollama: OllamaClient,
    image: String,
}

impl LocalBridge {
    pub fn new(config: &SetupRuntimeConfig) -> Result<Self, BridgeError> {
        let layout = AgentLayout::new(&config.home_dir);
        Ok(Self {
            writer: ConfigWriter::new(layout, config.agent_image.clone()),
            ollama: OllamaClient::new(config.ollama_base_url.clone())?,
            image: config.agent_image.clone(),
        })
    }

    pub fn layout(&self) -> &AgentLayout {
        self.writer.layout()
    }

    pub fn ollama(&self) -> &OllamaClient {
        &self.ollama
    }

    async fn ensure_image(&self) -> Result<(), BridgeError> {
        if docker::image_present(&self.image).await? {
            tracing::debug!(image = %self.image, "Image already present");
            return Ok(());
        }
        docker::pull_image(&self.image).await
    }

    async fn start_agent(&self) -> Result<(), BridgeError> {
        self.ensure_image()
            .await
            .map_err(|e| BridgeError::Rejected(format!("Image pull failed: {e}")))?;
        docker::compose_up(&self.layout().compose_file()).await
    }
}

#[async_trait]
impl NativeBridge for LocalBridge {
    async fn check_container_engine(&self) -> Result<ContainerEngineStatus, BridgeError> {
        Ok(docker::check_engine().await)
    }

    async fn install_container_engine(&self) -> Result<String, BridgeError> {
        docker::install_engine().await
    }

    async fn check_model_runtime(&self) -> Result<ModelRuntimeStatus, BridgeError> {
        Ok(self.ollama.check().await)
    }

    async fn install_model_runtime(&self) -> Result<String, BridgeError> {
        self.ollama.install().await
    }

    async fn prepull_image(&self) -> Result<(), BridgeError> {
        self.ensure_image().await
    }

    async fn generate_keypair(&self) -> Result<GeneratedWallet, BridgeError> {
        let wallet = generate_near_keypair();
        persist_key(&self.layout().wallets_dir(), &wallet)?;
        Ok(wallet)
    }

    async fn resolve_guardrail_preset(
        &self,
        preset: SecurityPreset,
    ) -> Result<GuardrailBundle, BridgeError> {
        match preset {
            SecurityPreset::Custom => Err(BridgeError::UnknownPreset(preset.to_string())),
            named => Ok(fallback_bundle(named)),
        }
    }

    async fn commit(&self, request: &ProvisioningRequest) -> Result<String, BridgeError> {
        let token = generate_gateway_token();
        let written = self.writer.write_all(request, &token)?;

        if let Err(e) = self.start_agent().await {
            written.roll_back();
            return Err(e);
        }

        Ok(request
            .active_wallet()
            .map(|w| w.address.clone())
            .unwrap_or_else(|| SETUP_COMPLETE_MARKER.to_string()))
    }

    async fn is_setup_complete(&self) -> Result<bool, BridgeError> {
        Ok(self.layout().is_setup_complete())
    }
}
