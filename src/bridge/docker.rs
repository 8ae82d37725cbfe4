//! Container engine access.
//!
//! Presence is decided by the `docker` CLI, liveness and image operations go
//! through the engine API via `bollard`, and `docker compose` is shelled out
//! since the engine API has no compose support.

use std::path::Path;

use bollard::Docker;
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use tokio::process::Command;

use crate::bridge::ContainerEngineStatus;
use crate::error::BridgeError;

/// Compose service that runs the agent gateway.
pub const GATEWAY_SERVICE: &str = "openclaw-gateway";

/// Docker Desktop download link for this machine's architecture.
pub fn docker_download_url() -> &'static str {
    if std::env::consts::ARCH == "aarch64" {
        "https://desktop.docker.com/mac/main/arm64/Docker.dmg"
    } else {
        "https://desktop.docker.com/mac/main/amd64/Docker.dmg"
    }
}

/// Run a command to completion and return its trimmed stdout.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, BridgeError> {
    let command = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| BridgeError::Command {
            command: command.clone(),
            stderr: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stderr = if stderr.is_empty() {
        format!("exited with status {}", output.status)
    } else {
        stderr
    };
    Err(BridgeError::Command { command, stderr })
}

fn connect() -> Result<Docker, BridgeError> {
    Ok(Docker::connect_with_local_defaults()?)
}

/// Probe the container engine. Never fails; an unreachable engine reads as
/// not running.
pub async fn check_engine() -> ContainerEngineStatus {
    let version = run_command("docker", &["--version"])
        .await
        .ok()
        .filter(|v| !v.is_empty());
    let installed = version.is_some();

    let running = if installed {
        match connect() {
            Ok(docker) => docker.ping().await.is_ok(),
            Err(e) => {
                tracing::debug!("Docker engine unreachable: {}", e);
                false
            }
        }
    } else {
        false
    };

    ContainerEngineStatus {
        installed,
        running,
        version,
        download_url: (!installed).then(|| docker_download_url().to_string()),
    }
}

/// Download Docker Desktop, copy it into /Applications, and launch it.
pub async fn install_engine() -> Result<String, BridgeError> {
    if !cfg!(target_os = "macos") {
        return Err(BridgeError::Rejected(format!(
            "Automatic Docker installation is only available on macOS. Install Docker from {}",
            docker_download_url()
        )));
    }

    let dmg_path = std::env::temp_dir().join("DockerDesktop.dmg");
    let dmg = dmg_path.to_string_lossy();
    let mount_point = "/Volumes/Docker";

    run_command("curl", &["-fSL", "-o", &dmg, docker_download_url()]).await?;
    if let Err(e) = run_command("hdiutil", &["attach", &dmg, "-nobrowse", "-quiet"]).await {
        let _ = tokio::fs::remove_file(&dmg_path).await;
        return Err(e);
    }

    let copied = run_command(
        "cp",
        &["-R", &format!("{mount_point}/Docker.app"), "/Applications/Docker.app"],
    )
    .await;
    let _ = run_command("hdiutil", &["detach", mount_point, "-quiet"]).await;
    let _ = tokio::fs::remove_file(&dmg_path).await;
    copied?;

    if let Err(e) = run_command("open", &["/Applications/Docker.app"]).await {
        tracing::debug!("Could not launch Docker Desktop: {}", e);
    }
    tracing::info!("Docker Desktop installed");
    Ok("Docker Desktop installed. Waiting for it to start...".to_string())
}

/// Whether the image is already present locally.
pub async fn image_present(image: &str) -> Result<bool, BridgeError> {
    let docker = connect()?;
    match docker.inspect_image(image).await {
        Ok(_) => Ok(true),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Pull an image, draining the progress stream.
pub async fn pull_image(image: &str) -> Result<(), BridgeError> {
    let docker = connect()?;
    let options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    let mut layers = 0usize;
    while let Some(chunk) = stream.next().await {
        let info = chunk?;
        if let Some(err) = info.error {
            return Err(BridgeError::Docker(format!("Image pull failed: {err}")));
        }
        if info.status.as_deref() == Some("Pull complete") {
            layers += 1;
        }
    }
    tracing::info!(image, layers, "Image pulled");
    Ok(())
}

/// Bring up the gateway service from the given compose file.
pub async fn compose_up(compose_file: &Path) -> Result<(), BridgeError> {
    let compose_file = compose_file.to_string_lossy();
    run_command(
        "docker",
        &["compose", "-f", &compose_file, "up", "-d", GATEWAY_SERVICE],
    )
    .await
    .map_err(|e| match e {
        BridgeError::Command { stderr, .. } => {
            BridgeError::Rejected(format!("Container start failed: {stderr}"))
        }
        other => other,
    })?;
    tracing::info!(service = GATEWAY_SERVICE, "Agent container started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_matches_architecture() {
        let url = docker_download_url();
        assert!(url.ends_with("/Docker.dmg"));
        if std::env::consts::ARCH == "aarch64" {
            assert!(url.contains("/arm64/"));
        } else {
            assert!(url.contains("/amd64/"));
        }
    }

    #[tokio::test]
    async fn run_command_reports_missing_program() {
        let err = run_command("nyx-definitely-not-a-real-binary", &["--version"])
            .await
            .unwrap_err();
        let BridgeError::Command { command, .. } = err else {
            panic!("expected a command error");
        };
        assert_eq!(command, "nyx-definitely-not-a-real-binary --version");
    }
}
