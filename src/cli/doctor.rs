//! `nyx-setup doctor` - one-shot prerequisite diagnostics.
//!
//! Probes the host the same way the setup flow does and reports pass/fail
//! with guidance, without starting any polling or installs.

use crate::bootstrap::AgentLayout;
use crate::bridge::docker;
use crate::bridge::ollama::OllamaClient;
use crate::config::SetupRuntimeConfig;

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config: &SetupRuntimeConfig, strict: bool) -> anyhow::Result<()> {
    println!("Nyx Setup Doctor");
    println!("================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let engine = docker::check_engine().await;
    check(
        "Docker",
        check_container_engine(&engine),
        &mut passed,
        &mut failed,
    );

    check(
        "Agent image",
        if engine.running {
            check_agent_image(&config.agent_image).await
        } else {
            CheckResult::Skip("Docker is not running".to_string())
        },
        &mut passed,
        &mut failed,
    );

    check(
        "Ollama",
        check_model_runtime(config).await,
        &mut passed,
        &mut failed,
    );

    check(
        "Existing setup",
        check_setup(&AgentLayout::new(&config.home_dir)),
        &mut passed,
        &mut failed,
    );

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Fix the failed checks, then run `nyx-setup provision`.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_container_engine(status: &crate::bridge::ContainerEngineStatus) -> CheckResult {
    match (status.installed, status.running) {
        (true, true) => CheckResult::Pass(
            status
                .version
                .clone()
                .unwrap_or_else(|| "running".to_string()),
        ),
        (true, false) => {
            CheckResult::Fail("installed but not running; open Docker Desktop".to_string())
        }
        (false, _) => CheckResult::Fail(format!(
            "not installed; download from {}",
            status
                .download_url
                .as_deref()
                .unwrap_or_else(|| docker::docker_download_url())
        )),
    }
}

async fn check_agent_image(image: &str) -> CheckResult {
    match docker::image_present(image).await {
        Ok(true) => CheckResult::Pass(format!("{image} present")),
        Ok(false) => CheckResult::Skip(format!("{image} will be pulled during provisioning")),
        Err(e) => CheckResult::Fail(format!("cannot inspect {image}: {e}")),
    }
}

async fn check_model_runtime(config: &SetupRuntimeConfig) -> CheckResult {
    let client = match OllamaClient::new(config.ollama_base_url.clone()) {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(e.to_string()),
    };
    let status = client.check().await;
    if status.running {
        let models = client.list_models().await.unwrap_or_default();
        return CheckResult::Pass(format!(
            "{} at {} ({} model(s))",
            status.version.as_deref().unwrap_or("running"),
            client.base_url(),
            models.len()
        ));
    }
    if status.installed {
        return CheckResult::Fail("installed but not running; open the Ollama app".to_string());
    }
    // Local models are optional.
    CheckResult::Skip("not installed; only needed for local models".to_string())
}

fn check_setup(layout: &AgentLayout) -> CheckResult {
    if layout.is_setup_complete() {
        CheckResult::Pass(format!("configured under {}", layout.home().display()))
    } else {
        CheckResult::Skip("not provisioned yet".to_string())
    }
}
