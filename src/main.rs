//! Smoke runner: connects the configured number of VUs, has each upload and
//! download the scenario file, then tears everything down and prints a JSON
//! summary.
//!
//! Set `SFTP_DRY_RUN=1` to run against an in-process server instead of
//! `SFTP_HOST`.

use anyhow::{bail, Context, Result};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use vu_sftp::config::ScenarioEnv;
use vu_sftp::connection::{Connector, MemoryServer, SshConnector};
use vu_sftp::logging::{init_logging, LogFormat};
use vu_sftp::{
    AsyncSessionManager, Credentials, ManagerConfig, SessionManager, TeardownReport,
    TransferOutcome, VuId,
};

#[derive(Serialize)]
struct VuRun {
    vu: VuId,
    upload: TransferOutcome,
    download: TransferOutcome,
}

#[derive(Serialize)]
struct Summary {
    dry_run: bool,
    vus: Vec<VuId>,
    runs: Vec<VuRun>,
    teardown: TeardownReport,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// In-process server that accepts the scenario's user and credentials.
fn dry_run_connector(scenario: &ScenarioEnv) -> Arc<dyn Connector> {
    let password = match &scenario.credentials {
        Credentials::Password(password) => password.expose_secret().clone(),
        Credentials::Key { .. } => String::new(),
    };
    let server = MemoryServer::new()
        .with_user(&scenario.user, &password)
        .with_directory(&scenario.remote_dir);
    Arc::new(server.connector())
}

async fn run_vu(
    manager: AsyncSessionManager,
    scenario: Arc<ScenarioEnv>,
    scratch: PathBuf,
    vu: VuId,
) -> Result<VuRun> {
    let upload = manager
        .upload(vu, scenario.local_dir.clone(), &scenario.filename, &scenario.remote_dir)
        .await
        .with_context(|| format!("{} upload failed", vu))?;

    let target_dir = scratch.join(vu.get().to_string());
    tokio::fs::create_dir_all(&target_dir)
        .await
        .with_context(|| format!("failed to create {}", target_dir.display()))?;

    let download = manager
        .download(vu, &scenario.remote_dir, &scenario.filename, target_dir)
        .await
        .with_context(|| format!("{} download failed", vu))?;

    if upload.checksum != download.checksum {
        bail!(
            "{} round trip mismatch: uploaded {} downloaded {}",
            vu,
            upload.checksum,
            download.checksum
        );
    }

    Ok(VuRun {
        vu,
        upload,
        download,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let verbosity = std::env::var("SFTP_LOG_VERBOSITY")
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .unwrap_or(2);
    let format = std::env::var("SFTP_LOG_FORMAT")
        .unwrap_or_default()
        .parse::<LogFormat>()
        .map_err(anyhow::Error::msg)?;
    init_logging(verbosity, format).context("failed to initialise logging")?;

    let config = ManagerConfig::from_env().context("invalid manager configuration")?;
    let scenario = Arc::new(ScenarioEnv::from_env().context("invalid scenario")?);
    let dry_run = env_flag("SFTP_DRY_RUN");

    let connector: Arc<dyn Connector> = if dry_run {
        dry_run_connector(&scenario)
    } else {
        Arc::new(SshConnector::new())
    };
    let manager = AsyncSessionManager::new(SessionManager::with_connector(config, connector));

    let vus = manager
        .connect_vus(
            scenario.vus,
            &scenario.host,
            &scenario.port,
            &scenario.user,
            &scenario.credentials,
        )
        .await
        .context("bulk connect failed")?;

    let scratch = std::env::temp_dir().join(format!("vu-sftp-smoke-{}", uuid::Uuid::new_v4()));
    let mut tasks = tokio::task::JoinSet::new();
    for &vu in &vus {
        tasks.spawn(run_vu(
            manager.clone(),
            scenario.clone(),
            scratch.clone(),
            vu,
        ));
    }

    let mut runs = Vec::with_capacity(vus.len());
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined.context("VU task panicked").and_then(|run| run) {
            Ok(run) => runs.push(run),
            Err(e) => {
                tracing::error!("{:#}", e);
                first_error.get_or_insert(e);
            }
        }
    }
    runs.sort_by_key(|run| run.vu);

    let teardown = manager.disconnect_vus().await?;
    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
        tracing::debug!("Scratch cleanup of {} skipped: {}", scratch.display(), e);
    }

    let summary = Summary {
        dry_run,
        vus,
        runs,
        teardown,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(e) = first_error {
        return Err(e);
    }
    if !summary.teardown.is_clean() {
        bail!("{} session(s) failed to close", summary.teardown.failures.len());
    }
    Ok(())
}
