use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use research_uplink::cli::{Args, Commands, VerifyOpts};
use research_uplink::config::{load_or_create_config, UplinkConfig};
use research_uplink::crypto::{load_private_key_file, open_to_path};
use research_uplink::identity::{
    load_or_create_identity_key, short_id_for, EnrollmentClient, EnrollmentSecret, Identity,
};
use research_uplink::models::{EnvelopeName, KeySidecar};
use research_uplink::pipeline::Pipeline;
use research_uplink::queue::QueueSealer;
use research_uplink::trigger::{default_probe, ConnectivityGate, UploadCycle, UploadTrigger};
use research_uplink::upload::SessionStatus;
use research_uplink::utils::hash::sha256_file_hex;

fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.verbose)?;

    match &args.command {
        Commands::InitConfig { path } => {
            info!("Creating default configuration file at {}", path.display());
            UplinkConfig::default().save_to_yaml_file(path)?;
            info!("Configuration created successfully");
            Ok(())
        }
        Commands::Enroll { secret } => enroll(&load_config(&args)?, secret),
        Commands::Seal => seal(&load_config(&args)?),
        Commands::Upload { json } => upload(&load_config(&args)?, *json),
        Commands::Run { now } => run(&load_config(&args)?, *now),
        Commands::VerifyEnvelope(opts) => verify_envelope(opts),
    }
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

/// Load the configuration file and apply command-line overrides
fn load_config(args: &Args) -> Result<UplinkConfig> {
    let mut config = load_or_create_config(args.config.as_deref())?;
    args.overrides.apply(&mut config);
    config.validate().context("Invalid configuration after overrides")?;
    Ok(config)
}

fn load_identity(config: &UplinkConfig) -> Result<Identity> {
    let path = config.identity_path();
    if !path.exists() {
        bail!(
            "No identity at {}; run `research-uplink enroll <code>` first",
            path.display()
        );
    }
    Identity::load(&path)
}

fn enroll(config: &UplinkConfig, secret: &str) -> Result<()> {
    let secret = EnrollmentSecret::parse(secret)?;
    let key_path = config.key_path();
    let identity_key = load_or_create_identity_key(&key_path)?;

    let client = EnrollmentClient::new(&config.server.base_url, config.request_timeout())?;
    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    let response = runtime
        .block_on(client.enroll(&secret, &identity_key))
        .context("Enrollment failed")?;

    let identity = Identity {
        participant_id: response.participant_id,
        study_id: response.study_id,
        short_id: short_id_for(secret.as_str()),
        upload_public_key_pem: response.upload_public_key_pem,
        identity_key_path: key_path,
        base_url: config.server.base_url.clone(),
        upload_token: secret.bearer_token().map(str::to_string),
        enrolled_at: Utc::now(),
    };
    identity.save(&config.identity_path())?;

    info!(
        "Enrolled: participant {}, study {}, short id {}",
        identity.participant_id, identity.study_id, identity.short_id
    );
    Ok(())
}

fn seal(config: &UplinkConfig) -> Result<()> {
    let identity = load_identity(config)?;
    let sealer = QueueSealer::new(identity.encryptor()?, identity.short_id.clone());
    let report = sealer
        .seal_pending(&config.plaintext_dir(), &config.ciphertext_dir())
        .context("Failed to scan plaintext queue")?;

    info!(
        "{} sealed, {} failed, {} skipped",
        report.sealed, report.failed, report.skipped
    );
    if report.failed > 0 {
        bail!("{} artifacts could not be sealed", report.failed);
    }
    Ok(())
}

fn upload(config: &UplinkConfig, json: bool) -> Result<()> {
    let identity = load_identity(config)?;
    let pipeline = Pipeline::from_config(config, &identity)?;
    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;

    let report = runtime.block_on(pipeline.run_cycle())?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize session report")?
        );
    }

    match report.status {
        SessionStatus::Failed(kind) => bail!(
            "Upload failed ({}): {} of {} envelopes delivered",
            kind.code(),
            report.delivered,
            report.queued
        ),
        _ => Ok(()),
    }
}

fn run(config: &UplinkConfig, now: bool) -> Result<()> {
    let identity = load_identity(config)?;
    let pipeline = Arc::new(Pipeline::from_config(config, &identity)?);
    let gate = ConnectivityGate::new(config.upload.connectivity, default_probe());
    let mut trigger_config = config.trigger_config();
    trigger_config.run_on_start |= now;

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(async move {
        let (trigger, handle) = UploadTrigger::new(pipeline, gate, trigger_config);
        let task = tokio::spawn(trigger.run());

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut usr1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
            let on_demand = handle.clone();
            tokio::spawn(async move {
                while usr1.recv().await.is_some() {
                    info!("SIGUSR1 received, uploading now");
                    if !on_demand.upload_now().await {
                        break;
                    }
                }
            });
        }

        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
        info!("Shutting down");
        handle.shutdown().await;

        let stats = task.await.context("Upload trigger task failed")?;
        info!(
            "{} cycles run, {} skipped",
            stats.cycles_run, stats.cycles_skipped
        );
        Ok::<(), anyhow::Error>(())
    })
}

fn verify_envelope(opts: &VerifyOpts) -> Result<()> {
    let private_key = load_private_key_file(&opts.private_key)?;
    let sidecar_path = opts
        .sidecar
        .clone()
        .unwrap_or_else(|| KeySidecar::path_for(&opts.envelope));
    let sidecar = KeySidecar::read(&sidecar_path)
        .context(format!("Failed to read key sidecar {}", sidecar_path.display()))?;

    check_name(&opts.envelope);

    let scratch = std::env::temp_dir().join(format!("research-uplink-verify-{}", uuid::Uuid::new_v4()));
    let output = opts.output.as_deref().unwrap_or(&scratch);
    let len = open_to_path(&opts.envelope, &sidecar.wrapped_key, &private_key, output)?;
    let digest = sha256_file_hex(output);
    if opts.output.is_none() {
        if let Err(e) = std::fs::remove_file(&scratch) {
            warn!("Could not remove {}: {}", scratch.display(), e);
        }
    }
    let digest = digest.context(format!("Failed to hash {}", output.display()))?;

    match &opts.output {
        Some(output) => info!(
            "Envelope authentic; {} bytes written to {}, SHA-256 {}",
            len,
            output.display(),
            digest
        ),
        None => info!("Envelope authentic; {} bytes, SHA-256 {}", len, digest),
    }
    Ok(())
}

fn check_name(envelope: &Path) {
    let file_name = envelope
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match EnvelopeName::parse(&file_name) {
        Some(name) => info!(
            "Participant {}, captured {}, kind {}",
            name.short_id, name.timestamp, name.data_kind
        ),
        None => warn!("{} does not follow the envelope naming convention", file_name),
    }
}
