//! Convoy - Entry Point
//!
//! Builds the desired state of one container service from the environment
//! and stack outputs, then reconciles the orchestrator with it.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use convoy::deploy::arch::detect_host_arch;
use convoy::deploy::builder::{build_spec, DeploymentInputs};
use convoy::deploy::reconciler::Reconciler;
use convoy::errors::ReconcileError;
use convoy::filesys::file::File;
use convoy::http::client::HttpClient;
use convoy::logs::init_logging;
use convoy::models::spec::DeploymentSpec;
use convoy::plane::memory::InMemoryControlPlane;
use convoy::plane::ControlPlane;
use convoy::report::{render_failure, render_summary};
use convoy::settings::{Settings, SETTINGS_ENV, TOKEN_ENV};
use convoy::stack::{EnvStackOutputs, JsonFileOutputs, StackOutputResolver};
use convoy::utils::{host_name, version_info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    let code = match run(&cli_args).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<ReconcileError>()
                .map(ReconcileError::exit_code)
                .unwrap_or(5);
            match e.downcast_ref::<ReconcileError>() {
                Some(err) => eprintln!("{}", render_failure(err)),
                None => eprintln!("Deployment aborted: {e:#}"),
            }
            error!("{:#}", e);
            code
        }
    };
    std::process::exit(code);
}

async fn run(cli_args: &HashMap<String, String>) -> anyhow::Result<i32> {
    // Retrieve the settings
    let settings = Settings::load(
        cli_args.get("settings").map(String::as_str),
        env::var(SETTINGS_ENV).ok(),
        env::var(TOKEN_ENV).ok(),
    )
    .await
    .context("Unable to load settings")?;

    // Initialize logging
    let json_output = cli_args.contains_key("json");
    if let Err(e) = init_logging(settings.log_options(json_output)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let version = version_info();
    info!(
        "Convoy {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );

    // Desired state
    let inputs = DeploymentInputs::from_vars(env::vars()).with_overrides(cli_args);
    let resolver: Box<dyn StackOutputResolver> = match cli_args.get("outputs") {
        Some(path) => Box::new(JsonFileOutputs::new(File::new(path))),
        None => Box::new(EnvStackOutputs::new(env::vars())),
    };
    let outputs = resolver
        .resolve()
        .await
        .context("Unable to resolve stack outputs")?;
    let host_arch = detect_host_arch().await;
    let spec = build_spec(&inputs, &outputs, &host_arch).context("Invalid deployment inputs")?;
    info!(
        "Desired state for {} digest {}",
        spec.service_name(),
        spec.digest()
    );

    // Control plane
    let simulate = cli_args.contains_key("simulate");
    let mut options = settings.reconciler_options();
    let plane: Arc<dyn ControlPlane> = if simulate {
        info!("Simulating against an in-memory control plane");
        options.waiter.poll_interval = Duration::from_millis(100);
        Arc::new(simulated_plane(&spec, &options.network.logging_endpoint_service))
    } else {
        Arc::new(
            HttpClient::new(
                &settings.control_plane.base_url,
                settings.control_plane.token.clone(),
                settings.control_plane.timeout(),
            )
            .context("Unable to create control plane client")?,
        )
    };

    // Reconcile
    let reconciler = Reconciler::new(plane, options);
    let result = reconciler.reconcile(&spec).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_summary(&result, &host_name()));
    }

    if let Some(path) = cli_args.get("result-file") {
        File::new(path)
            .write_json(&result)
            .await
            .with_context(|| format!("Unable to write result file {}", path))?;
    }

    Ok(result.exit_code())
}

/// Control plane seeded with the cluster and logging endpoint the desired state expects
fn simulated_plane(spec: &DeploymentSpec, logging_endpoint_service: &str) -> InMemoryControlPlane {
    let plane = InMemoryControlPlane::new().with_cluster(spec.cluster_name());
    match spec.network().vpc_id.as_deref() {
        Some(vpc) => plane.with_vpc_endpoint(vpc, logging_endpoint_service, "sg-logging-endpoint"),
        None => plane,
    }
}
