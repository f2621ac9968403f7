//! skup - in-place site upgrade orchestrator for Skupper sites.
//!
//! Brings a site recorded at an older version in line with this client:
//! migrates legacy object names, regenerates credentials, updates the
//! transport and controller workloads and removes what the old naming
//! scheme left behind. Also manages a few transport settings that share the
//! workload update machinery.

mod authority;
mod config;
mod credential;
mod error;
mod events;
mod exposure;
mod names;
mod orchestrator;
mod output;
mod phases;
mod settings;
mod site;
mod state;
mod store;
mod version;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use authority::RcgenAuthority;
use config::{Args, COMMIT, Config, LogFormat, Operation, VERSION};
use events::{EventRecorder, REASON_COMPLETED, REASON_FAILED, REASON_SETTINGS, REASON_STARTED};
use orchestrator::Orchestrator;
use store::KubeStore;

#[tokio::main]
async fn main() {
    // Parse arguments
    let args = Args::parse();
    let config = Config::from_args(args);

    // Initialize logging
    if let Err(e) = init_tracing(&config.log_level, config.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    debug!("Starting skup v{} (commit: {})", VERSION, COMMIT);

    if let Err(e) = run(&config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    match format {
        LogFormat::Json => fmt().with_env_filter(filter).json().with_target(true).init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
    }

    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    // Build Kubernetes client
    let client = kube::Client::try_default().await?;
    // Resolve namespace
    let namespace = config
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());
    info!("Using namespace {}", namespace);

    // Create store and event recorder
    let store = KubeStore::new(client, namespace.as_str());
    let recorder = EventRecorder::new(store.client().clone(), &namespace);

    match &config.operation {
        Operation::Update(update) => {
            let upgrade = update.upgrade_config(&namespace);
            let authority = RcgenAuthority;
            recorder
                .publish(
                    REASON_STARTED,
                    &format!("Updating site to {}", upgrade.library_version),
                )
                .await;

            // Run the upgrade
            let mut orchestrator = Orchestrator::new(&store, &authority, &upgrade);
            match orchestrator.run().await {
                Ok(report) => {
                    recorder
                        .publish(REASON_COMPLETED, &output::upgrade_summary(&report, &namespace))
                        .await;
                    output::print_upgrade_report(&report, &namespace);
                }
                Err(e) => {
                    recorder
                        .publish_warning(REASON_FAILED, &format!("{e:#}"))
                        .await;
                    return Err(e);
                }
            }
        }
        Operation::Restart => {
            settings::restart_transport(&store).await?;
            recorder.publish(REASON_SETTINGS, "Transport restarted").await;
            output::print_setting_result("Transport", true);
        }
        Operation::DebugMode(mode) => {
            let changed = settings::set_debug_mode(&store, mode.as_deref()).await?;
            if changed {
                recorder
                    .publish(REASON_SETTINGS, "Transport debug mode changed")
                    .await;
            }
            output::print_setting_result("Debug mode", changed);
        }
        Operation::Annotations(annotations) => {
            let changed = settings::set_annotations(&store, annotations).await?;
            output::print_setting_result("Annotations", changed);
        }
        Operation::Logging { levels, restart } => {
            let changed = settings::set_router_logging(&store, levels, *restart).await?;
            if changed {
                let summary: Vec<String> = levels.iter().map(ToString::to_string).collect();
                recorder
                    .publish(
                        REASON_SETTINGS,
                        &format!("Router logging set to {}", summary.join(",")),
                    )
                    .await;
            }
            output::print_setting_result("Router logging", changed);
        }
    }

    Ok(())
}
