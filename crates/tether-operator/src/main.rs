//! Tether Operator - multi-cluster tunnel controller

use clap::Parser;
use kube::CustomResourceExt;

use tether_common::crd::TetherCluster;
use tether_common::telemetry::{init_telemetry, TelemetryConfig};
use tether_operator::{run_controller, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&TetherCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "tether-operator".to_string(),
        json: cli.log_json,
    })?;

    run_controller(cli).await
}
