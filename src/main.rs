use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config, CustomResourceExt as _,
};
use readiness_crds::{Capability, ReadinessProvider};
use tracing_subscriber::EnvFilter;

use crate::{
    config::ControllerConfig,
    error::Result,
    packages::{ClusterBootstrapRef, KubePackageWaiter, PackageRef},
};

mod capability;
mod client;
mod conditions;
mod config;
mod error;
mod packages;
mod readiness;
mod reconciliation;
#[cfg(test)]
mod testing;

const PACKAGE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the Capability and ReadinessProvider controllers.
    Reconcile(ControllerConfig),

    /// Print the CustomResourceDefinitions as YAML.
    Crds,

    /// Wait for core add-on packages to finish installing.
    WaitPackages {
        /// Packages as `namespace/name`; a bare name is looked up in tkg-system.
        #[arg(required_unless_present = "cluster_bootstrap")]
        packages: Vec<PackageRef>,

        /// Also wait for the core packages of this `namespace/name`
        /// ClusterBootstrap on the management cluster.
        #[arg(long)]
        cluster_bootstrap: Option<ClusterBootstrapRef>,

        /// Kubeconfig context of the management cluster.
        #[arg(long)]
        management_context: Option<String>,

        /// Kubeconfig context of the workload cluster.
        #[arg(long)]
        workload_context: Option<String>,

        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
}

async fn client_for(context: Option<String>) -> Result<Client> {
    match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context),
                ..KubeConfigOptions::default()
            };
            let config = Config::from_custom_kubeconfig(Kubeconfig::read()?, &options).await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Reconcile(config) => {
            let client = Client::try_default().await?;

            reconciliation::reconcile(client, config).await;
        }
        Command::Crds => {
            print!("{}", serde_yaml::to_string(&Capability::crd())?);
            println!("---");
            print!("{}", serde_yaml::to_string(&ReadinessProvider::crd())?);
        }
        Command::WaitPackages {
            mut packages,
            cluster_bootstrap,
            management_context,
            workload_context,
            timeout_secs,
        } => {
            let timeout = Duration::from_secs(timeout_secs);
            let management = client_for(management_context).await?;
            let workload = client_for(workload_context).await?;

            if let Some(reference) = cluster_bootstrap {
                let bootstrap = packages::get_cluster_bootstrap(
                    management.clone(),
                    &reference,
                    PACKAGE_POLL_INTERVAL,
                    timeout,
                )
                .await?;
                packages.extend(packages::core_packages_from_cluster_bootstrap(&bootstrap));
            }

            packages::monitor_addons_core_package_installation(
                &KubePackageWaiter::new(management, PACKAGE_POLL_INTERVAL),
                &KubePackageWaiter::new(workload, PACKAGE_POLL_INTERVAL),
                &packages,
                timeout,
            )
            .await?;
        }
    }

    Ok(())
}
