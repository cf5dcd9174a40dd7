use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Persistence Operator - scheduled database actions on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Write logs to this file instead of stdout
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the operator and its status API
    Run {
        /// API server URL (default: in-cluster or kubeconfig settings)
        #[arg(long)]
        apiserver: Option<String>,

        /// Skip TLS verification of the API server
        #[arg(long)]
        tls_insecure: bool,

        /// Status API port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Number of concurrent sync workers
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Image of the container running the actions
        #[arg(long)]
        job_image: Option<String>,
    },

    /// Print the custom resource definitions as YAML
    Crds,

    /// List PersistenceActions
    Actions {
        /// Namespace (default: all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// List PersistenceInstances
    Instances {
        /// Namespace (default: all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Show the status of a PersistenceAction from a running server
    Status {
        namespace: String,

        name: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },
}
