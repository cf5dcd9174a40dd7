use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod commands;
mod config;

use cli::{Args, Mode};
use config::Config;

/// Initialize tracing to stdout, or to `log_file` when one is given.
///
/// The returned guard flushes the file writer and must be held until exit.
fn initialize_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,\
         persistence_server=debug,\
         persistence_operator=debug,\
         kube=info"
            .into()
    });

    match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create {}", directory.display()))?;

            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _guard = initialize_tracing(args.log_file.as_deref())?;
    let config = Config::load()?;

    match args.mode {
        Mode::Run {
            apiserver,
            tls_insecure,
            port,
            workers,
            job_image,
        } => {
            let settings = commands::operator::RunSettings {
                apiserver: apiserver.or(config.apiserver),
                tls_insecure: tls_insecure || config.tls_insecure,
                port,
                workers,
                job_image: job_image.unwrap_or(config.job_image),
                resync_period: config.resync_period,
            };
            commands::operator::run(settings).await
        }
        Mode::Crds => commands::resources::print_crds(),
        Mode::Actions { namespace, output } => {
            commands::resources::list_actions(&config, namespace, &output).await
        }
        Mode::Instances { namespace, output } => {
            commands::resources::list_instances(&config, namespace, &output).await
        }
        Mode::Status {
            namespace,
            name,
            output,
        } => commands::status::run_status(&config, &namespace, &name, &output).await,
    }
}
