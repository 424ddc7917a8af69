//! gridsub - submit and track jobs on Grid Engine clusters.

use camino::Utf8PathBuf;
use clap::Parser;
use gridsub_cli::{Args, CONFIG_ENV, Command};
use gridsub_sge::{GridEngine, JobStatus, PluginConfig, default_conf};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter directive.
const LOG_ENV: &str = "GRIDSUB_LOG";

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<Utf8PathBuf>) -> Result<PluginConfig> {
    let path = path.or_else(|| std::env::var(CONFIG_ENV).ok().map(Utf8PathBuf::from));
    let config = match path {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path);
            PluginConfig::from_path(&path)
        }
        None => PluginConfig::embedded(),
    };
    config.into_diagnostic()
}

fn print_status(status: &JobStatus) {
    println!("Job {} ({})", status.id, status.name);
    if let Some(sub_time) = status.sub_time {
        println!("  Submitted: {}", sub_time.format("%Y-%m-%d %H:%M:%S"));
    }
    for (task, t) in &status.tasks {
        let mut line = format!("  Task {}: {}", task, t.status);
        if let Some(start) = t.start_time {
            line.push_str(&format!(", started {}", start.format("%Y-%m-%d %H:%M:%S")));
        }
        if let Some(end) = t.end_time {
            line.push_str(&format!(", ended {}", end.format("%Y-%m-%d %H:%M:%S")));
        }
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // default-conf never reads the user's configuration
    let config = match args.command {
        Command::DefaultConf => PluginConfig::embedded().into_diagnostic()?,
        _ => load_config(args.config)?,
    };
    let engine = GridEngine::new(config);

    match args.command {
        Command::Submit(submit) => {
            if engine.already_queued() {
                tracing::warn!("Already running inside a Grid Engine job");
            }
            let job_id = engine.submit(&submit.to_request()).await.into_diagnostic()?;
            println!("{}", job_id);
        }
        Command::Status { job_id, json } => {
            let status = engine.job_status(&job_id).await.into_diagnostic()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status).into_diagnostic()?
                );
            } else {
                print_status(&status);
            }
        }
        Command::Qdel { job_id } => {
            let (output, code) = engine.qdel(&job_id).await.into_diagnostic()?;
            print!("{}", output);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::QueueDefs => {
            let defs = engine.build_queue_defs().await.into_diagnostic()?;
            print!("{}", defs.to_yaml().into_diagnostic()?);
        }
        Command::Projects => {
            for project in engine.project_list().await.into_diagnostic()? {
                println!("{}", project);
            }
        }
        Command::DefaultConf => print!("{}", default_conf()),
    }

    Ok(())
}
