mod config;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use joblog_k8s::KubeClusterRegistry;
use joblog_logs::{LogEngine, LogSessions, SessionRequest};
use joblog_store::CatalogStore;
use joblog_types::{ContainerLogRequest, LogRequest, StreamStatus};

use crate::config::Config;

/// Joblog - Stream the live container logs of CI jobs running on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "joblog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ./joblog.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log engine progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of historical lines to start from (0 for the whole log)
    #[arg(long, global = true, default_value = "0")]
    tail: i64,

    /// Print the current log and exit instead of following it
    #[arg(long, global = true)]
    no_follow: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Logs of a pipeline task
    Task {
        /// Pipeline name (omit for jobs started from an environment)
        #[arg(long, default_value = "")]
        pipeline: String,
        #[arg(long, default_value = "0")]
        task_id: i64,
        /// Service name, `<module>_<service>` or just the module
        #[arg(long)]
        service: String,
        #[arg(long, default_value = "")]
        module: String,
        #[arg(long, default_value = "")]
        product: String,
        #[arg(long, default_value = "")]
        env: String,
        /// Sub-task, also the container streamed
        #[arg(long, default_value = "")]
        sub_task: String,
        #[arg(long, default_value = "")]
        pipeline_type: String,
        #[arg(short, long, default_value = "")]
        namespace: String,
    },
    /// Logs of a workflow job
    Workflow {
        workflow: String,
        task_id: i64,
        /// Job name inside the workflow task
        job: String,
    },
    /// Logs of a test job
    Test {
        pipeline: String,
        task_id: i64,
        /// Test job service name; the test name is derived from it
        #[arg(long)]
        service: String,
        #[arg(long, default_value = "")]
        test: String,
        #[arg(short, long, default_value = "")]
        namespace: String,
    },
    /// Logs of a container in a product environment
    Container {
        product: String,
        env: String,
        pod: String,
        container: String,
    },
}

impl Args {
    fn session_request(self) -> SessionRequest {
        let tail_lines = self.tail;
        let follow = !self.no_follow;
        let base = LogRequest {
            tail_lines,
            follow,
            ..Default::default()
        };

        match self.command {
            Command::Task {
                pipeline,
                task_id,
                service,
                module,
                product,
                env,
                sub_task,
                pipeline_type,
                namespace,
            } => SessionRequest::Task(LogRequest {
                pipeline_name: pipeline,
                task_id,
                service_name: service,
                service_module: module,
                product_name: product,
                env_name: env,
                sub_task,
                pipeline_type,
                namespace,
                ..base
            }),
            Command::Workflow {
                workflow,
                task_id,
                job,
            } => SessionRequest::WorkflowJob(LogRequest {
                pipeline_name: workflow,
                task_id,
                sub_task: job,
                ..base
            }),
            Command::Test {
                pipeline,
                task_id,
                service,
                test,
                namespace,
            } => SessionRequest::TestJob(LogRequest {
                pipeline_name: pipeline,
                task_id,
                service_name: service,
                test_name: test,
                namespace,
                ..base
            }),
            Command::Container {
                product,
                env,
                pod,
                container,
            } => SessionRequest::Container(ContainerLogRequest {
                product_name: product,
                env_name: env,
                pod_name: pod,
                container_name: container,
                tail_lines,
                follow,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Stdout carries only log lines
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = Config::load(args.config.as_deref())?;

    let store = match &config.catalog {
        Some(path) => CatalogStore::load(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => {
            warn!("No catalog configured, every metadata lookup will miss");
            CatalogStore::default()
        }
    };
    let clusters = KubeClusterRegistry::new(config.cluster_endpoints());
    info!(clusters = ?clusters.cluster_ids(), "Configured clusters");

    let engine = Arc::new(LogEngine::new(
        Arc::new(store),
        Arc::new(clusters),
        config.engine_settings(),
    ));
    let mut sessions = LogSessions::new(engine);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = sessions.start(args.session_request(), tx);

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping log stream");
            cancel.cancel();
        }
    });

    // Ends once the session drops its sender
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let mut stdout = std::io::stdout().lock();
            if writeln!(stdout, "{}", line).is_err() {
                break;
            }
        }
    });

    let status = handle.wait().await;
    drop(sessions);
    printer.await.context("Log printer task failed")?;

    Ok(match status {
        StreamStatus::Completed => ExitCode::SUCCESS,
        StreamStatus::Cancelled => ExitCode::from(130),
        StreamStatus::Failed(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    })
}
