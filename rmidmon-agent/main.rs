use axum::{response::IntoResponse, routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use rmidmon::config::{parse_cpu_list, parse_group_arg, GroupRequest};
use rmidmon::platform::{Capabilities, CpuTopology, HostRegisters, RegisterAccess, Topology};
use rmidmon::{
    GroupId, MonEvent, MonitorConfig, MonitorManager, RdtMetricExporter, Result, RmidmonError,
    Sampler, SamplerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "rmidmon")]
#[command(about = "LLC occupancy monitoring with Intel RDT")]
struct Args {
    #[arg(
        long = "core",
        help = "Cores to monitor, one group per core (supports ranges and comma-separated lists: --core 0-3,5-8 or --core 0-3 --core 5-8)",
        action = clap::ArgAction::Append
    )]
    cores: Vec<String>,

    #[arg(
        long = "group",
        help = "Cores monitored together as one group, with an optional label: --group db:0-3",
        action = clap::ArgAction::Append
    )]
    groups: Vec<String>,

    #[arg(
        long,
        help = "Reclaim RMIDs found associated with cores at startup instead of skipping those cores"
    )]
    free_in_use_rmid: bool,

    #[arg(long, default_value_t = 1000, help = "Polling interval in milliseconds")]
    interval: u64,

    #[arg(long, help = "Total monitoring time in seconds (default: until interrupted)")]
    time: Option<u64>,

    #[arg(long, default_value_t = 8080, help = "Port of the /metrics HTTP endpoint")]
    port: u16,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (shows all MSR read/write operations)"
    )]
    verbose: bool,
}

struct AppState {
    exporter: Arc<RdtMetricExporter>,
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    rmidmon::gather_metrics!(buffer, encoder, state.exporter, "RDT");

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions() {
    let msr_path = "/dev/cpu/0/msr";
    if std::fs::metadata(msr_path).is_err() {
        eprintln!("\n⚠️  ERROR: Cannot access {msr_path}\n\nThe MSR kernel module may not be loaded.\nRun: sudo modprobe msr\n");
        std::process::exit(1);
    }

    if let Err(e) = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(msr_path)
    {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            eprintln!("\n⚠️  ERROR: Permission denied accessing {msr_path}\n\nRun as root: sudo rmidmon --core 0-3\n");
            std::process::exit(1);
        }
    }
}

/// Turn `--group` / `--core` arguments into start requests
fn group_requests(args: &Args, topology: &CpuTopology) -> Result<Vec<GroupRequest>> {
    if !args.groups.is_empty() {
        return args
            .groups
            .iter()
            .map(|arg| {
                parse_group_arg(arg)
                    .ok_or_else(|| RmidmonError::ParamError(format!("Malformed group: {arg}")))
            })
            .collect();
    }

    let cores = if args.cores.is_empty() {
        topology.cores().iter().map(|c| c.id).collect()
    } else {
        let mut cores = Vec::new();
        for arg in &args.cores {
            let list = parse_cpu_list(arg)
                .ok_or_else(|| RmidmonError::ParamError(format!("Malformed core list: {arg}")))?;
            cores.extend(list);
        }
        cores.sort_unstable();
        cores.dedup();
        cores
    };

    Ok(cores
        .into_iter()
        .map(|core| GroupRequest {
            cores: vec![core],
            label: None,
        })
        .collect())
}

fn start_groups(
    manager: &MonitorManager,
    exporter: &RdtMetricExporter,
    requests: Vec<GroupRequest>,
) -> Vec<GroupId> {
    let mut started = Vec::new();

    for request in requests {
        let id = match manager.start(&request.cores, MonEvent::LlcOccupancy, request.label) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to start monitoring on cores {:?}: {}", request.cores, e);
                continue;
            }
        };

        if let Some(group) = manager.group(id) {
            if let Err(e) = exporter.register_group(id, &group) {
                tracing::error!("Failed to register gauge for {}: {}", id, e);
            }
        }
        started.push(id);
    }

    started
}

fn stop_groups(manager: &MonitorManager, exporter: &RdtMetricExporter, groups: &[GroupId]) {
    for &id in groups {
        if let Err(e) = exporter.unregister_group(id) {
            tracing::warn!("Failed to unregister gauge for {}: {}", id, e);
        }
        if let Err(e) = manager.stop(id) {
            tracing::error!("Failed to stop {}: {}", id, e);
        }
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    tracing::info!("Installing signal handlers...");

    let ctrl_c = async {
        tracing::debug!("Waiting for Ctrl+C...");
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl+C received!"),
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        tracing::debug!("Waiting for SIGTERM...");
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received!");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
        _ = cancel_token.cancelled() => {
            tracing::warn!("Shutdown triggered by end of monitoring time");
        },
    }

    tracing::warn!("Shutdown signal received, initiating graceful shutdown...");
    cancel_token.cancel();
    tracing::warn!("Cancellation token activated");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    check_permissions();

    let topology = Arc::new(CpuTopology::detect()?);
    tracing::info!(
        "Detected {} online cores on {} sockets",
        topology.cores().len(),
        topology.sockets().len()
    );

    let regs: Arc<dyn RegisterAccess> = Arc::new(HostRegisters);
    let probe_core = topology.cores().first().map_or(0, |c| c.id);
    let caps = Arc::new(Capabilities::discover(regs.as_ref(), probe_core)?);

    let config = MonitorConfig {
        free_in_use_rmid: args.free_in_use_rmid,
    };
    let manager = Arc::new(MonitorManager::new(
        regs,
        caps,
        Arc::clone(&topology) as Arc<dyn Topology>,
        config,
    )?);

    let exporter = Arc::new(RdtMetricExporter::new());
    let requests = group_requests(&args, &topology)?;
    let groups = start_groups(&manager, &exporter, requests);
    if groups.is_empty() {
        return Err(RmidmonError::ResourceError(
            "No monitoring group could be started".to_string(),
        ));
    }
    tracing::info!("Monitoring {} group(s)", groups.len());

    let cancel_token = CancellationToken::new();

    let sampler_config = SamplerConfig {
        interval: Duration::from_millis(args.interval),
        duration: args.time.map(Duration::from_secs),
    };
    let sampler = Sampler::new(Arc::clone(&manager), Arc::clone(&exporter), sampler_config)
        .start(cancel_token.clone());
    let sampler_done = cancel_token.clone();
    let sampler = tokio::spawn(async move {
        let iterations = sampler.await;
        sampler_done.cancel();
        iterations
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(AppState {
            exporter: Arc::clone(&exporter),
        }));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::warn!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    tracing::info!("Server shutdown complete, waiting for sampler to finish...");

    match sampler.await {
        Ok(Ok(iterations)) => tracing::info!("Sampler finished after {} iterations", iterations),
        Ok(Err(e)) | Err(e) => tracing::error!("Sampler task failed: {}", e),
    }

    stop_groups(&manager, &exporter, &groups);
    drop(manager);

    tracing::info!("All tasks completed, exiting");

    Ok(())
}
