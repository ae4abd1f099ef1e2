// src/main.rs
use clap::Parser;
use hive_miner::worker::{SessionEvent, WorkerId, WorkerProcess, WorkerSession};
use hive_miner::{Coordinator, MinerError, NodeClient, cli, config, stats, utils};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Main entry point for the coordinator
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
///
/// # Flow
/// 1. Parses command line arguments
/// 2. Delegates to appropriate subcommand handler
/// 3. Propagates any errors upward
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Probe(opts) => probe_worker(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Starts the coordinator with the given configuration options
///
/// # Arguments
/// * `opts` - Command line options for the mining operation
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads and validates configuration
/// 3. Sets up statistics reporting
/// 4. Spawns the configured worker processes
/// 5. Runs the node polling loop against the coordinator
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let mut config = config::load(&opts.config)?;
    // Apply CLI overrides
    if let Some(batch_size) = opts.batch_size {
        config.coordinator.default_batch_size = batch_size;
    }
    if opts.no_verify {
        config.coordinator.verify_solutions = false;
    }
    config.validate()?;

    let rt = Runtime::new()?;
    rt.block_on(async {
        // Statistics reporting
        let reporter = stats::StatsReporter::new(Duration::from_secs(60));
        reporter.start_reporting();

        // The proof-of-work function is chain-specific and ships outside
        // this binary; with no hasher installed, claimed hashes are checked
        // against the target as reported.
        let (coordinator, events) =
            Coordinator::new(config.coordinator.clone(), None, Some(reporter.feed()));

        for spec in &config.workers {
            for _ in 0..spec.count {
                coordinator.spawn_worker(spec)?;
            }
        }

        let node = NodeClient::new(config.node.clone())?;
        tokio::select! {
            result = coordinator.run() => result,
            result = node.run(coordinator.clone(), events) => result,
        }
    })
}

/// Spawns one worker, prints its capability and device reports, and exits
///
/// # Arguments
/// * `opts` - Worker command line and probe timeout
fn probe_worker(opts: cli::ProbeOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let rt = Runtime::new()?;
    rt.block_on(async {
        let (process, mut sink, mut stream) =
            WorkerProcess::spawn(&opts.command, &opts.args, &[])?;
        let mut session = WorkerSession::new(WorkerId(0));

        let init = session
            .initialize(1_000_000)
            .map_err(|e| MinerError::ProtocolError(e.to_string()))?;
        sink.send(&init).await?;

        let wait = Duration::from_secs(opts.timeout);
        loop {
            let record = tokio::time::timeout(wait, stream.next_record())
                .await
                .map_err(|_| {
                    MinerError::ProtocolError("Worker did not respond in time".to_string())
                })??;

            match session.on_record(&record) {
                Some(SessionEvent::Initialized(caps)) => {
                    println!("Capabilities:");
                    println!("  GPUs:           {}", caps.gpu_count);
                    println!("  Device memory:  {} bytes", caps.total_memory);
                    println!("  Max batch size: {}", caps.max_batch_size);
                    sink.send(&session.query_info()).await?;
                }
                Some(SessionEvent::Info(gpus)) => {
                    println!("Devices:");
                    for gpu in gpus {
                        println!(
                            "  #{} {} ({} bytes, {:.1}% busy, {:.1}C)",
                            gpu.index, gpu.name, gpu.memory, gpu.utilization, gpu.temperature
                        );
                    }
                    break;
                }
                Some(SessionEvent::InitFailed(message)) => {
                    return Err(MinerError::ProtocolError(format!(
                        "Worker failed to initialize: {}",
                        message
                    )));
                }
                Some(SessionEvent::ProtocolError(message)) => log::warn!("{}", message),
                _ => {}
            }
        }

        let shutdown = session.begin_shutdown();
        sink.send(&shutdown).await?;
        sink.close().await?;
        process.reap(Duration::from_secs(5)).await;
        Ok(())
    })
}

/// Generates a configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let template = config::generate_template(opts.node);
    std::fs::write(opts.output, template)?;
    Ok(())
}
