mod config;
mod metrics;
mod prober;
mod scheduler;
mod stats;
mod util;
mod varint;

use clap::Parser;
use config::{Cli, ProbeConfig};
use prober::{Prober, Protocol};
use scheduler::Scheduler;

use tracing::{debug, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not errors.
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    // Load config first to get log level
    let config = ProbeConfig::load(&cli).await?;
    let log_level = config.get_tracing_level()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tcping={}", log_level.as_str().to_lowercase()).parse()?),
        )
        .init();
    debug!(?config, "effective configuration");

    util::validate_target(&cli.target)?;
    let protocol = Protocol::lookup(cli.protocol.as_deref())?;

    if cli.resolve {
        let ip = util::resolve_host_to_ip(&cli.target).await?;
        println!("Resolved {} to {}", cli.target, ip);
    }

    if let Some(addr) = cli.metrics {
        metrics::initialize_metrics(config.enable_latency_history)?;
        tokio::spawn(metrics::serve_metrics(addr));
    }

    let timings = config.timings();
    info!(?timings, "starting probe");
    println!(
        "Starting TCPing on {}:{} with {} protocol...",
        cli.target,
        cli.port,
        protocol.name()
    );

    let mut prober = Prober::new(cli.target.clone(), cli.port, protocol, timings);
    let scheduler = Scheduler::new(timings.interval);

    tokio::select! {
        res = scheduler.run(&mut prober) => res?,
        res = tokio::signal::ctrl_c() => res?,
    }

    println!();
    println!(
        "{}",
        prober.statistics().summary(&cli.target, cli.port, protocol)
    );
    Ok(())
}
