//! linkprobe - adaptive discovery of live short identifiers
//!
//! Runs the supervised probe pool against the configured domains, and offers
//! a couple of read-only views over the persisted state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, BufReader, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkprobe::config::DEFAULT_CONFIG_FILE;
use linkprobe::model::alphabet;
use linkprobe::probe::{RunEnd, Supervisor};
use linkprobe::store::StatsStore;
use linkprobe::{notify, AppConfig, PoolMetrics};

#[derive(Parser)]
#[command(name = "linkprobe", version, about = "Adaptive discovery of live short identifiers")]
struct Cli {
    /// Config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the configured domains until interrupted
    Run {
        /// Override the worker count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop after this many probes
        #[arg(long)]
        max_probes: Option<u64>,

        /// Disable the live progress line
        #[arg(long)]
        no_progress: bool,
    },
    /// Show persisted weights and model sizes
    Stats,
    /// Validate the config file and show what each domain resolves to
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize the library
    if let Err(e) = linkprobe::init() {
        eprintln!("❌ Failed to initialize: {}", e);
        process::exit(1);
    }
    init_tracing(cli.json_logs);

    let result = match cli.command {
        Commands::Run {
            workers,
            max_probes,
            no_progress,
        } => run(&cli.config, workers, max_probes, no_progress || cli.json_logs).await,
        Commands::Stats => stats(&cli.config),
        Commands::CheckConfig => check_config(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,linkprobe=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(
    config_path: &Path,
    workers: Option<usize>,
    max_probes: Option<u64>,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(workers) = workers {
        config.pool.workers = workers;
    }
    if max_probes.is_some() {
        config.pool.max_probes = max_probes;
    }
    config.validate()?;

    let notifier = notify::from_config(&config.notify, &config.storage)?;
    let supervisor = Supervisor::new(config, notifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_tx.send_replace(true);
        }
    });

    let progress = if quiet || !std::io::stderr().is_terminal() {
        None
    } else {
        Some(spawn_progress(supervisor.metrics()))
    };

    let result = supervisor.run(shutdown_rx).await;

    signal.abort();
    if let Some((bar, ticker)) = progress {
        ticker.abort();
        bar.finish_and_clear();
    }

    let summary = result?;
    let m = summary.metrics;

    println!();
    println!("📈 Summary:");
    println!(
        "   🏁 Ended: {}",
        match summary.end {
            RunEnd::Shutdown => "interrupted",
            RunEnd::Completed => "probe budget spent",
        }
    );
    println!("   📊 Probes: {}", m.probes);
    println!("   🎯 Hits: {} ({:.3}%)", m.hits, m.hit_rate() * 100.0);
    println!("   ⏱️  Timeouts: {}", m.timeouts);
    if m.errors > 0 {
        println!("   ⚠️  Errors: {} ({:.1}%)", m.errors, m.error_rate() * 100.0);
    }
    println!("   🔁 Collisions: {}", m.collisions);
    if summary.restarts > 0 {
        println!("   ♻️  Restarts: {}", summary.restarts);
    }

    Ok(())
}

fn spawn_progress(metrics: Arc<PoolMetrics>) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));

    let ticker = {
        let bar = bar.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                let m = metrics.get_stats();
                bar.set_message(format!(
                    "{} probes, {} hits, {} errors, {} collisions",
                    m.probes, m.hits, m.errors, m.collisions
                ));
            }
        })
    };

    (bar, ticker)
}

fn stats(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = StatsStore::new(config.storage.stats_path());

    println!("📊 linkprobe stats");
    println!("═══════════════════");

    let Some(snapshot) = store.load()? else {
        println!("No stats yet at {}", store.path().display());
        return Ok(());
    };

    println!("Saved at:  {}", snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Probes:    {}", snapshot.total_probes);
    println!("Hits:      {}", snapshot.total_hits);

    let ledger_path = config.storage.ledger_path();
    match std::fs::File::open(&ledger_path) {
        Ok(file) => {
            let claimed = BufReader::new(file).lines().map_while(|l| l.ok()).count();
            println!("Claimed:   {}", claimed);
        }
        Err(_) => println!("Claimed:   0 (no ledger at {})", ledger_path.display()),
    }

    println!();
    println!("⚖️  Weights:");
    for domain in &config.domains {
        match snapshot.weights.get(&domain.name) {
            Some(weight) => println!("   {:<28} {:>6.2}", domain.name, weight),
            None => println!("   {:<28} {:>6}", domain.name, "-"),
        }
    }

    let model = snapshot.to_model();
    if !model.is_empty() {
        println!();
        println!("🧠 Model tables:");
        for (key, _) in model.tables() {
            println!(
                "   {:<28} len {:<3} {} hits",
                key.domain,
                key.length,
                model.observations(&key.domain, key.length)
            );
        }
    }

    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("✅ {} is valid", config_path.display());
    println!();
    for domain in &config.domains {
        let symbols = alphabet::resolve(domain);
        let rule = alphabet::host_rule(&domain.host())
            .map(|preset| format!(" (host rule: {})", preset))
            .unwrap_or_default();
        println!("🌐 {}", domain.name);
        println!("   url:       {}<code>", domain.base_url);
        println!("   lengths:   {:?}", domain.lengths());
        println!("   alphabet:  {} symbols{}", symbols.len(), rule);
        println!("   validator: {}", domain.validator);
        println!("   interval:  {}ms", domain.interval_ms);
    }
    println!();
    println!(
        "Pool: {} workers, checkpoint every {} probes, data in {}",
        config.pool.workers,
        config.pool.snapshot_interval,
        config.storage.data_dir.display()
    );

    Ok(())
}
