use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use outpost::collectors::access_log::{MongooseLogCollector, NginxAccessCollector};
use outpost::collectors::linux::LinuxStatsCollector;
use outpost::collectors::mongodb::MongoStatusCollector;
use outpost::collectors::mysql::{MySqlConnection, MySqlDigestSampler, MySqlStatusCollector};
use outpost::collectors::redis::RedisStatusCollector;
use outpost::collectors::schedule_log::{CronLogCollector, SpoolTarget, SystemdTimerCollector};
use outpost::collectors::slow_query::{MongoSlowQueryCollector, MySqlSlowQueryCollector};
use outpost::config::{ApiLogSourceKind, Config, SchedulerSourceKind};
use outpost::deliver::{DeliveryClient, DEFAULT_TIMEOUT};
use outpost::envelope::{self, Identity};
use outpost::exporter::{Exporter, SourceCollector};
use outpost::history::RollingWindow;
use outpost::tail::{LineFilter, LogTailer};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Command-line arguments for the exporter agent
#[derive(Parser)]
#[command(
    name = "outpost",
    about = "Metrics and log exporter agent",
    long_about = "A host agent that periodically samples local services (Redis, MySQL, \
                  MongoDB, the Linux host, access logs, cron/systemd schedules, slow-query \
                  logs) and pushes JSON envelopes to a remote HTTP collector."
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", help = "Configuration file path (TOML format)")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging output (sets RUST_LOG=debug)")]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults later; an existing
            // non-file path can never work.
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
        }
        Ok(())
    }
}

/// The orchestrator: owns the exporter set and process-wide identity
///
/// Builds one or more schedule loops per enabled config block, starts
/// them, emits the one-time liveness notification, and stops everything
/// on shutdown. Exporter-internal state is never touched after start.
pub struct Outpost {
    config: Config,
    identity: Identity,
    exporters: Vec<Exporter>,

    /// Shutdown signal
    shutdown_sender: mpsc::Sender<()>,
    shutdown_receiver: mpsc::Receiver<()>,
}

impl Outpost {
    pub fn new(config: Config) -> Self {
        let identity = Identity::detect(&config.global.app_name, &config.global.purpose);
        info!(
            "identity: app={} ip={} purpose={}",
            identity.app, identity.ip, identity.purpose
        );

        let exporters = build_exporters(&config, &identity);
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        Self {
            config,
            identity,
            exporters,
            shutdown_sender,
            shutdown_receiver,
        }
    }

    /// Load configuration from file or fall back to defaults
    pub fn load_config(config_path: Option<&PathBuf>) -> Config {
        match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Config::from_file(path) {
                    Ok(config) => config,
                    Err(outpost::ConfigError::ReadError(e)) => {
                        warn!("Configuration file unreadable ({}), using defaults", e);
                        Config::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path.display(), e);
                        warn!("Using default configuration due to invalid config file");
                        Config::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Config::default()
            }
        }
    }

    /// Start every built exporter; failures disable only that exporter
    ///
    /// Returns the names of the exporters that actually started.
    pub fn start(&mut self) -> Vec<String> {
        let mut started = Vec::new();
        for exporter in &mut self.exporters {
            match exporter.start() {
                Ok(()) => started.push(exporter.name().to_string()),
                Err(e) => error!("{} exporter failed to start: {}", exporter.name(), e),
            }
        }
        info!(
            "started {}/{} exporters: [{}]",
            started.len(),
            self.exporters.len(),
            started.join(", ")
        );
        started
    }

    /// One-time liveness notification to the central server
    pub fn notify_liveness(&self, started: &[String]) {
        let Some(monitor_url) = &self.config.global.monitor_url else {
            return;
        };
        if started.is_empty() {
            warn!("no exporter started, skipping liveness notification");
            return;
        }

        let key = self.config.global.monitor_key.as_deref().unwrap_or("");
        let payload = envelope::liveness(&self.identity, key, started, chrono::Utc::now());

        match DeliveryClient::new(DEFAULT_TIMEOUT) {
            Ok(client) => {
                client.deliver("liveness", monitor_url, &payload);
            }
            Err(e) => error!("liveness client unavailable: {}", e),
        }
    }

    /// Block until a shutdown signal is received
    pub fn wait_for_shutdown(&self) {
        info!("Waiting for shutdown signal...");
        if let Err(e) = self.shutdown_receiver.recv() {
            error!("Error waiting for shutdown: {}", e);
        }
    }

    /// Stop all exporters and join their threads
    pub fn stop(&mut self) {
        info!("Stopping exporters");
        for exporter in &mut self.exporters {
            if let Err(e) = exporter.stop() {
                error!("Failed to stop {} exporter: {}", exporter.name(), e);
            }
        }
        info!("All exporters stopped");
    }
}

/// Build the exporter set from the enabled config blocks
///
/// A block that fails to build (bad parameters, no delivery client) is
/// logged and skipped; other exporters are unaffected.
fn build_exporters(config: &Config, identity: &Identity) -> Vec<Exporter> {
    let mut exporters = Vec::new();

    let mut add = |name: &str, result: Result<Vec<Exporter>>| match result {
        Ok(mut built) => exporters.append(&mut built),
        Err(e) => error!("{} exporter not started: {:#}", name, e),
    };

    if config.redis.enabled {
        add("redis", build_redis(config, identity));
    } else {
        info!("skipping redis exporter (disabled)");
    }
    if config.mysql.enabled {
        add("mysql", build_mysql(config, identity));
    } else {
        info!("skipping mysql exporter (disabled)");
    }
    if config.mongodb.enabled {
        add("mongodb", build_mongodb(config, identity));
    } else {
        info!("skipping mongodb exporter (disabled)");
    }
    if config.slow_query.enabled {
        add("slow_query", build_slow_query(config, identity));
    } else {
        info!("skipping slow_query exporter (disabled)");
    }
    if config.linux.enabled {
        add("linux", build_linux(config, identity));
    } else {
        info!("skipping linux exporter (disabled)");
    }
    if config.api_log.enabled {
        add("api_log", build_api_log(config, identity));
    } else {
        info!("skipping api_log exporter (disabled)");
    }
    if config.scheduler.enabled {
        add("scheduler", build_scheduler(config, identity));
    } else {
        info!("skipping scheduler exporter (disabled)");
    }

    exporters
}

fn delivery() -> Result<DeliveryClient> {
    DeliveryClient::new(DEFAULT_TIMEOUT).context("building delivery client")
}

fn build_redis(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.redis;
    let mut exporters = vec![Exporter::new(
        "redis",
        "redis",
        Duration::from_secs(cfg.interval),
        identity.clone(),
        cfg.receiver_url.clone(),
        vec![Box::new(RedisStatusCollector::new(
            &cfg.redis_host,
            cfg.redis_port,
        ))],
        delivery()?,
    )];

    match &cfg.receiver_url_logs {
        Some(url) => {
            let tailer = LogTailer::new(
                "redis",
                cfg.redis_log_file.clone(),
                LineFilter::errors_and_warnings(),
                cfg.max_logs_per_batch,
            );
            exporters.push(Exporter::new(
                "redis_logs",
                "redis",
                Duration::from_secs(cfg.log_check_interval),
                identity.clone(),
                url.clone(),
                vec![Box::new(tailer)],
                delivery()?,
            ));
        }
        None => warn!("redis log watcher not started: receiver_url_logs not set"),
    }

    Ok(exporters)
}

fn build_mysql(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.mysql;
    let connection = MySqlConnection {
        host: cfg.mysql_host.clone(),
        port: cfg.mysql_port,
        user: cfg.mysql_user.clone(),
        password: cfg.mysql_password.clone(),
    };
    let digest_window = Arc::new(Mutex::new(RollingWindow::new(cfg.digest_window_minutes)));

    let mut exporters = vec![
        Exporter::new(
            "mysql",
            "mysql",
            Duration::from_secs(cfg.interval),
            identity.clone(),
            cfg.receiver_url.clone(),
            vec![Box::new(MySqlStatusCollector::new(
                connection.clone(),
                Arc::clone(&digest_window),
            ))],
            delivery()?,
        ),
        // Samples into the shared window on its own cadence; its cycles
        // deliver nothing themselves.
        Exporter::new(
            "mysql_digest",
            "mysql",
            Duration::from_secs(cfg.digest_interval),
            identity.clone(),
            cfg.receiver_url.clone(),
            vec![Box::new(MySqlDigestSampler::new(
                connection,
                digest_window,
            ))],
            delivery()?,
        ),
    ];

    match &cfg.receiver_url_logs {
        Some(url) => {
            let tailer = LogTailer::new(
                "mysql",
                cfg.mysql_log_file.clone(),
                LineFilter::errors_and_warnings(),
                cfg.max_logs_per_batch,
            );
            exporters.push(Exporter::new(
                "mysql_logs",
                "mysql",
                Duration::from_secs(cfg.log_check_interval),
                identity.clone(),
                url.clone(),
                vec![Box::new(tailer)],
                delivery()?,
            ));
        }
        None => warn!("mysql log watcher not started: receiver_url_logs not set"),
    }

    Ok(exporters)
}

fn build_mongodb(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.mongodb;
    let mut exporters = vec![Exporter::new(
        "mongodb",
        "mongodb",
        Duration::from_secs(cfg.interval),
        identity.clone(),
        cfg.receiver_url.clone(),
        vec![Box::new(MongoStatusCollector::new(
            &cfg.mongo_uri,
            &cfg.mongo_db,
        ))],
        delivery()?,
    )];

    match &cfg.receiver_url_logs {
        Some(url) => {
            let tailer = LogTailer::new(
                "mongodb",
                cfg.mongo_log_file.clone(),
                LineFilter::errors_and_warnings(),
                cfg.max_logs_per_batch,
            );
            exporters.push(Exporter::new(
                "mongodb_logs",
                "mongodb",
                Duration::from_secs(cfg.log_check_interval),
                identity.clone(),
                url.clone(),
                vec![Box::new(tailer)],
                delivery()?,
            ));
        }
        None => warn!("mongodb log watcher not started: receiver_url_logs not set"),
    }

    Ok(exporters)
}

fn build_slow_query(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.slow_query;
    let connection = MySqlConnection {
        host: cfg.mysql_host.clone(),
        port: cfg.mysql_port,
        user: cfg.mysql_user.clone(),
        password: cfg.mysql_password.clone(),
    };

    let collectors: Vec<Box<dyn SourceCollector>> = vec![
        Box::new(MongoSlowQueryCollector::new(
            &cfg.mongo_uri,
            &cfg.mongo_db,
            cfg.mongo_slow_threshold_ms,
            cfg.max_queries,
            cfg.log_window_minutes,
        )),
        Box::new(MySqlSlowQueryCollector::new(
            connection,
            cfg.max_queries,
            cfg.log_window_minutes,
        )),
    ];

    Ok(vec![Exporter::new(
        "slow_query",
        "slow_query",
        Duration::from_secs(cfg.export_interval),
        identity.clone(),
        cfg.receiver_url.clone(),
        collectors,
        delivery()?,
    )])
}

fn build_linux(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.linux;
    Ok(vec![Exporter::new(
        "linux",
        "linux",
        Duration::from_secs(cfg.export_interval),
        identity.clone(),
        cfg.receiver_url.clone(),
        vec![Box::new(LinuxStatsCollector::new())],
        delivery()?,
    )])
}

fn build_api_log(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.api_log;
    let mut collectors: Vec<Box<dyn SourceCollector>> = Vec::new();

    for source in &cfg.sources {
        if !source.enabled {
            continue;
        }
        match source.kind {
            ApiLogSourceKind::Nginx => collectors.push(Box::new(NginxAccessCollector::new(
                source.access_log_path.clone(),
                cfg.log_window_minutes,
                source.max_logs,
            ))),
            ApiLogSourceKind::Mongoose => match (&source.mongo_uri, &source.collection) {
                (Some(uri), Some(collection)) => {
                    collectors.push(Box::new(MongooseLogCollector::new(
                        uri,
                        collection,
                        cfg.log_window_minutes,
                        source.max_logs,
                    )))
                }
                _ => warn!("api_log: mongoose source missing mongo_uri or collection, skipping"),
            },
        }
    }

    if collectors.is_empty() {
        anyhow::bail!("no usable api_log sources configured");
    }

    Ok(vec![Exporter::new(
        "api_log",
        "api_log",
        Duration::from_secs(cfg.export_interval),
        identity.clone(),
        cfg.receiver_url.clone(),
        collectors,
        delivery()?,
    )])
}

fn build_scheduler(config: &Config, identity: &Identity) -> Result<Vec<Exporter>> {
    let cfg = &config.scheduler;
    let spool = SpoolTarget {
        base_dir: cfg.spool_dir.clone(),
        app: identity.app.clone(),
        ip: identity.ip.clone(),
    };

    let mut collectors: Vec<Box<dyn SourceCollector>> = Vec::new();
    for source in &cfg.sources {
        if !source.enabled {
            continue;
        }
        match source.kind {
            SchedulerSourceKind::Cron => collectors.push(Box::new(CronLogCollector::new(
                source.syslog_path.clone(),
                cfg.log_window_minutes,
                cfg.max_logs,
                Some(spool.clone()),
            ))),
            SchedulerSourceKind::Systemd => {
                collectors.push(Box::new(SystemdTimerCollector::new(Some(spool.clone()))))
            }
        }
    }

    if collectors.is_empty() {
        anyhow::bail!("no scheduler sources configured");
    }

    Ok(vec![Exporter::new(
        "scheduler",
        "scheduler",
        Duration::from_secs(cfg.export_interval),
        identity.clone(),
        cfg.receiver_url.clone(),
        collectors,
        delivery()?,
    )])
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting outpost exporter agent");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = Outpost::load_config(cli.config.as_ref());
    let mut outpost = Outpost::new(config);

    let started = outpost.start();
    if started.is_empty() {
        warn!("no exporter is running; check the configuration");
    }
    outpost.notify_liveness(&started);

    // SIGINT triggers a graceful stop: flags clear, loops finish their
    // sleep slice, threads join.
    let shutdown_sender = outpost.shutdown_sender.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .expect("Error setting SIGINT handler for graceful shutdown");

    info!("outpost is running. Press Ctrl+C to stop.");

    outpost.wait_for_shutdown();
    outpost.stop();

    info!("outpost shutdown complete");
}
