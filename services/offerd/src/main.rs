use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use admin_ipc::{run_server, DEFAULT_SOCKET_PATH};
use anyhow::Context;
use clap::Parser;
use dispatch::{spawn_dispatcher, Coordinator};
use execution::PageBridgeExecutor;
use metrics::MetricsHandle;
use notify::{telegram::DEFAULT_API_BASE, DesktopChannel, TelegramChannel, TelegramClient};
use rates::{run_refresh, RateFetcher, RateHandle, DEFAULT_RATE_URL, DEFAULT_REFRESH_INTERVAL};
use remote::{run_poller, CommandClient};
use settings::{Settings, SettingsHandle};
use storage::{init_sqlite, Store};
use tokio::sync::watch;
use tokio::task;
use tracing::{info, warn, Level};
use uuid::Uuid;

mod admin;
mod relay;
mod sqlite_paths;

use admin::AdminContext;
use relay::{DispatchSink, Recorder};
use sqlite_paths::{ensure_sqlite_parent_dir, validate_sqlite_path};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "SQLITE_PATH", default_value = "sqlite://offer_relay.db")]
    sqlite_path: String,

    #[arg(long, env = "ADMIN_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    admin_socket: String,

    #[arg(long, env = "METRICS_ADDR", default_value = "127.0.0.1:9109")]
    metrics_addr: SocketAddr,

    /// Settings document used when none has been persisted yet.
    #[arg(long, env = "SETTINGS_FILE")]
    settings_file: Option<PathBuf>,

    /// Local endpoint of the page bridge that shows notifications and clicks accept.
    #[arg(long, env = "BRIDGE_URL", default_value = "http://127.0.0.1:8787")]
    bridge_url: String,

    #[arg(long, env = "TELEGRAM_API_BASE", default_value = DEFAULT_API_BASE)]
    telegram_api_base: String,

    #[arg(long, env = "LEDGER_CAPACITY", default_value_t = ledger::DEFAULT_CAPACITY)]
    ledger_capacity: usize,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    http_timeout_secs: u64,

    #[arg(long, env = "RATE_URL", default_value = DEFAULT_RATE_URL)]
    rate_url: String,

    #[arg(long, env = "RATE_REFRESH_SECS", default_value_t = DEFAULT_REFRESH_INTERVAL.as_secs())]
    rate_refresh_secs: u64,
}

fn log_startup(args: &Args, run_id: &str) {
    info!(path = %args.sqlite_path, "sqlite path configured");
    info!(socket = %args.admin_socket, "admin socket bind planned");
    info!(addr = %args.metrics_addr, "metrics bind planned");
    info!(url = %args.bridge_url, "bridge url configured");
    info!(%run_id, "run initialized");
}

/// Persisted settings win, then the settings file, then defaults.
async fn load_boot_settings(store: &Store, settings_file: Option<&PathBuf>) -> anyhow::Result<(Settings, &'static str)> {
    match store.load_settings().await {
        Ok(Some(settings)) => return Ok((settings, "sqlite")),
        Ok(None) => {}
        Err(err) => warn!(error = ?err, "ignoring unreadable persisted settings"),
    }
    if let Some(path) = settings_file {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings = Settings::from_json(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        return Ok((settings, "file"));
    }
    Ok((Settings::default(), "defaults"))
}

async fn persist_settings(store: Store, settings: SettingsHandle, mut shutdown: watch::Receiver<bool>) {
    let mut rx = settings.subscribe();
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = rx.borrow_and_update().clone();
                if let Err(err) = store.save_settings(&current).await {
                    warn!(error = ?err, "failed to persist settings");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    validate_sqlite_path(&args.sqlite_path)?;
    info!(
        sqlite = %args.sqlite_path,
        socket = %args.admin_socket,
        "booting offerd"
    );

    ensure_sqlite_parent_dir(&args.sqlite_path)?;

    let run_id = Uuid::new_v4().to_string();
    let store = init_sqlite(&args.sqlite_path).await?;
    store
        .insert_run(&run_id, Some(env!("CARGO_PKG_VERSION")))
        .await?;
    log_startup(&args, &run_id);

    let missing_tables = store.validate_required_tables().await?;
    if !missing_tables.is_empty() {
        warn!(tables = ?missing_tables, "sqlite missing required tables");
        if let Err(err) = store
            .log_incident(
                &run_id,
                "warning",
                "db_schema_missing",
                &format!(
                    "sqlite missing required tables: {}",
                    missing_tables.join(", ")
                ),
            )
            .await
        {
            warn!(error = ?err, "failed to log missing schema incident");
        }
    }

    let (boot_settings, settings_source) =
        load_boot_settings(&store, args.settings_file.as_ref()).await?;
    info!(source = settings_source, settings = ?boot_settings.masked(), "settings loaded");
    if settings_source != "sqlite" {
        store.save_settings(&boot_settings).await?;
    }
    let settings = SettingsHandle::new(boot_settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let persist_task = task::spawn(persist_settings(
        store.clone(),
        settings.clone(),
        shutdown_rx.clone(),
    ));

    let metrics = MetricsHandle::new()?;
    let metrics_addr = args.metrics_addr;
    let metrics_task = metrics.clone();
    task::spawn(async move {
        if let Err(err) = metrics_task.serve(metrics_addr).await {
            tracing::error!(error = ?err, "metrics server error");
        }
    });

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.http_timeout_secs))
        .build()?;
    let telegram = TelegramClient::with_base_url(http.clone(), &args.telegram_api_base);

    let rates = RateHandle::new();
    let rate_task = task::spawn(run_refresh(
        RateFetcher::new(http.clone(), args.rate_url.clone()),
        rates.clone(),
        Duration::from_secs(args.rate_refresh_secs.max(1)),
        shutdown_rx.clone(),
    ));

    let coordinator = Coordinator::new(Arc::new(PageBridgeExecutor::new(
        http.clone(),
        &args.bridge_url,
    )))
    .with_ledger_capacity(args.ledger_capacity)
    .with_channel(Arc::new(DesktopChannel::new(http.clone(), &args.bridge_url)))
    .with_channel(Arc::new(TelegramChannel::new(telegram.clone())))
    .with_rates(rates.clone());
    let (dispatch, dispatch_task) = spawn_dispatcher(coordinator, settings.clone());

    let recorder = Recorder::new(run_id.clone(), store.clone(), metrics.clone());
    let poller_task = task::spawn(run_poller(
        CommandClient::new(http.clone()),
        settings.clone(),
        Arc::new(DispatchSink::new(dispatch.clone(), recorder.clone())),
        shutdown_rx.clone(),
    ));

    let context = AdminContext {
        run_id: run_id.clone(),
        settings: settings.clone(),
        dispatch,
        rates,
        telegram,
        recorder: recorder.clone(),
    };
    let socket_path = args.admin_socket.clone();
    let admin_task = task::spawn(async move {
        let handler = move |req| {
            let context = context.clone();
            async move { context.handle(req).await }
        };
        if let Err(err) = run_server(&socket_path, handler).await {
            tracing::error!(error = ?err, "admin ipc server failed");
        }
    });

    info!(
        run_id = %run_id,
        sqlite = %args.sqlite_path,
        admin_socket = %args.admin_socket,
        metrics_addr = %args.metrics_addr,
        "ready"
    );
    recorder
        .record_incident("info", "ready", "offerd booted and ready")
        .await;

    tokio::signal::ctrl_c().await?;
    info!(run_id = %run_id, "shutdown requested");
    let _ = shutdown_tx.send(true);
    admin_task.abort();

    let drain = async {
        let _ = poller_task.await;
        let _ = rate_task.await;
        let _ = persist_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("background tasks did not stop in time");
    }
    dispatch_task.abort();
    recorder
        .record_incident("info", "shutdown", "offerd stopped")
        .await;
    let _ = fs::remove_file(&args.admin_socket);
    info!(run_id = %run_id, "stopped");
    Ok(())
}
