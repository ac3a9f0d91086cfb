use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lumen_core::{Daemon, KeywordTagger, LumenConfig, StateSink};
use lumen_daemons::{
    intake_queue, load_rules, ExtensionParser, FileIntake, FolderWatcher, IntakeSender,
    MessageIntake, PulseCoordinator, StoreInjector, TriggerWatcher,
};
use lumen_memory::{
    DirSceneSource, InMemorySemanticIndex, JsonFileSink, MemoryLifecycleManager, MemorySink,
    SharedStateStore,
};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::ConsoleRouter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "LUMEN_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, env = "LUMEN_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Keep persona state in memory only (nothing is written to state_path)
    #[arg(long)]
    ephemeral: bool,
}

/// Logs go to stderr so the console keeps stdout. The returned guard must
/// live until exit or buffered file lines are lost.
fn init_logging(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lumen.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    guard
}

/// `--config`, then `./lumen.toml`, then `<config dir>/lumen/config.toml`.
fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let local = PathBuf::from("lumen.toml");
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("lumen").join("config.toml"))
        .unwrap_or(local)
}

fn log_state_event(event: &str, data: &serde_json::Value) -> anyhow::Result<()> {
    tracing::debug!("state event {}: {}", event, data);
    Ok(())
}

fn log_pulse(event: &str, data: &serde_json::Value) -> anyhow::Result<()> {
    tracing::debug!(
        "{}: mood={} mode={} scene={} memories={}",
        event,
        data["mood"],
        data["mode"],
        data["scene"],
        data["memory_count"]
    );
    Ok(())
}

/// Read console lines on a plain thread (stdin blocks) and feed them to the
/// message queue. `done` fires on EOF, `quit` or `exit`.
fn spawn_console(queue: IntakeSender<String>, done: oneshot::Sender<()>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("lumen-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed == "quit" || trimmed == "exit" {
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                if !queue.send(trimmed.to_string()) {
                    break;
                }
            }
            let _ = done.send(());
        })
        .context("Failed to start console thread")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = init_logging(args.log_json, args.log_dir.as_deref());

    info!("Initializing Lumen...");

    // 1. Config
    let config_path = resolve_config_path(args.config);
    info!("Loading config from {}...", config_path.display());
    let config = LumenConfig::load_or_default(&config_path);

    // 2. Shared state
    let sink: Arc<dyn StateSink> = if args.ephemeral {
        info!("Ephemeral mode: persona state will not be saved");
        Arc::new(MemorySink::new())
    } else {
        Arc::new(JsonFileSink::new(&config.state.state_path))
    };
    let store = Arc::new(
        SharedStateStore::open(
            sink,
            Arc::new(InMemorySemanticIndex::new()),
            Arc::new(DirSceneSource::new(&config.state.scenes_dir)),
        )
        .await,
    );
    store.register_observer(Arc::new(log_state_event)).await;

    // 3. Daemons
    let mut daemons: Vec<Arc<dyn Daemon>> = Vec::new();

    let lifecycle = Arc::new(MemoryLifecycleManager::open(&config.lifecycle).await);
    daemons.push(Arc::new(
        lifecycle.clone().spawn(config.lifecycle.sweep_interval()),
    ));

    let (message_tx, message_rx) = intake_queue::<String>();
    let messages = Arc::new(
        MessageIntake::new(
            store.clone(),
            Arc::new(ConsoleRouter::new(store.clone())),
            Arc::new(KeywordTagger),
        )
        .with_staging(lifecycle.clone())
        .with_poll_timeout(config.intake.poll_timeout())
        .with_context_limit(config.intake.background_context_limit),
    );
    daemons.push(Arc::new(messages.spawn(message_rx)));

    let (file_tx, file_rx) = intake_queue::<PathBuf>();
    let injector = StoreInjector::new(store.clone()).with_staging(lifecycle.clone());
    let files = Arc::new(
        FileIntake::new(Arc::new(ExtensionParser), Arc::new(injector))
            .with_poll_timeout(config.intake.poll_timeout()),
    );
    daemons.push(Arc::new(files.spawn(file_rx)));

    if config.intake.watch_dropzone {
        match FolderWatcher::new(&config.intake.dropzone_dir, file_tx.clone()).spawn() {
            Ok(watcher) => daemons.push(Arc::new(watcher)),
            Err(e) => warn!("Drop zone watching disabled: {:#}", e),
        }
    }

    let triggers = Arc::new(
        TriggerWatcher::new(store.clone(), load_rules(&config.triggers.rules_path))
            .with_window(config.triggers.window)
            .with_interval(config.triggers.interval()),
    );
    daemons.push(Arc::new(triggers.spawn()));

    // 4. Pulse
    let pulse = Arc::new(PulseCoordinator::new(store.clone(), &config.pulse));
    pulse.register_observer(Arc::new(log_pulse)).await;
    for daemon in &daemons {
        pulse.register_daemon(daemon.clone()).await;
    }
    pulse.start();

    // 5. Console
    let (done_tx, done_rx) = oneshot::channel();
    spawn_console(message_tx.clone(), done_tx)?;
    println!("Lumen online. Type a message or a /command; 'quit' to exit.");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Could not listen for Ctrl-C: {}", e);
            }
            info!("Ctrl-C received, shutting down");
        }
        _ = done_rx => info!("Console closed, shutting down"),
    }

    // 6. Shutdown: pulse first, then daemons in reverse start order.
    pulse.stop().await;
    message_tx.close();
    file_tx.close();
    for daemon in daemons.iter().rev() {
        daemon.stop().await;
    }
    store.save_state().await;
    info!("Lumen stopped");
    Ok(())
}
