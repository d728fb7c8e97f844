use anyhow::Context;
use clap::Parser;
use flux_config::{validate_config, ConfigLoader, GlobalConfig, StaticConfigProvider};
use flux_logging::{init_logging, LoggingOptions};
use flux_shutdown::{ShutdownCoordinator, SignalHandler};
use flux_stream::{RtspTransport, StreamEvent, StreamStateManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "FLUX NVR stream ingest daemon")]
struct Args {
    /// 配置目录（global.toml 与 streams/*.toml）
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,

    /// 覆盖配置中的日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 覆盖配置中的日志格式（pretty / json）
    #[arg(long)]
    log_format: Option<String>,

    /// 只校验配置后退出
    #[arg(long)]
    check: bool,
}

fn load_config(args: &Args) -> anyhow::Result<GlobalConfig> {
    let loader = ConfigLoader::new(&args.config_dir);
    let mut config = loader
        .load_global()
        .with_context(|| format!("Failed to load config from {}", args.config_dir.display()))?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

/// 把流事件转成日志
async fn log_events(mut rx: broadcast::Receiver<StreamEvent>) {
    loop {
        match rx.recv().await {
            Ok(StreamEvent::Error {
                stream,
                code,
                message,
                recoverable: false,
            }) => {
                error!(stream = %stream, code, reason = %message, "Stream failed");
            }
            Ok(StreamEvent::WatchdogRestart { stream, restarts }) => {
                warn!(stream = %stream, restarts, "Stream restarted by watchdog");
            }
            Ok(event) => debug!(stream = %event.stream(), event = ?event, "Stream event"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let logging = LoggingOptions::new(config.logging.level.clone(), &config.logging.format)?;
    init_logging(&logging)?;

    if args.check {
        info!(streams = config.streams.len(), "Configuration is valid");
        return Ok(());
    }

    info!(
        name = %config.system.name,
        version = %config.system.version,
        streams = config.streams.len(),
        "Starting NVR ingest daemon"
    );

    let coordinator = ShutdownCoordinator::new();
    let (signals, _) = SignalHandler::new();
    let signals = signals.with_coordinator(coordinator.clone());

    let manager = StreamStateManager::builder(Arc::new(RtspTransport::new()))
        .with_coordinator(coordinator.clone())
        .with_ingest_config(config.ingest.clone())
        .build();
    let event_logger = tokio::spawn(log_events(manager.subscribe()));

    let provider = StaticConfigProvider::new(config.streams.clone());
    let started = manager.sync_from_provider(&provider, true)?;
    info!(
        registered = manager.count(),
        started = started.len(),
        "Streams loaded"
    );

    let watchdog = manager.spawn_watchdog();

    let signal = signals.wait_for_system_signal().await?;
    info!(signal = ?signal, "Shutting down");

    let failed = manager.shutdown_all().await;
    if failed > 0 {
        warn!(failed, "Some streams did not stop cleanly");
    }

    let grace = config.ingest.lifecycle.stop_timeout() + config.ingest.lifecycle.writer_grace();
    if !coordinator.wait_for_all_stopped(grace).await {
        warn!(pending = coordinator.pending_count(), "Components still running at exit");
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), watchdog).await;
    event_logger.abort();
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args_for(dir: &TempDir) -> Args {
        Args::parse_from([
            "flux-nvrd",
            "--config-dir",
            dir.path().to_str().unwrap(),
            "--log-format",
            "json",
        ])
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["flux-nvrd"]);
        assert_eq!(args.config_dir, PathBuf::from("./config"));
        assert!(args.log_level.is_none());
        assert!(!args.check);
    }

    #[test]
    fn test_load_config_with_stream_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("global.toml"),
            "[logging]\nlevel = \"debug\"\n\n[ingest.reconnect]\nbase_delay_ms = 250\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("streams")).unwrap();
        fs::write(
            dir.path().join("streams/front.toml"),
            "name = \"front\"\nurl = \"rtsp://192.168.1.20/stream1\"\n",
        )
        .unwrap();

        let config = load_config(&args_for(&dir)).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.ingest.reconnect.base_delay_ms, 250);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].name, "front");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("global.toml"),
            "[ingest.distributor]\ncapacity = 0\n",
        )
        .unwrap();

        assert!(load_config(&args_for(&dir)).is_err());
    }
}
