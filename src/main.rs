//! Process entry point: loads configuration, wires the pipeline and its
//! outputs, starts the receiver and the embedded HTTP server, and tears
//! everything down in reverse order on signal.
//!
//! Startup/shutdown ordering follows `SPEC_FULL.md` §9's design notes:
//! build the metric registry, then the pipeline, then start the receiver
//! and HTTP server last; shutdown reverses that.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn, LevelFilter};
use tokio::sync::{mpsc, Notify};

use nwws_bridge::config::{Config, ConfigError, OutputKind};
use nwws_bridge::error::BridgeError;
use nwws_bridge::http;
use nwws_bridge::metrics::{MetricRegistry, MetricsCollector};
use nwws_bridge::pipeline::errors::{ErrorHandler, ErrorHandlingStrategy};
use nwws_bridge::pipeline::filters::{DuplicateFilter, TestMessageFilter};
use nwws_bridge::pipeline::outputs::{ConsoleOutput, DatabaseConfig, DatabaseOutput, MqttConfig, MqttOutput, Output};
use nwws_bridge::pipeline::transformers::{ChainTransformer, NoaaPortTransformer, UgcProvider, XmlTransformer};
use nwws_bridge::pipeline::Pipeline;
use nwws_bridge::receiver::{self, ReceiverEvent};

/// How long to let the ingest queue drain before stopping outputs on
/// shutdown. Products already in flight get a chance to reach their sinks;
/// anything still queued after this is dropped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging(level: &str) {
    let filter = match level.to_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "WARN" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    env_logger::builder()
        .filter(None, LevelFilter::Warn)
        .filter_module("nwws_bridge", filter)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => fail_before_logging(e),
    };

    init_logging(&config.log_level);
    info!("nwws-bridge starting up");

    if let Err(e) = run(config).await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

/// `Config::from_env` can fail before we know the configured log level, so
/// this path gets a bare stderr logger just for the one message.
fn fail_before_logging(e: ConfigError) -> ! {
    env_logger::builder().filter(None, LevelFilter::Error).try_init().ok();
    error!("configuration error: {e}");
    std::process::exit(1);
}

async fn run(config: Config) -> Result<(), BridgeError> {
    let registry = Arc::new(MetricRegistry::new());

    let pipeline = build_pipeline(&config, registry.clone())?;
    pipeline.start().await?;
    let pipeline = Arc::new(pipeline);

    let (queue_tx, mut queue_rx) = mpsc::channel(config.queue.capacity);
    let receiver_metrics = MetricsCollector::new(registry.clone(), "receiver");
    let mut receiver_handle = receiver::spawn(
        config.xmpp.clone(),
        queue_tx,
        config.queue.submit_timeout,
        Some(receiver_metrics),
    );

    let worker = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                if let Err(e) = pipeline.process(event).await {
                    error!("pipeline processing failed: {e}");
                }
            }
        })
    };

    // A single shutdown signal drives both the main loop and the HTTP
    // server's graceful shutdown, so an unexpected receiver exit tears down
    // the whole process instead of leaving the HTTP server waiting on a
    // Ctrl-C that will never come.
    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.notify_waiters();
        });
    }

    let http_handle = if config.metric_server.enabled {
        let addr: SocketAddr = format!("{}:{}", config.metric_server.host, config.metric_server.port)
            .parse()
            .map_err(|e| {
                BridgeError::Http(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid METRIC_HOST/METRIC_PORT: {e}"),
                ))
            })?;
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = http::serve(addr, registry, async move { shutdown.notified().await }).await {
                error!("metrics server exited with an error: {e}");
            }
        }))
    } else {
        info!("embedded HTTP server disabled (METRIC_SERVER=false)");
        None
    };

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            event = receiver_handle.recv() => match event {
                Some(ReceiverEvent::ConnectionState(state)) => info!("receiver state -> {state:?}"),
                Some(ReceiverEvent::Error(e)) => warn!("receiver error: {e}"),
                None => {
                    warn!("receiver thread exited");
                    shutdown.notify_waiters();
                    break;
                }
            },
        }
    }

    info!("shutdown requested, stopping in reverse startup order");
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }

    receiver_handle.shutdown();
    if tokio::time::timeout(DRAIN_TIMEOUT, worker).await.is_err() {
        warn!("ingest queue did not drain within {DRAIN_TIMEOUT:?}, stopping outputs anyway");
    }

    pipeline.stop().await;
    info!("nwws-bridge stopped");
    Ok(())
}

fn build_pipeline(config: &Config, registry: Arc<MetricRegistry>) -> Result<Pipeline, BridgeError> {
    let mut pipeline = Pipeline::new("nwws-bridge", ErrorHandler::new(ErrorHandlingStrategy::Continue))
        .with_metrics(MetricsCollector::new(registry, "pipeline"))
        .with_filter(Box::new(DuplicateFilter::default()))
        .with_filter(Box::new(TestMessageFilter::default()))
        .with_transformer(Box::new(ChainTransformer::new(
            "product",
            vec![
                Box::new(NoaaPortTransformer::new("noaaport", UgcProvider::empty())),
                Box::new(XmlTransformer::new("xml")),
            ],
        )));

    for kind in &config.outputs {
        let output: Box<dyn Output> = match kind {
            OutputKind::Console => Box::new(ConsoleOutput::new("console")),
            OutputKind::Mqtt => {
                let mqtt = config
                    .mqtt
                    .as_ref()
                    .expect("OUTPUTS includes mqtt, so Config::from_env populated mqtt settings");
                Box::new(MqttOutput::new(
                    "mqtt",
                    MqttConfig {
                        broker: mqtt.broker.clone(),
                        port: mqtt.port,
                        username: mqtt.username.clone(),
                        password: mqtt.password.clone(),
                        topic_prefix: mqtt.topic_prefix.clone(),
                        qos: mqtt.qos,
                        retain: false,
                        client_id: mqtt.client_id.clone(),
                    },
                ))
            }
            OutputKind::Database => {
                let database = config
                    .database
                    .as_ref()
                    .expect("OUTPUTS includes database, so Config::from_env populated database settings");
                Box::new(DatabaseOutput::new(
                    "database",
                    DatabaseConfig { url: database.url.clone() },
                ))
            }
        };
        pipeline = pipeline.with_output(output);
    }

    Ok(pipeline)
}

/// Resolves once on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
