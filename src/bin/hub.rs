use std::sync::Arc;

use clap::Parser;
use fleetwatch::{
    actors::MonitorHandle,
    bus::Notification,
    channel::ChannelManager,
    config::read_config_file,
    upstream::{EnterpriseApi, HttpEnterpriseApi},
    util,
};
use tracing::{debug, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetwatch", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let upstream: Option<Arc<dyn EnterpriseApi>> = match &config.upstream {
        Some(upstream) => {
            let token = upstream.token.clone().or_else(util::get_secret);
            Some(Arc::new(HttpEnterpriseApi::new(&upstream.base_url, token)))
        }
        None => util::get_upstream_url().map(|url| {
            Arc::new(HttpEnterpriseApi::new(url, util::get_secret())) as Arc<dyn EnterpriseApi>
        }),
    };

    let mut manager = ChannelManager::websocket();
    let events = manager.events();

    // the first configured channel carries the telemetry the monitor
    // consumes and the commands it sends
    let mut handles = Vec::new();
    for channel in &config.channels {
        debug!("connecting channel {} to {}", channel.id, channel.url);
        handles.push(manager.connect(&channel.id, channel.options()).await);
    }
    let primary = handles
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no channels configured"))?;

    let monitor = MonitorHandle::spawn(config.monitor_settings(), primary, events, upstream);

    let mut notifications = monitor.notifications();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            if let Notification::AlertRaised { alert } = notification {
                warn!(
                    "[{:?}] {} {}: {}",
                    alert.severity,
                    alert.rule.as_str(),
                    alert.entity_id,
                    alert.message
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    debug!("shutting down");

    monitor.shutdown().await?;
    for id in manager.channel_ids() {
        manager.disconnect(&id).await;
    }

    Ok(())
}
