use anyhow::{Context, Result};
use depthcam_core::{BroadcastTransport, CalibrationStore, CameraNode, Stream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod monitor;

use config::{BusMode, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("depthcamd starting");

    let config = Config::from_env();
    let settings = config.node_settings();
    let transport = Arc::new(BroadcastTransport::new());

    // Device open and calibration loading are one-shot and fail-fast.
    let node = {
        let transport = Arc::clone(&transport);
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> Result<CameraNode> {
            let device = depthcam_hw::open_device(&config.device, config.fps)
                .with_context(|| format!("could not open device '{}'", config.device))?;
            let node = CameraNode::start(
                device,
                transport.as_ref(),
                &CalibrationStore::default(),
                &settings,
            )?;
            Ok(node)
        })
        .await??
    };
    let node = Arc::new(Mutex::new(node));

    let interval = Duration::from_secs(config.stats_interval_secs.max(1));
    let monitors: Vec<_> = Stream::ALL
        .iter()
        .filter_map(|&stream| {
            let topic = config.node_settings().topic(stream);
            let rx = transport.subscribe(&topic)?;
            Some(monitor::spawn_monitor(topic, rx, interval))
        })
        .collect();

    let _connection = match config.bus {
        BusMode::Off => None,
        bus => {
            let builder = match bus {
                BusMode::System => zbus::connection::Builder::system()?,
                _ => zbus::connection::Builder::session()?,
            };
            let connection = builder
                .name(dbus_interface::BUS_NAME)?
                .serve_at(
                    dbus_interface::OBJECT_PATH,
                    dbus_interface::DepthcamService::new(Arc::clone(&node)),
                )?
                .build()
                .await
                .context("failed to register D-Bus interface")?;
            tracing::info!(bus = ?bus, name = dbus_interface::BUS_NAME, "D-Bus interface registered");
            Some(connection)
        }
    };

    tracing::info!(
        device = %config.device,
        name = %config.device_name,
        topics = ?transport.topics(),
        "depthcamd ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("depthcamd shutting down");

    for handle in &monitors {
        handle.abort();
    }
    let stop_result = match node.lock() {
        Ok(mut node) => node.stop(),
        Err(poisoned) => poisoned.into_inner().stop(),
    };
    stop_result.context("failed to stop camera")?;

    Ok(())
}
