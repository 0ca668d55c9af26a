use log::{error, info, warn};
use time::UtcOffset;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

use envnode::bluetooth::bluez::BluezRadio;
use envnode::bluetooth::scanner::{radio_channel, ScanController};
use envnode::board::{spawn_signal_buttons, IioSensor, QueuedButtons, SysfsLink, SysfsPower};
use envnode::clock::SntpClock;
use envnode::config::NodeConfig;
use envnode::connectivity::TokioResolver;
use envnode::indicator::LedIndicator;
use envnode::mqtt::MqttTransport;
use envnode::node::{Node, Peripherals, RestartRequest};

const POLL_INTERVAL_MS: u64 = 10;
const RESTART_EXIT_CODE: i32 = 75; // EX_TEMPFAIL, the supervisor starts us again

async fn main_loop(config: NodeConfig) -> Result<RestartRequest, Box<dyn std::error::Error>> {
    info!("Starting environmental sensor node");
    let started = Instant::now();
    let now_ms = || started.elapsed().as_millis() as u64;

    let mac = config.board_mac()?;

    let (radio_tx, radio_rx) = radio_channel();
    let radio = match BluezRadio::new(radio_tx).await {
        Ok(radio) => radio,
        Err(e) => {
            error!("Failed to initialize Bluetooth: {}", e);
            return Err(e.into());
        }
    };
    let scan = ScanController::new(Box::new(radio), radio_rx);

    let (button_tx, buttons) = QueuedButtons::channel();
    if let Err(e) = spawn_signal_buttons(button_tx) {
        warn!("Button signals unavailable: {}", e);
    }

    let offset = UtcOffset::from_hms(config.utc_offset_hours, 0, 0).unwrap_or_else(|e| {
        warn!("Invalid UTC offset {}: {}", config.utc_offset_hours, e);
        UtcOffset::UTC
    });
    let peripherals = Peripherals {
        link: Box::new(SysfsLink::new(&config.interface)),
        resolver: Box::new(TokioResolver::new()),
        transport: Box::new(MqttTransport::new()),
        clock: Box::new(SntpClock::new(config.ntp_server.clone(), offset)),
        sensor: Box::new(IioSensor::new(config.local_sensor_dir.clone())),
        power: Box::new(SysfsPower {
            battery: config.power_battery_dir.clone(),
            usb: config.power_usb_dir.clone(),
            external: config.power_external_dir.clone(),
        }),
        buttons: Box::new(buttons),
        indicator: Box::new(LedIndicator::new(config.status_led.clone())),
    };

    let mut node = match Node::boot(&config, mac, scan, peripherals, now_ms()) {
        Ok(node) => node,
        Err(restart) => return Ok(restart),
    };

    let mut ticker = interval(Duration::from_millis(POLL_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Some(restart) = node.poll(now_ms()) {
            return Ok(restart);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match NodeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    // Run the node until it asks for a restart or we are told to stop
    tokio::select! {
        result = main_loop(config) => {
            match result {
                Ok(restart) => {
                    info!("Restarting ({:?}) in {:?}", restart.reason, restart.delay());
                    sleep(restart.delay()).await;
                    log::logger().flush();
                    std::process::exit(RESTART_EXIT_CODE);
                }
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
