use parking_node::api::{self, ApiState};
use parking_node::clock::SystemClock;
use parking_node::config::{self, Config};
use parking_node::control::{
    ControlLoop, FastCadence, SamplingHandle, spawn_fast_cadence_thread,
};
use parking_node::detector::ParkingDetector;
use parking_node::indicator::Indicator;
use parking_node::radio::udp::UdpTransmitter;
use parking_node::radio::{LogTransmitter, Transmitter};
use parking_node::sensor::Magnetometer;
use parking_node::state::NodeState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

type BoxedMagnetometer = Box<dyn Magnetometer + Send>;
type BoxedTransmitter = Box<dyn Transmitter + Send>;
type BoxedIndicator = Box<dyn Indicator + Send>;

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        name = %config.app.name,
        "parking-node starting"
    );

    let state = Arc::new(RwLock::new(NodeState::new()));
    let detector = ParkingDetector::new(
        open_magnetometer(&config),
        open_transmitter(&config),
        open_indicator(&config),
        config.detector_settings(),
        config.detector_timing(),
    );
    let sampler = SamplingHandle::new(detector);
    let mut control = ControlLoop::new(
        SystemClock,
        config.schedule_advisor()?,
        sampler.clone(),
        Arc::clone(&state),
        config.fallback_sleep(),
    );

    // Calibration failure means the node cannot detect anything; stop here.
    let baseline = control.startup()?;
    tracing::info!(x = baseline.x, y = baseline.y, z = baseline.z, "Node calibrated");

    let stop = Arc::new(AtomicBool::new(false));
    let fast_cadence = Arc::new(FastCadence::new(
        config.fast_cadence_interval(),
        config.fast_cadence_timeout(),
    ));
    let _fast_cadence_handle = spawn_fast_cadence_thread(
        Arc::clone(&fast_cadence),
        sampler,
        Arc::clone(&state),
        Arc::clone(&stop),
    );

    let loop_stop = Arc::clone(&stop);
    let control_handle = std::thread::spawn(move || control.run(&loop_stop));

    match config.server_port() {
        Some(port) => {
            let app = api::router(ApiState {
                node: Arc::clone(&state),
                fast_cadence,
            });
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "Status API listening");
            axum::serve(listener, app).await?;
        }
        None => {
            tracing::info!("Status API disabled");
            match tokio::task::spawn_blocking(move || control_handle.join()).await {
                Ok(Ok(())) => tracing::info!("Control loop exited"),
                Ok(Err(_)) => tracing::error!("Control loop thread panicked"),
                Err(err) => tracing::error!(error = %err, "Failed to join control loop thread"),
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    Ok(())
}

fn open_transmitter(config: &Config) -> BoxedTransmitter {
    match config.concentrator() {
        Some(concentrator) => match UdpTransmitter::new(concentrator) {
            Ok(transmitter) => {
                tracing::info!(%concentrator, "Reporting to UDP concentrator");
                Box::new(transmitter)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to open UDP transport, logging reports only");
                Box::new(LogTransmitter)
            }
        },
        None => {
            tracing::info!("No concentrator configured, logging reports only");
            Box::new(LogTransmitter)
        }
    }
}

fn open_magnetometer(config: &Config) -> BoxedMagnetometer {
    #[cfg(target_os = "linux")]
    {
        use parking_node::sensor::qmc5883l::{DEFAULT_I2C_ADDRESS_7BIT, Qmc5883l};

        let address = config
            .magnetometer_address()
            .unwrap_or(DEFAULT_I2C_ADDRESS_7BIT);
        tracing::info!(
            bus = config.i2c_bus(),
            address = format_args!("{address:#04x}"),
            "Using QMC5883L magnetometer"
        );
        Box::new(Qmc5883l::new(config.i2c_bus(), address))
    }

    #[cfg(not(target_os = "linux"))]
    {
        use parking_node::sensor::MagVector;
        use parking_node::sensor::mock::MockMagnetometer;

        let _ = config;
        tracing::warn!("Magnetometer requires Linux/Raspberry Pi - using a simulated sensor");
        Box::new(MockMagnetometer::resting_at(MagVector::default()))
    }
}

fn open_indicator(config: &Config) -> BoxedIndicator {
    #[cfg(target_os = "linux")]
    {
        use parking_node::indicator::gpio::GpioIndicator;

        let (activity_pin, parking_state_pin) = config.indicator_pins();
        match GpioIndicator::new(activity_pin, parking_state_pin) {
            Ok(indicator) => Box::new(indicator),
            Err(err) => {
                tracing::warn!(error = %err, "Indicator LEDs unavailable");
                Box::new(parking_node::indicator::NullIndicator)
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Box::new(parking_node::indicator::NullIndicator)
    }
}
