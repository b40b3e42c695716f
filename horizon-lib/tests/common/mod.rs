//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use horizon_lib::command::{Command, Stage};
#[allow(unused_imports)]
pub use horizon_lib::entities::{LinePoint, LineSegment, PointOfInterest};
#[allow(unused_imports)]
pub use horizon_lib::error::{FrameError, LinkError};
#[allow(unused_imports)]
pub use horizon_lib::frame::{Frame, build_frame, parse_frame};
#[allow(unused_imports)]
pub use horizon_lib::message::Request;
#[allow(unused_imports)]
pub use horizon_lib::session::{Session, SessionConfig, SessionState};
#[allow(unused_imports)]
pub use horizon_lib::sim::{SimOptions, SimulatedDevice};
#[allow(unused_imports)]
pub use horizon_lib::Horizon;
#[allow(unused_imports)]
pub use std::sync::Arc;
#[allow(unused_imports)]
pub use std::time::Duration;

/// Session config with short timeouts so failure paths finish quickly
#[allow(dead_code)]
pub fn fast_config() -> SessionConfig {
    SessionConfig::new()
        .with_connect_timeout(Duration::from_secs(1))
        .with_write_timeout(Duration::from_millis(150))
        .with_response_timeout(Duration::from_millis(150))
}

/// Route library logs to the test harness, filtered by `RUST_LOG`
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Connect a device handle to a fresh simulator
#[allow(dead_code)]
pub async fn connect(options: SimOptions) -> (Arc<SimulatedDevice>, Horizon<SimulatedDevice>) {
    init_tracing();
    let device = Arc::new(SimulatedDevice::new(options));
    let horizon = Horizon::connect(device.clone(), fast_config())
        .await
        .expect("Failed to connect to simulated device");
    (device, horizon)
}

/// A line of `count` points with distinct coordinates
#[allow(dead_code)]
pub fn sample_line(index: u16, count: usize) -> LineSegment {
    let points = (0..count)
        .map(|i| LinePoint::new(10.0 + i as f32 * 0.5, (i % 11) as f32 * 0.1))
        .collect();
    LineSegment::from_points(index, points)
}

#[allow(dead_code)]
pub fn sample_pois() -> Vec<PointOfInterest> {
    vec![
        PointOfInterest::new("Eiger", 134.0, 3.5, 0.9, 3967.0, 21000.0),
        PointOfInterest::new("Mönch", 138.2, 3.7, 0.8, 4107.0, 22500.0),
        PointOfInterest::new("Jungfrau", 145.9, 3.9, 1.0, 4158.0, 24000.0),
    ]
}

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}
