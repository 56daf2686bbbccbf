// Fretboard Trainer Core - pitch/chord detection and rhythmic judging
// Tick-driven pipeline: detection, fusion, timeline judging

// Module declarations
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod session;

/// Install a stderr fmt subscriber for binaries and tools
///
/// Safe to call more than once; only the first call installs anything.
/// `log` records from the config loader are bridged into the subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        tracing::info!("[Test] logging initialised");
    }
}
