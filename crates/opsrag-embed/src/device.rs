use candle_core::Device;
use tracing::info;

/// Metal when the crate is built with the `metal` feature and a GPU is
/// present, CPU otherwise.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    match Device::new_metal(0) {
        Ok(device) => {
            info!(backend = "metal", "inference device selected");
            return device;
        }
        Err(e) => tracing::warn!(error = %e, "metal unavailable, using CPU"),
    }
    info!(backend = "cpu", "inference device selected");
    Device::Cpu
}
