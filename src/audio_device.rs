// src/audio_device.rs

use crate::error::DeviceError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

/// Names of every output device on the default host.
pub fn output_device_names() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::Config(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Finds an output device by name, or the host default when `name` is `None`.
pub fn find_output_device(name: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| DeviceError::Config(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string())),
        None => host.default_output_device().ok_or(DeviceError::NoDevice),
    }
}
