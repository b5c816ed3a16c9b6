use anyhow::Result;
use candle_core::Device;
use tracing::info;

/// Pick the device everything runs on: the first GPU if there is one, else the CPU.
pub fn select_device(force_cpu: bool, silent: bool) -> Result<Device> {
    let device = if force_cpu {
        Device::Cpu
    } else {
        accelerator()?
    };
    if !silent {
        info!("using device {:?}.", device.location());
    }
    Ok(device)
}

#[cfg(feature = "metal")]
fn accelerator() -> Result<Device> {
    Ok(Device::new_metal(0)?)
}

#[cfg(not(feature = "metal"))]
fn accelerator() -> Result<Device> {
    Ok(Device::cuda_if_available(0)?)
}
