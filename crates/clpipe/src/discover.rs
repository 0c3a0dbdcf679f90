//! Platform and device enumeration with a printable summary.

use opencl3::{
    device::{
        Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
        CL_DEVICE_TYPE_CUSTOM, CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
    },
    error_codes::{ClError as RuntimeError, CL_DEVICE_NOT_FOUND},
    platform::{get_platforms, Platform},
    types::{cl_device_id, cl_device_type},
};
use std::fmt;
use tracing::debug;

use crate::ClError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub extensions: String,
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: DeviceTypes,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub driver_version: String,
    pub vendor_id: u32,
    pub max_compute_units: u32,
}

/// `CL_DEVICE_TYPE_*` bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTypes(pub cl_device_type);

impl fmt::Display for DeviceTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(cl_device_type, &str); 5] = [
            (CL_DEVICE_TYPE_DEFAULT, "DEFAULT "),
            (CL_DEVICE_TYPE_CPU, "CPU "),
            (CL_DEVICE_TYPE_GPU, "GPU "),
            (CL_DEVICE_TYPE_ACCELERATOR, "ACCELERATOR "),
            (CL_DEVICE_TYPE_CUSTOM, "CUSTOM "),
        ];
        for (bit, name) in NAMES {
            if self.0 & bit != 0 {
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

impl DeviceInfo {
    fn query(device: &Device) -> Result<Self, ClError> {
        Ok(Self {
            device_type: DeviceTypes(device.dev_type()?),
            name: device.name()?,
            vendor: device.vendor()?,
            version: device.version()?,
            profile: device.profile()?,
            driver_version: device.driver_version()?,
            vendor_id: device.vendor_id()?,
            max_compute_units: device.max_compute_units()?,
        })
    }
}

/// CL_DEVICE_NOT_FOUND is an empty platform, anything else is an error.
fn device_ids(res: Result<Vec<cl_device_id>, RuntimeError>) -> Result<Vec<cl_device_id>, ClError> {
    match res {
        Ok(ids) => Ok(ids),
        Err(e) if e.0 == CL_DEVICE_NOT_FOUND => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

impl PlatformInfo {
    fn query(platform: &Platform) -> Result<Self, ClError> {
        let ids = device_ids(platform.get_devices(CL_DEVICE_TYPE_ALL))?;
        let devices = ids
            .into_iter()
            .map(|id| DeviceInfo::query(&Device::new(id)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: platform.name()?,
            vendor: platform.vendor()?,
            version: platform.version()?,
            profile: platform.profile()?,
            extensions: platform.extensions()?,
            devices,
        })
    }
}

/// Every platform with every device it exposes.
pub fn platforms() -> Result<Vec<PlatformInfo>, ClError> {
    let platforms = get_platforms().map_err(|e| {
        debug!(code = e.0, "platform enumeration failed");
        ClError::NoPlatformFound
    })?;
    platforms.iter().map(PlatformInfo::query).collect()
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tName:           {}", self.name)?;
        writeln!(f, "\tVendor:         {}", self.vendor)?;
        writeln!(f, "\tDriver Version: {}", self.version)?;
        writeln!(f, "\tProfile:        {}", self.profile)?;
        writeln!(f, "\tExtensions:     {}", self.extensions)?;
        for (i, d) in self.devices.iter().enumerate() {
            writeln!(f, "Device[{i}]:")?;
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tType:           {}", self.device_type)?;
        writeln!(f, "\tName:           {}", self.name)?;
        writeln!(f, "\tVendor:         {}", self.vendor)?;
        writeln!(f, "\tDevice Version: {}", self.version)?;
        writeln!(f, "\tDevice Profile: {}", self.profile)?;
        writeln!(f, "\tDriver Version: {}", self.driver_version)?;
        writeln!(f, "\tVendor ID:      {}", self.vendor_id)?;
        writeln!(f, "\tMax Compute Units: {}", self.max_compute_units)
    }
}

pub fn render_summary(platforms: &[PlatformInfo]) -> String {
    let mut out = format!("Enumerated {} platforms.\n\n", platforms.len());
    for (i, p) in platforms.iter().enumerate() {
        out.push_str(&format!("Platform[{i}]:\n{p}\n"));
    }
    out.push_str("Done.\n");
    out
}
