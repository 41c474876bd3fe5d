use crate::backend::ComputeBackend;
use gridprim_common::hash::StableHasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// Optional device capabilities that change which element types can be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceFeature {
    /// Individual bytes and 16-bit words can be stored without touching neighbours.
    ByteAddressableStore,
    /// Half precision arithmetic.
    Fp16,
    /// Double precision arithmetic.
    Fp64,
}

/// The category of a compute device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// A discrete or integrated GPU.
    #[default]
    Gpu,
    /// A CPU exposed through the compute API.
    Cpu,
    /// Any other accelerator.
    Accelerator,
}

/// Capability attributes of a device, as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Device name.
    pub name: String,
    /// Vendor name.
    pub vendor: String,
    /// Numeric vendor identifier.
    pub vendor_id: u32,
    /// Name of the platform exposing the device.
    pub platform_name: String,
    /// Driver version string.
    pub driver_version: String,
    /// Device category.
    pub kind: DeviceKind,
    /// Number of compute units.
    pub compute_units: u32,
    /// Largest work group size a kernel can be launched with.
    pub max_work_group_size: usize,
    /// Local (shared) memory available to a work group, in bytes.
    pub local_mem_size: usize,
    /// Number of work items that access memory together.
    pub warp_size_mem: usize,
    /// Number of work items scheduled together.
    pub warp_size_schedule: usize,
    /// Optional features.
    pub features: BTreeSet<DeviceFeature>,
}

impl DeviceProperties {
    /// Check if the provided [feature](DeviceFeature) is supported by the device.
    pub fn feature_enabled(&self, feature: DeviceFeature) -> bool {
        self.features.contains(&feature)
    }

    /// Register a [feature](DeviceFeature) supported by the device.
    pub fn register_feature(&mut self, feature: DeviceFeature) -> bool {
        self.features.insert(feature)
    }

    /// Compute the fingerprint of these properties.
    pub fn fingerprint(&self) -> DeviceFingerprint {
        DeviceFingerprint {
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            vendor_id: self.vendor_id,
            platform_name: self.platform_name.clone(),
            driver_version: self.driver_version.clone(),
            kind: self.kind,
            compute_units: self.compute_units,
            max_work_group_size: self.max_work_group_size,
            local_mem_size: self.local_mem_size,
            features: self.features.iter().copied().collect(),
        }
    }
}

/// Stable identity of a device for tuning purposes.
///
/// Two devices with the same fingerprint are considered interchangeable: parameters tuned on
/// one are reused on the other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    name: String,
    vendor: String,
    vendor_id: u32,
    platform_name: String,
    driver_version: String,
    kind: DeviceKind,
    compute_units: u32,
    max_work_group_size: usize,
    local_mem_size: usize,
    features: Vec<DeviceFeature>,
}

impl DeviceFingerprint {
    /// The device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The driver version.
    pub fn driver_version(&self) -> &str {
        &self.driver_version
    }

    /// Hex digest of the fingerprint, suitable as a directory name.
    pub fn digest(&self) -> String {
        let mut hasher = StableHasher::new();
        for part in [
            self.name.as_str(),
            self.vendor.as_str(),
            self.platform_name.as_str(),
            self.driver_version.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&self.vendor_id.to_le_bytes());
        hasher.update(&[self.kind as u8]);
        hasher.update(&self.compute_units.to_le_bytes());
        hasher.update(&(self.max_work_group_size as u64).to_le_bytes());
        hasher.update(&(self.local_mem_size as u64).to_le_bytes());
        for feature in self.features.iter() {
            hasher.update(&[*feature as u8]);
        }

        format!("{:032x}", hasher.finalize())
    }
}

impl core::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let Self {
            name,
            platform_name,
            driver_version,
            ..
        } = self;
        write!(f, "{name} ({platform_name}, {driver_version})")
    }
}

/// Handle to a device of a [backend](ComputeBackend).
///
/// The properties are queried once when the handle is created and the fingerprint is derived
/// lazily, then shared by every clone of the handle.
#[derive(Debug)]
pub struct ComputeDevice<B: ComputeBackend> {
    backend: Arc<B>,
    properties: Arc<DeviceProperties>,
    fingerprint: Arc<OnceLock<DeviceFingerprint>>,
}

impl<B: ComputeBackend> Clone for ComputeDevice<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            properties: self.properties.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl<B: ComputeBackend> ComputeDevice<B> {
    /// Create a device handle owning the backend.
    pub fn new(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Create a device handle from a shared backend.
    pub fn from_arc(backend: Arc<B>) -> Self {
        let properties = Arc::new(backend.properties());

        Self {
            backend,
            properties,
            fingerprint: Arc::new(OnceLock::new()),
        }
    }

    /// The backend driving the device.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The device properties.
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    /// The device fingerprint.
    pub fn fingerprint(&self) -> &DeviceFingerprint {
        self.fingerprint.get_or_init(|| self.properties.fingerprint())
    }
}
