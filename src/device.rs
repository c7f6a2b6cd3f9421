//! Execution targets.
//!
//! A [`Device`] identifies where an operation runs and where its result
//! tensors live. Devices are shared (`Arc`) across every handler and
//! result that references them; results hold a non-owning backreference,
//! never the other way around, so no ownership cycle can form between a
//! device and the values it produces.

use std::fmt;
use std::sync::Arc;

/// The kind of an execution target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// The host CPU.
    Host,
    /// An accelerator device.
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// An execution target: host CPU or an accelerator.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Device {
    name: String,
    kind: DeviceKind,
}

impl Device {
    /// Creates a device with the given name and kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
        })
    }

    /// Creates the default host CPU device.
    #[must_use]
    pub fn host() -> Arc<Self> {
        Self::new("cpu:0", DeviceKind::Host)
    }

    /// Returns the device name, e.g. `"cpu:0"` or `"gpu:0"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device kind.
    #[must_use]
    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}
