//! Known reader hardware and discovery.

pub mod discovery;
pub mod registry;

pub use discovery::{DeviceCandidate, find_device, has_permission, scan, select_interface};
pub use registry::{DeviceDescriptor, DeviceType, REGISTRY, lookup};
