//! Static table of supported reader hardware.

use std::fmt;

/// One known VID/PID pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Hardware family this VID/PID belongs to.
    pub family: &'static str,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04X}:{:04X})",
            self.family, self.vendor_id, self.product_id
        )
    }
}

/// Every supported reader. Sibling chip revisions share a family label.
pub const REGISTRY: &[DeviceDescriptor] = &[
    DeviceDescriptor {
        vendor_id: 0x1A86,
        product_id: 0x7523,
        family: "GBxCart RW",
    },
    DeviceDescriptor {
        vendor_id: 0x1A86,
        product_id: 0x5523,
        family: "GBxCart RW",
    },
    DeviceDescriptor {
        vendor_id: 0x0483,
        product_id: 0x5740,
        family: "Joey Jr",
    },
    DeviceDescriptor {
        vendor_id: 0x1D50,
        product_id: 0x6018,
        family: "GB Operator",
    },
    DeviceDescriptor {
        vendor_id: 0x1209,
        product_id: 0x2040,
        family: "GBFlash",
    },
];

/// Find the registry entry for a VID/PID pair.
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDescriptor> {
    REGISTRY
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

/// Reader family, detected from the `RESET` identification response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    GbxCart,
    JoeyJr,
    GbOperator,
    GbFlash,
    #[default]
    Unknown,
}

impl DeviceType {
    /// Families in identification priority order.
    pub const DETECTION_ORDER: [DeviceType; 4] = [
        DeviceType::GbxCart,
        DeviceType::JoeyJr,
        DeviceType::GbOperator,
        DeviceType::GbFlash,
    ];

    /// Substring marker expected in the identification response.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            DeviceType::GbxCart => Some("GBxCart"),
            DeviceType::JoeyJr => Some("Joey"),
            DeviceType::GbOperator => Some("Operator"),
            DeviceType::GbFlash => Some("GBFlash"),
            DeviceType::Unknown => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceType::GbxCart => "GBxCart RW",
            DeviceType::JoeyJr => "Joey Jr",
            DeviceType::GbOperator => "GB Operator",
            DeviceType::GbFlash => "GBFlash",
            DeviceType::Unknown => "Unknown",
        }
    }

    /// Nominal peak throughput in bytes per second. Estimation only.
    pub fn max_throughput(&self) -> u32 {
        match self {
            DeviceType::GbxCart => 1_000_000,
            DeviceType::JoeyJr => 400_000,
            DeviceType::GbOperator => 1_500_000,
            DeviceType::GbFlash => 2_000_000,
            DeviceType::Unknown => 0,
        }
    }

    /// Map an identification response to a family. First marker in
    /// `DETECTION_ORDER` contained in the response wins.
    pub fn from_identification(response: &str) -> DeviceType {
        Self::DETECTION_ORDER
            .into_iter()
            .find(|t| t.marker().is_some_and(|m| response.contains(m)))
            .unwrap_or(DeviceType::Unknown)
    }

    /// Seconds needed to move `bytes` at nominal speed, if known.
    pub fn estimate_secs(&self, bytes: usize) -> Option<f64> {
        match self.max_throughput() {
            0 => None,
            rate => Some(bytes as f64 / rate as f64),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_pairs() {
        let ch340 = lookup(0x1A86, 0x7523).unwrap();
        let ch341 = lookup(0x1A86, 0x5523).unwrap();
        assert_eq!(ch340.family, ch341.family);
        assert!(lookup(0x1A86, 0x0001).is_none());
        assert!(lookup(0x8086, 0xE004).is_none());
    }

    #[test]
    fn test_identification_markers() {
        assert_eq!(
            DeviceType::from_identification("GBxCart RW v1.4 ready"),
            DeviceType::GbxCart
        );
        assert_eq!(
            DeviceType::from_identification("Joey Jr FW 2.1"),
            DeviceType::JoeyJr
        );
        assert_eq!(
            DeviceType::from_identification("Epilogue GB Operator"),
            DeviceType::GbOperator
        );
        assert_eq!(
            DeviceType::from_identification("GBFlash 1.2"),
            DeviceType::GbFlash
        );
        assert_eq!(DeviceType::from_identification(""), DeviceType::Unknown);
        assert_eq!(
            DeviceType::from_identification("hello"),
            DeviceType::Unknown
        );
    }

    #[test]
    fn test_identification_priority() {
        // Both markers present: declared order decides, not position or length.
        let response = "GBFlash bridge (GBxCart compatible)";
        assert_eq!(
            DeviceType::from_identification(response),
            DeviceType::GbxCart
        );
        let response = "Operator mode via Joey";
        assert_eq!(
            DeviceType::from_identification(response),
            DeviceType::JoeyJr
        );
    }

    #[test]
    fn test_estimate() {
        assert_eq!(DeviceType::Unknown.estimate_secs(1024), None);
        assert_eq!(DeviceType::GbxCart.estimate_secs(2_000_000), Some(2.0));
    }
}
