//! Platform-agnostic types for BLE peripheral connection management.
//!
//! This crate provides the value types shared by the connection manager
//! (relink-core), the durable identity store (relink-store), and the CLI.
//! It has no Bluetooth dependency.
//!
//! # Features
//!
//! - Stable peripheral identifiers ([`DeviceId`])
//! - Adapter power states ([`AdapterPower`])
//! - Advertisement payloads ([`Advertisement`])
//! - Error types for parsing
//!
//! # Example
//!
//! ```
//! use relink_types::{AdapterPower, DeviceId};
//!
//! let id: DeviceId = "AA:BB:CC:DD:EE:FF".parse().unwrap();
//! assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
//! assert!(AdapterPower::PoweredOn.is_powered_on());
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{AdapterPower, Advertisement, DeviceId};

#[cfg(test)]
mod tests {
    use super::*;

    // --- DeviceId tests ---

    #[test]
    fn test_device_id_parse_trims() {
        let id = DeviceId::parse("\t11:22:33:44:55:66\n").unwrap();
        assert_eq!(id.as_str(), "11:22:33:44:55:66");
    }

    #[test]
    fn test_device_id_parse_rejects_empty() {
        assert_eq!(DeviceId::parse(""), Err(ParseError::EmptyIdentifier));
        assert_eq!(DeviceId::parse("   "), Err(ParseError::EmptyIdentifier));
    }

    #[test]
    fn test_device_id_equality_is_by_string() {
        let a = DeviceId::new("E2C5A1B0-0000-4000-8000-000000000001");
        let b: DeviceId = "E2C5A1B0-0000-4000-8000-000000000001".into();
        assert_eq!(a, b);
        assert_ne!(a, DeviceId::new("other"));
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("AA:BB");
        assert_eq!(format!("{}", id), "AA:BB");
        assert_eq!(id.clone().into_string(), "AA:BB");
    }

    // --- AdapterPower tests ---

    #[test]
    fn test_adapter_power_default_is_unknown() {
        assert_eq!(AdapterPower::default(), AdapterPower::Unknown);
    }

    #[test]
    fn test_adapter_power_predicates() {
        assert!(AdapterPower::PoweredOn.is_powered_on());
        assert!(!AdapterPower::PoweredOff.is_powered_on());
        assert!(!AdapterPower::Resetting.is_powered_on());

        assert!(AdapterPower::Unsupported.is_unavailable());
        assert!(AdapterPower::Unauthorized.is_unavailable());
        assert!(!AdapterPower::PoweredOff.is_unavailable());
    }

    #[test]
    fn test_adapter_power_display_parse_roundtrip() {
        for state in [
            AdapterPower::Unknown,
            AdapterPower::Resetting,
            AdapterPower::Unsupported,
            AdapterPower::Unauthorized,
            AdapterPower::PoweredOff,
            AdapterPower::PoweredOn,
        ] {
            let parsed: AdapterPower = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn test_adapter_power_unknown_label() {
        let err = "dimmed".parse::<AdapterPower>().unwrap_err();
        assert!(err.to_string().contains("dimmed"));
    }

    // --- Advertisement tests ---

    #[test]
    fn test_advertisement_service_lookup() {
        let service = uuid::Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
        let mut adv = Advertisement::new(Some("HRM".to_string()), Some(-60));
        assert!(!adv.advertises_service(&service));

        adv.services.push(service);
        assert!(adv.advertises_service(&service));

        let mut by_data = Advertisement::default();
        by_data.service_data.insert(service, vec![0x01]);
        assert!(by_data.advertises_service(&service));
    }

    // --- Serialization tests ---

    #[test]
    fn test_device_id_serializes_transparently() {
        let id = DeviceId::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"AA:BB:CC:DD:EE:FF\""
        );
        let back: DeviceId = serde_json::from_str("\"AA:BB:CC:DD:EE:FF\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_adapter_power_serialization() {
        assert_eq!(
            serde_json::to_string(&AdapterPower::PoweredOn).unwrap(),
            "\"powered_on\""
        );
        assert_eq!(
            serde_json::to_string(&AdapterPower::Unauthorized).unwrap(),
            "\"unauthorized\""
        );
    }
}
