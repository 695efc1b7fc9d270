// Scan-result filtering
//
// Sub-threshold and unidentified devices are silently dropped from the
// result set, not returned with a warning. Advertisements without a vendor
// payload are rejected outright: a bare advertisement carrying the right
// name is exactly what an impersonating device would broadcast.

use crate::gatt::SERVICE_UUID;
use crate::transport::Advertisement;
use tracing::debug;

/// Filtering policy applied to raw scan results
#[derive(Debug, Clone)]
pub struct ScanFilter {
    /// Minimum acceptable signal strength, dBm
    pub min_rssi_dbm: i8,
    /// Required service UUID
    pub service_uuid: u16,
    /// Required advertised-name prefix
    pub name_prefix: String,
}

impl ScanFilter {
    pub fn new(min_rssi_dbm: i8, name_prefix: impl Into<String>) -> Self {
        Self {
            min_rssi_dbm,
            service_uuid: SERVICE_UUID,
            name_prefix: name_prefix.into(),
        }
    }

    /// Whether a single advertisement passes the policy
    pub fn accepts(&self, advertisement: &Advertisement) -> bool {
        advertisement.connectable
            && advertisement.rssi_dbm >= self.min_rssi_dbm
            && advertisement.service_uuid == self.service_uuid
            && advertisement.name.starts_with(&self.name_prefix)
            && advertisement.vendor.is_some()
    }

    /// Filter a scan window's results
    pub fn filter(&self, results: Vec<Advertisement>) -> Vec<Advertisement> {
        let total = results.len();
        let accepted: Vec<Advertisement> =
            results.into_iter().filter(|adv| self.accepts(adv)).collect();
        debug!(
            "scan filter kept {} of {} advertisements",
            accepted.len(),
            total
        );
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CashLevel, TerminalStatus, VendorPayload};

    fn advertisement(name: &str, rssi_dbm: i8, vendor: bool) -> Advertisement {
        Advertisement {
            service_uuid: SERVICE_UUID,
            name: name.to_string(),
            address: format!("addr-{}", name),
            rssi_dbm,
            connectable: true,
            vendor: vendor.then_some(VendorPayload {
                device_type: 0x01,
                capabilities: 0x0003,
                status: TerminalStatus::InService,
                cash_level: CashLevel::High,
            }),
        }
    }

    #[test]
    fn test_rssi_threshold_drops_silently() {
        let filter = ScanFilter::new(-70, "VAULT");
        let results = filter.filter(vec![
            advertisement("VAULT-001", -65, true),
            advertisement("VAULT-002", -72, true),
            advertisement("VAULT-003", -85, true),
        ]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "VAULT-001");
    }

    #[test]
    fn test_boundary_rssi_is_accepted() {
        let filter = ScanFilter::new(-70, "VAULT");
        assert!(filter.accepts(&advertisement("VAULT-001", -70, true)));
        assert!(!filter.accepts(&advertisement("VAULT-001", -71, true)));
    }

    #[test]
    fn test_missing_vendor_payload_rejected() {
        let filter = ScanFilter::new(-70, "VAULT");
        assert!(!filter.accepts(&advertisement("VAULT-001", -50, false)));
    }

    #[test]
    fn test_foreign_name_rejected() {
        let filter = ScanFilter::new(-70, "VAULT");
        assert!(!filter.accepts(&advertisement("KIOSK-001", -50, true)));
    }

    #[test]
    fn test_foreign_service_rejected() {
        let filter = ScanFilter::new(-70, "VAULT");
        let mut adv = advertisement("VAULT-001", -50, true);
        adv.service_uuid = 0x1234;
        assert!(!filter.accepts(&adv));
    }

    #[test]
    fn test_non_connectable_rejected() {
        let filter = ScanFilter::new(-70, "VAULT");
        let mut adv = advertisement("VAULT-001", -50, true);
        adv.connectable = false;
        assert!(!filter.accepts(&adv));
    }
}
