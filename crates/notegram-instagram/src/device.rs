use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DEVICE_DERIVATION_CONTEXT: &str = "notegram-device-profile-v1";

/// Stable device identity presented to the platform on login.
///
/// Derived deterministically from the username so repeated logins for the
/// same account look like the same device; a changing device fingerprint is
/// one of the platform's challenge triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceProfile {
    pub device_id: String,
    pub phone_id: String,
}

impl DeviceProfile {
    pub fn for_username(username: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DEVICE_DERIVATION_CONTEXT.as_bytes());
        hasher.update(username.as_bytes());
        let digest = hasher.finalize();

        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        let device_id = format!("android-{}", &hex[..16]);
        let phone_id = format!(
            "{}-{}-{}-{}-{}",
            &hex[..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        );
        Self { device_id, phone_id }
    }
}
