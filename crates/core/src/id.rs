use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Longest device identifier accepted from the environment.
pub const MAX_DEVICE_ID_LEN: usize = 64;

/// Opaque identifier of an end device, as reported by the simulated environment.
///
/// Must be non-empty and free of commas and whitespace so it can travel
/// inside a comma-delimited wire message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty()
            || raw.len() > MAX_DEVICE_ID_LEN
            || raw.chars().any(|c| c == ',' || c.is_whitespace() || c.is_control())
        {
            return Err(CoreError::InvalidDeviceId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one transport connection from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex: String = self.0.as_bytes()[..4]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        write!(f, "sess:{}", hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_accepts_plain_tokens() {
        let id: DeviceId = "ed-17".parse().unwrap();
        assert_eq!(id.as_str(), "ed-17");
        assert_eq!(id.to_string(), "ed-17");
    }

    #[test]
    fn test_device_id_rejects_delimiters() {
        assert!(DeviceId::new("").is_err());
        assert!(DeviceId::new("a,b").is_err());
        assert!(DeviceId::new("a b").is_err());
        assert!(DeviceId::new("x".repeat(MAX_DEVICE_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_session_id_generation() {
        let s1 = SessionId::generate();
        let s2 = SessionId::generate();
        assert_ne!(s1, s2);
        assert!(s1.to_string().starts_with("sess:"));
    }

    #[test]
    fn test_session_id_from_bytes() {
        let bytes = [7u8; 16];
        let id = SessionId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }
}
