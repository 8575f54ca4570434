//! Machine identity used to key the protected store
//!
//! The identifier bytes are held through the secrecy crate so they never show
//! up in debug output and are zeroized when dropped.

use crate::error::ProtectedDataError;
use log::debug;
use secrecy::{ExposeSecret, Secret, Zeroize};
use std::fmt;
use std::fs;

const MACHINE_ID_SOURCES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

struct MachineIdBytes {
    bytes: Vec<u8>,
}

impl Zeroize for MachineIdBytes {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

/// Per-machine secret bytes
pub struct MachineId {
    id: Secret<MachineIdBytes>,
}

impl MachineId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, ProtectedDataError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ProtectedDataError::MachineId(
                "machine identifier is empty".to_string(),
            ));
        }
        Ok(Self {
            id: Secret::new(MachineIdBytes { bytes }),
        })
    }

    pub fn from_hex(hex_id: &str) -> Result<Self, ProtectedDataError> {
        let bytes = hex::decode(hex_id.trim())
            .map_err(|e| ProtectedDataError::MachineId(format!("invalid hex identifier: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Reads the host's machine id from the systemd / dbus locations
    pub fn detect() -> Result<Self, ProtectedDataError> {
        for source in MACHINE_ID_SOURCES {
            if let Ok(contents) = fs::read_to_string(source) {
                if let Ok(id) = Self::from_hex(&contents) {
                    debug!("Machine id read from {}", source);
                    return Ok(id);
                }
            }
        }
        Err(ProtectedDataError::MachineId(
            "no machine id found; set [machine] id in the configuration".to_string(),
        ))
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.id.expose_secret().bytes
    }

    /// XORs `data` in place with the identifier repeated over its length
    pub(crate) fn xor_in_place(&self, data: &mut [u8]) {
        let key = self.expose();
        for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
            *byte ^= k;
        }
    }
}

impl fmt::Debug for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineId")
            .field("id", &"<redacted>")
            .finish()
    }
}
