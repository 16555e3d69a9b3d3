use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::common::SimulationError;

/// Vendor prefix shared by every simulated device.
pub const MAC_PREFIX: [u8; 3] = [0xab, 0xcd, 0xef];

pub const NAME_PREFIX: &str = "GPS:No Station-";

/// Six-octet hardware address, rendered as colon-separated lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let [a, b, c] = MAC_PREFIX;
        Self([a, b, c, rng.gen(), rng.gen(), rng.gen()])
    }

    /// Station name derived from the device-specific half of the address.
    pub fn station_name(&self) -> String {
        format!(
            "{}{:02x}{:02x}{:02x}",
            NAME_PREFIX, self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SimulationError::Persistence(format!("Invalid MAC address: {}", s));

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = SimulationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// Topic-safe form of a device name: spaces become `_`, colons are dropped.
pub fn topic_name(name: &str) -> String {
    name.replace(' ', "_").replace(':', "")
}
