use std::fmt::{self, Display};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, ErrorKind};

pub type AmsPort = u16;
pub type InvokeId = u32;
pub type IndexGroup = u32;
pub type IndexOffset = u32;
pub type NotificationHandle = u32;

/// Six-octet AMS address, written `a.b.c.d.e.f`.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct AmsNetId(pub [u8; 6]);

impl AmsNetId {
    /// The conventional NetId for a host: its IPv4 address followed by `.1.1`.
    pub fn from_ipv4(ip: Ipv4Addr) -> Self {
        let [a, b, c, d] = ip.octets();
        AmsNetId([a, b, c, d, 1, 1])
    }
}

impl Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{}.{}.{}.{}.{}.{}", a, b, c, d, e, g)
    }
}

impl FromStr for AmsNetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::from(ErrorKind::InvalidNetId(s.to_string()));

        let mut octets = [0; 6];
        let mut parts = s.trim().split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            *octet = part.parse().map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(AmsNetId(octets))
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct AmsAddr {
    pub net_id: AmsNetId,
    pub port: AmsPort,
}

impl AmsAddr {
    pub fn new(net_id: AmsNetId, port: AmsPort) -> Self {
        Self { net_id, port }
    }
}

impl Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
    pub name: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AdsState {
    pub ads_state: u16,
    pub device_state: u16,
}

/// When the device should generate notifications.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransmissionMode {
    NoTransmission,
    ClientCycle,
    ClientOnChange,
    ServerCycle,
    ServerOnChange,
}

impl From<TransmissionMode> for u32 {
    fn from(mode: TransmissionMode) -> u32 {
        match mode {
            TransmissionMode::NoTransmission => 0,
            TransmissionMode::ClientCycle => 1,
            TransmissionMode::ClientOnChange => 2,
            TransmissionMode::ServerCycle => 3,
            TransmissionMode::ServerOnChange => 4,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct NotificationAttributes {
    pub length: u32,
    pub transmission_mode: TransmissionMode,
    pub max_delay: Duration,
    pub cycle_time: Duration,
}

/// Symbol description returned by `SYM_INFOBYNAMEEX`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolInfo {
    pub index_group: IndexGroup,
    pub index_offset: IndexOffset,
    pub size: u32,
    pub data_type: u32,
    pub flags: u32,
    pub name: String,
    pub type_name: String,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_net_id() {
        let net_id: AmsNetId = "10.0.0.5.1.1".parse().unwrap();
        assert_eq!(net_id, AmsNetId([10, 0, 0, 5, 1, 1]));
        assert_eq!(net_id.to_string(), "10.0.0.5.1.1");
    }

    #[test]
    fn rejects_malformed_net_ids() {
        for bad in ["", "10.0.0.5.1", "10.0.0.5.1.1.1", "10.0.0.256.1.1", "a.b.c.d.e.f"] {
            assert!(bad.parse::<AmsNetId>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn derives_net_id_from_ipv4() {
        let net_id = AmsNetId::from_ipv4(Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(net_id.to_string(), "192.168.1.42.1.1");
    }
}
