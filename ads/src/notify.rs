//! Device notification packets.

use std::io::{Cursor, Read};

use crate::{Error, NotificationHandle, ReadWireExt, Result};

/// FILETIME ticks (100 ns) between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Converts a Windows FILETIME to nanoseconds since the Unix epoch.
pub fn filetime_to_unix_nanos(filetime: u64) -> i64 {
    let ticks = i64::try_from(filetime).unwrap_or(i64::MAX);
    (ticks - FILETIME_UNIX_EPOCH).saturating_mul(100)
}

/// One `DeviceNotification` packet: a list of stamps, each carrying samples taken at the same
/// PLC time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Notification {
    pub stamps: Vec<Stamp>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stamp {
    /// PLC time as a Windows FILETIME.
    pub timestamp: u64,
    pub samples: Vec<Sample>,
}

impl Stamp {
    pub fn unix_nanos(&self) -> i64 {
        filetime_to_unix_nanos(self.timestamp)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub handle: NotificationHandle,
    pub data: Vec<u8>,
}

impl Notification {
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(payload);

        let length: u32 = r.read_wire()?;
        let carried = payload.len() - 4;
        if length as usize != carried {
            return Err(Error::protocol(format!(
                "notification announces {} bytes but carries {}",
                length, carried
            )));
        }

        let stamp_count: u32 = r.read_wire()?;
        let mut stamps = Vec::new();
        for _ in 0..stamp_count {
            let timestamp = r.read_wire()?;
            let sample_count: u32 = r.read_wire()?;

            let mut samples = Vec::new();
            for _ in 0..sample_count {
                let handle = r.read_wire()?;
                let size: u32 = r.read_wire()?;

                let remaining = payload.len() - r.position() as usize;
                if size as usize > remaining {
                    return Err(Error::protocol(format!(
                        "sample for handle {:#x} announces {} bytes but {} remain",
                        handle, size, remaining
                    )));
                }

                let mut data = vec![0; size as usize];
                r.read_exact(&mut data)?;
                samples.push(Sample { handle, data });
            }

            stamps.push(Stamp { timestamp, samples });
        }

        Ok(Notification { stamps })
    }

    pub fn sample_count(&self) -> usize {
        self.stamps.iter().map(|stamp| stamp.samples.len()).sum()
    }
}
