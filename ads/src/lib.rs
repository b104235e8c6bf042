mod client;
mod errors;
mod frame;
pub mod index;
mod notify;
mod protocol;
mod types;
mod value;

#[macro_use]
extern crate log;

use std::time::Duration;

use tokio::net::TcpStream;

pub use crate::client::{Client, NotificationSink};
pub use crate::errors::{AdsError, Error, ErrorKind, Result};
pub use crate::frame::FrameError;
pub use crate::notify::{filetime_to_unix_nanos, Notification, Sample, Stamp};
pub use crate::protocol::{AmsHeader, CommandId, Packet, Request, Response, StateFlags};
pub use crate::types::{
    AdsState, AmsAddr, AmsNetId, AmsPort, DeviceInfo, IndexGroup, IndexOffset, InvokeId,
    NotificationAttributes, NotificationHandle, SymbolInfo, TransmissionMode,
};
pub use crate::value::{DecodeError, PrimitiveType, Value};

/// TCP port of the AMS router.
pub const AMS_TCP_PORT: u16 = 48898;

/// AMS port used as the source of outbound requests.
pub const DEFAULT_SOURCE_PORT: AmsPort = 32905;

/// Opens the TCP connection to an AMS router, giving up after `timeout`.
pub async fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ErrorKind::Timeout)??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub trait ReadWire: Sized {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read;
}

pub trait WriteWire {
    fn wire_len(&self) -> u32;

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write;
}

impl ReadWire for u8 {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(r.read_u8()?)
    }
}

impl WriteWire for u8 {
    fn wire_len(&self) -> u32 {
        1
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_u8(self)?;
        Ok(())
    }
}

impl ReadWire for u16 {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(r.read_u16::<LittleEndian>()?)
    }
}

impl WriteWire for u16 {
    fn wire_len(&self) -> u32 {
        2
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_u16::<LittleEndian>(self)?;
        Ok(())
    }
}

impl ReadWire for u32 {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(r.read_u32::<LittleEndian>()?)
    }
}

impl WriteWire for u32 {
    fn wire_len(&self) -> u32 {
        4
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_u32::<LittleEndian>(self)?;
        Ok(())
    }
}

impl ReadWire for u64 {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(r.read_u64::<LittleEndian>()?)
    }
}

impl WriteWire for u64 {
    fn wire_len(&self) -> u32 {
        8
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_u64::<LittleEndian>(self)?;
        Ok(())
    }
}

pub trait ReadWireExt {
    fn read_wire<T>(&mut self) -> Result<T>
    where
        T: ReadWire;
}

impl<R> ReadWireExt for R
where
    R: Read,
{
    fn read_wire<T>(&mut self) -> Result<T>
    where
        T: ReadWire,
    {
        T::read_wire(self)
    }
}

pub trait WriteWireExt {
    fn write_wire<T>(&mut self, value: T) -> Result<()>
    where
        T: WriteWire;
}

impl<W> WriteWireExt for W
where
    W: Write,
{
    fn write_wire<T>(&mut self, value: T) -> Result<()>
    where
        T: WriteWire,
    {
        value.write_wire(self)
    }
}
