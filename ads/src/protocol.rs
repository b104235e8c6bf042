use std::convert::{TryFrom, TryInto};
use std::fmt::{self, Display};
use std::io::{Cursor, Read, Write};

use crate::index;
use crate::{
    AdsError, AdsState, AmsAddr, AmsNetId, DeviceInfo, Error, ErrorKind, IndexGroup, IndexOffset,
    InvokeId, Notification, NotificationAttributes, NotificationHandle, ReadWire, ReadWireExt,
    Result, SymbolInfo, WriteWire, WriteWireExt,
};

pub const AMS_HEADER_LEN: usize = 32;

/// Byte offset of the invoke ID within the AMS header.
const INVOKE_ID_OFFSET: usize = 28;

const DEVICE_NAME_LEN: usize = 16;
const ADD_NOTIFICATION_RESERVED_LEN: usize = 16;

impl ReadWire for AmsNetId {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let mut octets = [0; 6];
        r.read_exact(&mut octets)?;
        Ok(AmsNetId(octets))
    }
}

impl WriteWire for AmsNetId {
    fn wire_len(&self) -> u32 {
        6
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_all(&self.0)?;
        Ok(())
    }
}

impl ReadWire for AmsAddr {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let net_id = r.read_wire()?;
        let port = r.read_wire()?;
        Ok(AmsAddr { net_id, port })
    }
}

impl WriteWire for AmsAddr {
    fn wire_len(&self) -> u32 {
        8
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_wire(self.net_id)?;
        w.write_wire(self.port)?;
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandId {
    ReadDeviceInfo,
    Read,
    ReadState,
    AddDeviceNotification,
    DeleteDeviceNotification,
    DeviceNotification,
    ReadWrite,
}

impl CommandId {
    /// Whether a packet of this kind answers a request we made.
    pub fn solicited(&self) -> bool {
        !matches!(self, CommandId::DeviceNotification)
    }
}

impl From<CommandId> for u16 {
    fn from(command_id: CommandId) -> u16 {
        match command_id {
            CommandId::ReadDeviceInfo => 1,
            CommandId::Read => 2,
            CommandId::ReadState => 4,
            CommandId::AddDeviceNotification => 6,
            CommandId::DeleteDeviceNotification => 7,
            CommandId::DeviceNotification => 8,
            CommandId::ReadWrite => 9,
        }
    }
}

impl TryFrom<u16> for CommandId {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(CommandId::ReadDeviceInfo),
            2 => Ok(CommandId::Read),
            4 => Ok(CommandId::ReadState),
            6 => Ok(CommandId::AddDeviceNotification),
            7 => Ok(CommandId::DeleteDeviceNotification),
            8 => Ok(CommandId::DeviceNotification),
            9 => Ok(CommandId::ReadWrite),
            _ => Err(Error {
                kind: ErrorKind::UnsupportedCommand(value),
            }),
        }
    }
}

impl ReadWire for CommandId {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let value: u16 = r.read_wire()?;
        value.try_into()
    }
}

impl WriteWire for CommandId {
    fn wire_len(&self) -> u32 {
        2
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_wire(u16::from(self))?;
        Ok(())
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::ReadDeviceInfo => "ReadDeviceInfo",
            CommandId::Read => "Read",
            CommandId::ReadState => "ReadState",
            CommandId::AddDeviceNotification => "AddDeviceNotification",
            CommandId::DeleteDeviceNotification => "DeleteDeviceNotification",
            CommandId::DeviceNotification => "DeviceNotification",
            CommandId::ReadWrite => "ReadWrite",
        };
        write!(f, "{} ({})", name, u16::from(*self))
    }
}

pub struct StateFlags;

impl StateFlags {
    pub const REQUEST: u16 = 0x0004;
    pub const RESPONSE: u16 = 0x0005;

    const RESPONSE_BIT: u16 = 0x0001;

    pub fn is_response(flags: u16) -> bool {
        flags & Self::RESPONSE_BIT != 0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AmsHeader {
    pub target: AmsAddr,
    pub source: AmsAddr,
    pub command_id: CommandId,
    pub state_flags: u16,
    pub data_length: u32,
    pub error_code: u32,
    pub invoke_id: InvokeId,
}

impl ReadWire for AmsHeader {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let target = r.read_wire()?;
        let source = r.read_wire()?;
        let command_id = r.read_wire()?;
        let state_flags = r.read_wire()?;
        let data_length = r.read_wire()?;
        let error_code = r.read_wire()?;
        let invoke_id = r.read_wire()?;

        Ok(AmsHeader {
            target,
            source,
            command_id,
            state_flags,
            data_length,
            error_code,
            invoke_id,
        })
    }
}

impl WriteWire for AmsHeader {
    fn wire_len(&self) -> u32 {
        AMS_HEADER_LEN as u32
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_wire(self.target)?;
        w.write_wire(self.source)?;
        w.write_wire(self.command_id)?;
        w.write_wire(self.state_flags)?;
        w.write_wire(self.data_length)?;
        w.write_wire(self.error_code)?;
        w.write_wire(self.invoke_id)?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum Request {
    ReadDeviceInfo,
    ReadState,
    Read {
        index_group: IndexGroup,
        index_offset: IndexOffset,
        length: u32,
    },
    ReadWrite {
        index_group: IndexGroup,
        index_offset: IndexOffset,
        read_length: u32,
        data: Vec<u8>,
    },
    AddDeviceNotification {
        index_group: IndexGroup,
        index_offset: IndexOffset,
        attributes: NotificationAttributes,
    },
    DeleteDeviceNotification {
        handle: NotificationHandle,
    },
}

impl Request {
    pub fn command_id(&self) -> CommandId {
        match self {
            Request::ReadDeviceInfo => CommandId::ReadDeviceInfo,
            Request::ReadState => CommandId::ReadState,
            Request::Read { .. } => CommandId::Read,
            Request::ReadWrite { .. } => CommandId::ReadWrite,
            Request::AddDeviceNotification { .. } => CommandId::AddDeviceNotification,
            Request::DeleteDeviceNotification { .. } => CommandId::DeleteDeviceNotification,
        }
    }

    /// Builds a `ReadWrite` that looks up a symbol by name.
    pub fn symbol_info(name: &str) -> Self {
        let mut data = Vec::with_capacity(name.len() + 1);
        data.extend_from_slice(name.as_bytes());
        data.push(0);

        Request::ReadWrite {
            index_group: index::SYM_INFOBYNAMEEX,
            index_offset: 0,
            read_length: 0xFFFF,
            data,
        }
    }

    fn payload_len(&self) -> u32 {
        match self {
            Request::ReadDeviceInfo | Request::ReadState => 0,
            Request::Read { .. } => 12,
            Request::ReadWrite { data, .. } => 16 + data.len() as u32,
            Request::AddDeviceNotification { .. } => 24 + ADD_NOTIFICATION_RESERVED_LEN as u32,
            Request::DeleteDeviceNotification { .. } => 4,
        }
    }

    fn write_payload(self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            Request::ReadDeviceInfo | Request::ReadState => {}
            Request::Read {
                index_group,
                index_offset,
                length,
            } => {
                buffer.write_wire(index_group)?;
                buffer.write_wire(index_offset)?;
                buffer.write_wire(length)?;
            }
            Request::ReadWrite {
                index_group,
                index_offset,
                read_length,
                data,
            } => {
                buffer.write_wire(index_group)?;
                buffer.write_wire(index_offset)?;
                buffer.write_wire(read_length)?;
                buffer.write_wire(data.len() as u32)?;
                buffer.extend(data);
            }
            Request::AddDeviceNotification {
                index_group,
                index_offset,
                attributes,
            } => {
                buffer.write_wire(index_group)?;
                buffer.write_wire(index_offset)?;
                buffer.write_wire(attributes.length)?;
                buffer.write_wire(u32::from(attributes.transmission_mode))?;
                buffer.write_wire(duration_millis(attributes.max_delay))?;
                buffer.write_wire(duration_millis(attributes.cycle_time))?;
                buffer.extend_from_slice(&[0; ADD_NOTIFICATION_RESERVED_LEN]);
            }
            Request::DeleteDeviceNotification { handle } => {
                buffer.write_wire(handle)?;
            }
        }

        Ok(())
    }

    /// Encodes the AMS header and ADS payload. The AMS/TCP preamble is added by the writer.
    pub fn into_frame(self, target: AmsAddr, source: AmsAddr, invoke_id: InvokeId) -> Result<Vec<u8>> {
        let data_length = self.payload_len();
        let header = AmsHeader {
            target,
            source,
            command_id: self.command_id(),
            state_flags: StateFlags::REQUEST,
            data_length,
            error_code: 0,
            invoke_id,
        };

        let mut buffer = Vec::with_capacity(AMS_HEADER_LEN + data_length as usize);
        buffer.write_wire(header)?;
        self.write_payload(&mut buffer)?;

        debug_assert_eq!(buffer.len(), AMS_HEADER_LEN + data_length as usize);
        Ok(buffer)
    }
}

fn duration_millis(duration: std::time::Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[derive(Debug)]
pub enum Response {
    ReadDeviceInfo(DeviceInfo),
    Read(Vec<u8>),
    ReadState(AdsState),
    AddDeviceNotification(NotificationHandle),
    DeleteDeviceNotification,
    ReadWrite(Vec<u8>),
}

impl Response {
    pub fn command_id(&self) -> CommandId {
        match self {
            Response::ReadDeviceInfo(_) => CommandId::ReadDeviceInfo,
            Response::Read(_) => CommandId::Read,
            Response::ReadState(_) => CommandId::ReadState,
            Response::AddDeviceNotification(_) => CommandId::AddDeviceNotification,
            Response::DeleteDeviceNotification => CommandId::DeleteDeviceNotification,
            Response::ReadWrite(_) => CommandId::ReadWrite,
        }
    }

    fn from_payload(command_id: CommandId, payload: &[u8]) -> Result<Self> {
        let mut payload = Cursor::new(payload);

        let result: u32 = payload.read_wire()?;
        if result != 0 {
            return Err(AdsError(result).into());
        }

        let response = match command_id {
            CommandId::ReadDeviceInfo => {
                let major = payload.read_wire()?;
                let minor = payload.read_wire()?;
                let build = payload.read_wire()?;
                let mut name = [0; DEVICE_NAME_LEN];
                payload.read_exact(&mut name)?;

                Response::ReadDeviceInfo(DeviceInfo {
                    major,
                    minor,
                    build,
                    name: nul_terminated(&name),
                })
            }
            CommandId::Read => Response::Read(read_data(&mut payload)?),
            CommandId::ReadState => {
                let ads_state = payload.read_wire()?;
                let device_state = payload.read_wire()?;

                Response::ReadState(AdsState {
                    ads_state,
                    device_state,
                })
            }
            CommandId::AddDeviceNotification => {
                Response::AddDeviceNotification(payload.read_wire()?)
            }
            CommandId::DeleteDeviceNotification => Response::DeleteDeviceNotification,
            CommandId::ReadWrite => Response::ReadWrite(read_data(&mut payload)?),
            CommandId::DeviceNotification => {
                return Err(Error::protocol("device notification is not a response"))
            }
        };

        Ok(response)
    }
}

fn read_data(payload: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let length: u32 = payload.read_wire()?;
    let remaining = payload.get_ref().len() - payload.position() as usize;
    if length as usize > remaining {
        return Err(Error::protocol(format!(
            "response announces {} data bytes but carries {}",
            length, remaining
        )));
    }

    let mut data = vec![0; length as usize];
    payload.read_exact(&mut data)?;
    Ok(data)
}

pub(crate) fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl ReadWire for SymbolInfo {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let _entry_length: u32 = r.read_wire()?;
        let index_group = r.read_wire()?;
        let index_offset = r.read_wire()?;
        let size = r.read_wire()?;
        let data_type = r.read_wire()?;
        let flags = r.read_wire()?;
        let name_length: u16 = r.read_wire()?;
        let type_length: u16 = r.read_wire()?;
        let comment_length: u16 = r.read_wire()?;

        let name = read_string(r, name_length)?;
        let type_name = read_string(r, type_length)?;
        let comment = read_string(r, comment_length)?;

        Ok(SymbolInfo {
            index_group,
            index_offset,
            size,
            data_type,
            flags,
            name,
            type_name,
            comment,
        })
    }
}

/// Reads a string of `len` bytes followed by its NUL terminator.
fn read_string<R>(r: &mut R, len: u16) -> Result<String>
where
    R: Read,
{
    let mut bytes = vec![0; usize::from(len) + 1];
    r.read_exact(&mut bytes)?;
    Ok(nul_terminated(&bytes))
}

/// A decoded AMS packet received from the device.
#[derive(Debug)]
pub enum Packet {
    Response {
        invoke_id: InvokeId,
        result: Result<Response>,
    },
    Notification(Notification),
}

impl Packet {
    /// Reads the invoke ID without validating the rest of the header, so that a malformed
    /// response can still be routed to its waiter.
    pub fn peek_invoke_id(frame: &[u8]) -> Option<InvokeId> {
        let bytes = frame.get(INVOKE_ID_OFFSET..INVOKE_ID_OFFSET + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Decodes a packet. Errors in the AMS header or in a notification are returned directly;
    /// errors in a response body are carried inside `Packet::Response`.
    pub fn from_frame(frame: &[u8]) -> Result<(AmsHeader, Self)> {
        let mut cursor = Cursor::new(frame);
        let header: AmsHeader = cursor.read_wire()?;

        let payload = &frame[AMS_HEADER_LEN..];
        if header.data_length as usize != payload.len() {
            return Err(Error::protocol(format!(
                "AMS header announces {} data bytes but packet carries {}",
                header.data_length,
                payload.len()
            )));
        }

        if !header.command_id.solicited() {
            let notification = Notification::from_bytes(payload)?;
            return Ok((header, Packet::Notification(notification)));
        }

        let result = if !StateFlags::is_response(header.state_flags) {
            Err(Error::protocol(format!(
                "{} arrived without the response flag",
                header.command_id
            )))
        } else if header.error_code != 0 {
            Err(AdsError(header.error_code).into())
        } else {
            Response::from_payload(header.command_id, payload)
        };

        let packet = Packet::Response {
            invoke_id: header.invoke_id,
            result,
        };
        Ok((header, packet))
    }
}
