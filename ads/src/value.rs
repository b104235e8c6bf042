//! Decoding of primitive PLC values.

use std::fmt::{self, Display};

use serde::{Serialize, Serializer};

use crate::protocol::nul_terminated;

/// ADS data type IDs (`ADST_*`) as reported in symbol information.
mod adst {
    pub const INT16: u32 = 2;
    pub const INT32: u32 = 3;
    pub const REAL32: u32 = 4;
    pub const REAL64: u32 = 5;
    pub const INT8: u32 = 16;
    pub const UINT8: u32 = 17;
    pub const UINT16: u32 = 18;
    pub const UINT32: u32 = 19;
    pub const INT64: u32 = 20;
    pub const UINT64: u32 = 21;
    pub const STRING: u32 = 30;
    pub const BIT: u32 = 33;
}

/// The primitive PLC types this crate can decode.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum PrimitiveType {
    Bool,
    /// BYTE / USINT
    USInt,
    SInt,
    /// WORD / UINT
    UInt,
    Int,
    /// DWORD / UDINT
    UDInt,
    DInt,
    /// LWORD / ULINT
    ULInt,
    LInt,
    Real,
    LReal,
    String,
    /// Milliseconds.
    Time,
    /// Milliseconds since midnight.
    TimeOfDay,
    /// Seconds since 1970-01-01.
    Date,
    /// Seconds since 1970-01-01.
    DateAndTime,
}

impl PrimitiveType {
    /// Picks the primitive type for a symbol, preferring its IEC type name and falling back to
    /// the ADS data type ID.
    pub fn resolve(type_name: &str, data_type: u32) -> Option<Self> {
        Self::from_type_name(type_name).or_else(|| Self::from_data_type(data_type))
    }

    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let name = type_name.trim().to_ascii_uppercase();
        if name == "STRING" || name.starts_with("STRING(") {
            return Some(PrimitiveType::String);
        }

        let primitive = match name.as_str() {
            "BOOL" | "BIT" => PrimitiveType::Bool,
            "BYTE" | "USINT" => PrimitiveType::USInt,
            "SINT" => PrimitiveType::SInt,
            "WORD" | "UINT" => PrimitiveType::UInt,
            "INT" => PrimitiveType::Int,
            "DWORD" | "UDINT" => PrimitiveType::UDInt,
            "DINT" => PrimitiveType::DInt,
            "LWORD" | "ULINT" => PrimitiveType::ULInt,
            "LINT" => PrimitiveType::LInt,
            "REAL" => PrimitiveType::Real,
            "LREAL" => PrimitiveType::LReal,
            "TIME" => PrimitiveType::Time,
            "TOD" | "TIME_OF_DAY" => PrimitiveType::TimeOfDay,
            "DATE" => PrimitiveType::Date,
            "DT" | "DATE_AND_TIME" => PrimitiveType::DateAndTime,
            _ => return None,
        };
        Some(primitive)
    }

    pub fn from_data_type(data_type: u32) -> Option<Self> {
        let primitive = match data_type {
            adst::BIT => PrimitiveType::Bool,
            adst::UINT8 => PrimitiveType::USInt,
            adst::INT8 => PrimitiveType::SInt,
            adst::UINT16 => PrimitiveType::UInt,
            adst::INT16 => PrimitiveType::Int,
            adst::UINT32 => PrimitiveType::UDInt,
            adst::INT32 => PrimitiveType::DInt,
            adst::UINT64 => PrimitiveType::ULInt,
            adst::INT64 => PrimitiveType::LInt,
            adst::REAL32 => PrimitiveType::Real,
            adst::REAL64 => PrimitiveType::LReal,
            adst::STRING => PrimitiveType::String,
            _ => return None,
        };
        Some(primitive)
    }

    /// Encoded width in bytes, or `None` for variable-length strings.
    pub fn width(&self) -> Option<usize> {
        let width = match self {
            PrimitiveType::Bool | PrimitiveType::USInt | PrimitiveType::SInt => 1,
            PrimitiveType::UInt | PrimitiveType::Int => 2,
            PrimitiveType::UDInt
            | PrimitiveType::DInt
            | PrimitiveType::Real
            | PrimitiveType::Time
            | PrimitiveType::TimeOfDay
            | PrimitiveType::Date
            | PrimitiveType::DateAndTime => 4,
            PrimitiveType::ULInt | PrimitiveType::LInt | PrimitiveType::LReal => 8,
            PrimitiveType::String => return None,
        };
        Some(width)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        if let Some(width) = self.width() {
            if bytes.len() != width {
                return Err(DecodeError::Length {
                    primitive: *self,
                    expected: width,
                    actual: bytes.len(),
                });
            }
        } else if bytes.is_empty() {
            return Err(DecodeError::Length {
                primitive: *self,
                expected: 1,
                actual: 0,
            });
        }

        let value = match self {
            PrimitiveType::Bool => Value::Bool(bytes[0] != 0),
            PrimitiveType::USInt => Value::UInt(u64::from(bytes[0])),
            PrimitiveType::SInt => Value::Int(i64::from(bytes[0] as i8)),
            PrimitiveType::UInt => Value::UInt(u64::from(u16::from_le_bytes(array(bytes)))),
            PrimitiveType::Int => Value::Int(i64::from(i16::from_le_bytes(array(bytes)))),
            PrimitiveType::UDInt
            | PrimitiveType::Time
            | PrimitiveType::TimeOfDay
            | PrimitiveType::Date
            | PrimitiveType::DateAndTime => {
                Value::UInt(u64::from(u32::from_le_bytes(array(bytes))))
            }
            PrimitiveType::DInt => Value::Int(i64::from(i32::from_le_bytes(array(bytes)))),
            PrimitiveType::ULInt => Value::UInt(u64::from_le_bytes(array(bytes))),
            PrimitiveType::LInt => Value::Int(i64::from_le_bytes(array(bytes))),
            PrimitiveType::Real => Value::Real(f32::from_le_bytes(array(bytes))),
            PrimitiveType::LReal => Value::LReal(f64::from_le_bytes(array(bytes))),
            PrimitiveType::String => Value::String(nul_terminated(bytes)),
        };

        Ok(value)
    }
}

/// Copies an already length-checked slice into a fixed-size array.
fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Bool => "BOOL",
            PrimitiveType::USInt => "USINT",
            PrimitiveType::SInt => "SINT",
            PrimitiveType::UInt => "UINT",
            PrimitiveType::Int => "INT",
            PrimitiveType::UDInt => "UDINT",
            PrimitiveType::DInt => "DINT",
            PrimitiveType::ULInt => "ULINT",
            PrimitiveType::LInt => "LINT",
            PrimitiveType::Real => "REAL",
            PrimitiveType::LReal => "LREAL",
            PrimitiveType::String => "STRING",
            PrimitiveType::Time => "TIME",
            PrimitiveType::TimeOfDay => "TOD",
            PrimitiveType::Date => "DATE",
            PrimitiveType::DateAndTime => "DT",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    Length {
        primitive: PrimitiveType,
        expected: usize,
        actual: usize,
    },
    Unsupported(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Length {
                primitive,
                expected,
                actual,
            } => write!(
                f,
                "{} needs {} bytes, payload has {}",
                primitive, expected, actual
            ),
            DecodeError::Unsupported(type_name) => {
                write!(f, "unsupported symbol type {:?}", type_name)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// A decoded PLC value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f32),
    LReal(f64),
    String(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{}", value),
            Value::Int(value) => write!(f, "{}", value),
            Value::UInt(value) => write!(f, "{}", value),
            Value::Real(value) => write!(f, "{}", value),
            Value::LReal(value) => write!(f, "{}", value),
            Value::String(value) => f.write_str(value),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Int(value) => serializer.serialize_i64(*value),
            Value::UInt(value) => serializer.serialize_u64(*value),
            Value::Real(value) => serializer.serialize_f32(*value),
            Value::LReal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
        }
    }
}
