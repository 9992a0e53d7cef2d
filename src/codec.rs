//! Typed-value ↔ wire-string projection.
//!
//! A [`TypedValue`] pairs a canonical string rendering with a [`WireType`]
//! code. The wire-type enum follows a closed-set `From<u8>`/`Into<u8>` shape:
//! known codes get named variants, everything else falls through to a
//! catch-all so decoding never panics on an unexpected byte on the wire.

use base64::Engine as _;
use thiserror::Error;

/// Closed-set wire-type codes. The mapping from parambus-native types is
/// total; unknown natives fall back to `String` (`0`) and an explicit `NONE`
/// native maps to `None` (`10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// UTF-8 string.
    String,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    Uint,
    /// Boolean, rendered as lowercase `"true"`/`"false"`.
    Bool,
    /// Floating point / double.
    Float,
    /// ISO-8601-ish date/time string.
    DateTime,
    /// Base64-encoded byte string.
    Bytes,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    Ulong,
    /// Single byte.
    Byte,
    /// No value / unknown type.
    None,
    /// Group or table marker (never itself decoded/encoded as a leaf value).
    Group,
    /// Any wire-type code outside the closed named set.
    Other(u8),
}

impl From<u8> for WireType {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::String,
            1 => Self::Int,
            2 => Self::Uint,
            3 => Self::Bool,
            4 => Self::Float,
            5 => Self::DateTime,
            6 => Self::Bytes,
            7 => Self::Long,
            8 => Self::Ulong,
            9 => Self::Byte,
            10 => Self::None,
            11 => Self::Group,
            other => Self::Other(other),
        }
    }
}

impl From<WireType> for u8 {
    fn from(ty: WireType) -> Self {
        match ty {
            WireType::String => 0,
            WireType::Int => 1,
            WireType::Uint => 2,
            WireType::Bool => 3,
            WireType::Float => 4,
            WireType::DateTime => 5,
            WireType::Bytes => 6,
            WireType::Long => 7,
            WireType::Ulong => 8,
            WireType::Byte => 9,
            WireType::None => 10,
            WireType::Group => 11,
            WireType::Other(code) => code,
        }
    }
}

/// A parambus-native type, as reported by the bus adapter, prior to wire
/// projection. Distinct from [`WireType`] so [`map_native_to_wire`] has a
/// clear, total source domain to pattern-match over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    /// Bus-native string.
    String,
    /// Bus-native signed integer.
    Int,
    /// Bus-native unsigned integer.
    Uint,
    /// Bus-native boolean.
    Bool,
    /// Bus-native float/double.
    Float,
    /// Bus-native date/time.
    DateTime,
    /// Bus-native byte string.
    Bytes,
    /// Bus-native 64-bit signed integer.
    Long,
    /// Bus-native 64-bit unsigned integer.
    Ulong,
    /// Bus-native single byte.
    Byte,
    /// Bus-native "no value" marker.
    None,
    /// Bus-native table/group marker.
    Group,
    /// Any native type this adapter does not otherwise recognize.
    Unknown,
}

/// Project a parambus-native type onto its wire-type code.
///
/// Total over [`NativeType`]; unrecognized natives map to
/// [`WireType::String`], and an explicit "no value" native maps to
/// [`WireType::None`].
#[must_use]
pub const fn map_native_to_wire(native: NativeType) -> WireType {
    match native {
        NativeType::String => WireType::String,
        NativeType::Int => WireType::Int,
        NativeType::Uint => WireType::Uint,
        NativeType::Bool => WireType::Bool,
        NativeType::Float => WireType::Float,
        NativeType::DateTime => WireType::DateTime,
        NativeType::Bytes => WireType::Bytes,
        NativeType::Long => WireType::Long,
        NativeType::Ulong => WireType::Ulong,
        NativeType::Byte => WireType::Byte,
        NativeType::None => WireType::None,
        NativeType::Group => WireType::Group,
        NativeType::Unknown => WireType::String,
    }
}

/// A decoded value paired with the wire-type it was decoded against.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    /// Canonical string rendering.
    pub rendering: String,
    /// Wire-type code the rendering is valid under.
    pub wire_type: WireType,
}

/// Errors raised while projecting between wire strings and typed values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The string rendering is not a valid literal for its declared wire type.
    #[error("invalid literal {literal:?} for wire type {wire_type:?}")]
    InvalidLiteral {
        /// The offending string.
        literal: String,
        /// The wire type it was being decoded against.
        wire_type: WireType,
    },
}

/// Decode a wire string into a [`TypedValue`] under the given wire type.
///
/// - `Bool` accepts only the literals `"true"`/`"false"`.
/// - Integer types parse base-10, with range checks against their width.
/// - `Float` accepts standard decimal/exponential notation.
/// - `Bytes` is base64 (standard alphabet, with padding).
/// - All other types are accepted as opaque strings (there is no narrower
///   literal grammar to validate against them at this layer).
///
/// # Errors
/// Returns [`CodecError::InvalidLiteral`] if `wire` is not a valid literal
/// for `wire_type`.
pub fn decode(wire: &str, wire_type: WireType) -> Result<TypedValue, CodecError> {
    let invalid = || CodecError::InvalidLiteral {
        literal: wire.to_owned(),
        wire_type,
    };
    match wire_type {
        WireType::Bool => {
            if wire != "true" && wire != "false" {
                return Err(invalid());
            }
        }
        WireType::Int => {
            wire.parse::<i32>().map_err(|_| invalid())?;
        }
        WireType::Uint => {
            wire.parse::<u32>().map_err(|_| invalid())?;
        }
        WireType::Long => {
            wire.parse::<i64>().map_err(|_| invalid())?;
        }
        WireType::Ulong => {
            wire.parse::<u64>().map_err(|_| invalid())?;
        }
        WireType::Byte => {
            wire.parse::<u8>().map_err(|_| invalid())?;
        }
        WireType::Float => {
            wire.parse::<f64>().map_err(|_| invalid())?;
        }
        WireType::Bytes => {
            base64::engine::general_purpose::STANDARD
                .decode(wire)
                .map_err(|_| invalid())?;
        }
        WireType::String | WireType::DateTime | WireType::None | WireType::Group | WireType::Other(_) => {}
    }
    Ok(TypedValue {
        rendering: wire.to_owned(),
        wire_type,
    })
}

/// Encode a [`TypedValue`] into its canonical wire string and wire type.
///
/// Canonicalization is limited to what the wire format requires: no trailing
/// whitespace, and lowercase booleans. Callers that already hold a
/// canonical rendering (e.g. one round-tripped through [`decode`]) get it
/// back unchanged.
#[must_use]
pub fn encode(value: &TypedValue) -> (String, WireType) {
    let trimmed = value.rendering.trim_end();
    let rendering = match value.wire_type {
        WireType::Bool => trimmed.to_ascii_lowercase(),
        _ => trimmed.to_owned(),
    };
    (rendering, value.wire_type)
}
