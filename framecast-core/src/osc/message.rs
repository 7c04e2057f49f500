//! Control message types.
//!
//! A [`ControlMessage`] is an address-routed command with typed arguments.
//! Messages are immutable once constructed: the codec builds them from raw
//! datagrams, the receiver hands them to one dispatch pass, and then they
//! are discarded.

use std::fmt;

use crate::error::DecodeError;

// ── ControlArg ───────────────────────────────────────────────────

/// One typed argument of a control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
}

impl ControlArg {
    /// The wire type tag for this argument.
    pub fn type_tag(&self) -> char {
        match self {
            ControlArg::Int(_) => 'i',
            ControlArg::Float(_) => 'f',
            ControlArg::Str(_) => 's',
            ControlArg::Blob(_) => 'b',
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ControlArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            ControlArg::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ControlArg::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            ControlArg::Blob(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ControlArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlArg::Int(v) => write!(f, "{v}"),
            ControlArg::Float(v) => write!(f, "{v}"),
            ControlArg::Str(v) => write!(f, "{v:?}"),
            ControlArg::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

// ── ControlMessage ───────────────────────────────────────────────

/// An addressed command with an ordered, typed argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    address: String,
    args: Vec<ControlArg>,
}

impl ControlMessage {
    /// Construct a message, validating the address.
    ///
    /// Addresses are hierarchical paths like `/camera/exposure`: ASCII,
    /// starting with `/`.
    pub fn new(
        address: impl Into<String>,
        args: Vec<ControlArg>,
    ) -> Result<Self, DecodeError> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self { address, args })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[ControlArg] {
        &self.args
    }

    /// The wire type-tag string (without the leading comma).
    pub fn type_tags(&self) -> String {
        self.args.iter().map(ControlArg::type_tag).collect()
    }
}

pub(crate) fn validate_address(address: &str) -> Result<(), DecodeError> {
    if !address.starts_with('/') || !address.is_ascii() || address.contains('\0') {
        return Err(DecodeError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_construction_validates_address() {
        assert!(ControlMessage::new("/camera/exposure", vec![]).is_ok());
        assert!(ControlMessage::new("camera", vec![]).is_err());
        assert!(ControlMessage::new("/caméra", vec![]).is_err());
        assert!(ControlMessage::new("/cam\0era", vec![]).is_err());
    }

    #[test]
    fn type_tags_follow_args() {
        let msg = ControlMessage::new(
            "/x",
            vec![
                ControlArg::Int(1),
                ControlArg::Float(2.0),
                ControlArg::Str("s".into()),
                ControlArg::Blob(vec![1, 2]),
            ],
        )
        .unwrap();
        assert_eq!(msg.type_tags(), "ifsb");
    }

    #[test]
    fn arg_accessors() {
        assert_eq!(ControlArg::Int(7).as_int(), Some(7));
        assert_eq!(ControlArg::Int(7).as_float(), None);
        assert_eq!(ControlArg::Str("a".into()).as_str(), Some("a"));
        assert_eq!(ControlArg::Blob(vec![9]).as_blob(), Some(&[9u8][..]));
    }
}
