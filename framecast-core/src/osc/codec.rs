//! Control-message wire codec.
//!
//! ## Wire format
//!
//! One datagram carries either a single message or a `#bundle`:
//!
//! ```text
//! message:
//!   address:   null-terminated ASCII, starts with '/', padded to 4 bytes
//!   type tags: ",iffs…" null-terminated, padded to 4 bytes
//!              'i' = int32, 'f' = float32, 's' = string, 'b' = blob
//!   arguments: in tag order, big-endian, each padded to a 4-byte boundary
//!              (blob = int32 length + bytes + padding)
//!
//! bundle:
//!   "#bundle\0"  (8 bytes)
//!   timetag:     uint64 (ignored; messages dispatch immediately)
//!   elements:    repeated [int32 size][message-or-bundle]
//! ```
//!
//! The codec is stateless and byte-exact: `encode(decode(x)) == x` for any
//! well-formed message `x`, padding included. Malformed input returns a
//! typed [`DecodeError`] and never panics.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, FramecastError};
use crate::osc::message::{ControlArg, ControlMessage, validate_address};

/// Marker prefix of a bundle packet, including its terminating NUL.
const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// Bundles within bundles are legal; runaway nesting is not.
const MAX_BUNDLE_DEPTH: usize = 8;

/// Round `n` up to the next 4-byte boundary.
const fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

// ── Decoding ─────────────────────────────────────────────────────

/// Decode a single (non-bundle) message.
pub fn decode_message(buf: &[u8]) -> Result<ControlMessage, DecodeError> {
    let mut pos = 0;

    if buf.len() < 4 {
        return Err(DecodeError::Truncated {
            need: 4,
            have: buf.len(),
        });
    }

    let address = {
        let Some(nul) = buf[pos..].iter().position(|&b| b == 0) else {
            return Err(DecodeError::AddressNotNullTerminated);
        };
        let raw = &buf[pos..pos + nul];
        let address =
            std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
        validate_address(address)?;
        let padded = pad4(nul + 1);
        if pos + padded > buf.len() {
            return Err(DecodeError::Truncated {
                need: pos + padded,
                have: buf.len(),
            });
        }
        pos += padded;
        address.to_string()
    };

    // Senders predating type tags omit them entirely; tolerate that as a
    // message with no arguments.
    if pos == buf.len() {
        return ControlMessage::new(address, Vec::new());
    }

    let tags = read_padded_string(buf, &mut pos)?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(DecodeError::InvalidTypeTag {
            tag: tags.chars().next().unwrap_or('\0'),
        });
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => ControlArg::Int(i32::from_be_bytes(read_word(buf, &mut pos)?)),
            'f' => ControlArg::Float(f32::from_be_bytes(read_word(buf, &mut pos)?)),
            's' => ControlArg::Str(read_padded_string(buf, &mut pos)?),
            'b' => {
                let len = i32::from_be_bytes(read_word(buf, &mut pos)?);
                let len = usize::try_from(len).map_err(|_| DecodeError::InvalidBlobLength(len))?;
                let padded = pad4(len);
                if pos + padded > buf.len() {
                    return Err(DecodeError::Truncated {
                        need: pos + padded,
                        have: buf.len(),
                    });
                }
                let blob = buf[pos..pos + len].to_vec();
                pos += padded;
                ControlArg::Blob(blob)
            }
            other => return Err(DecodeError::InvalidTypeTag { tag: other }),
        };
        args.push(arg);
    }

    if pos != buf.len() {
        return Err(DecodeError::TrailingBytes(buf.len() - pos));
    }

    ControlMessage::new(address, args)
}

/// Decode a datagram that may be a message or a (possibly nested) bundle.
///
/// Bundle timetags are ignored: control messages dispatch on arrival.
pub fn decode_packet(buf: &[u8]) -> Result<Vec<ControlMessage>, DecodeError> {
    decode_packet_at_depth(buf, 0)
}

fn decode_packet_at_depth(buf: &[u8], depth: usize) -> Result<Vec<ControlMessage>, DecodeError> {
    if depth > MAX_BUNDLE_DEPTH {
        return Err(DecodeError::InvalidBundle("nesting too deep"));
    }
    if !buf.starts_with(BUNDLE_TAG) {
        return Ok(vec![decode_message(buf)?]);
    }

    let mut pos = BUNDLE_TAG.len();
    if pos + 8 > buf.len() {
        return Err(DecodeError::Truncated {
            need: pos + 8,
            have: buf.len(),
        });
    }
    pos += 8; // timetag

    let mut messages = Vec::new();
    while pos < buf.len() {
        let size = i32::from_be_bytes(read_word(buf, &mut pos)?);
        let size = usize::try_from(size)
            .map_err(|_| DecodeError::InvalidBundle("negative element size"))?;
        if size % 4 != 0 {
            return Err(DecodeError::InvalidBundle("element size not 4-byte aligned"));
        }
        if pos + size > buf.len() {
            return Err(DecodeError::Truncated {
                need: pos + size,
                have: buf.len(),
            });
        }
        messages.extend(decode_packet_at_depth(&buf[pos..pos + size], depth + 1)?);
        pos += size;
    }
    Ok(messages)
}

fn read_word(buf: &[u8], pos: &mut usize) -> Result<[u8; 4], DecodeError> {
    if *pos + 4 > buf.len() {
        return Err(DecodeError::Truncated {
            need: *pos + 4,
            have: buf.len(),
        });
    }
    let word = [buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]];
    *pos += 4;
    Ok(word)
}

fn read_padded_string(buf: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let Some(nul) = buf[*pos..].iter().position(|&b| b == 0) else {
        return Err(DecodeError::Truncated {
            need: buf.len() + 1,
            have: buf.len(),
        });
    };
    let raw = &buf[*pos..*pos + nul];
    let s = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
    let padded = pad4(nul + 1);
    if *pos + padded > buf.len() {
        return Err(DecodeError::Truncated {
            need: *pos + padded,
            have: buf.len(),
        });
    }
    *pos += padded;
    Ok(s.to_string())
}

// ── Encoding ─────────────────────────────────────────────────────

/// Encode a message to its canonical wire form.
pub fn encode_message(msg: &ControlMessage) -> Vec<u8> {
    let mut out = BytesMut::new();
    put_padded_str(&mut out, msg.address());
    put_padded_str(&mut out, &format!(",{}", msg.type_tags()));

    for arg in msg.args() {
        match arg {
            ControlArg::Int(v) => out.put_i32(*v),
            ControlArg::Float(v) => out.put_f32(*v),
            ControlArg::Str(v) => put_padded_str(&mut out, v),
            ControlArg::Blob(v) => {
                out.put_i32(v.len() as i32);
                out.put_slice(v);
                out.put_bytes(0, pad4(v.len()) - v.len());
            }
        }
    }
    out.to_vec()
}

fn put_padded_str(out: &mut BytesMut, s: &str) {
    out.put_slice(s.as_bytes());
    out.put_bytes(0, pad4(s.len() + 1) - s.len());
}

// ── tokio-util codec ─────────────────────────────────────────────

/// Datagram codec for use with `tokio_util::udp::UdpFramed`.
///
/// Each datagram decodes to the list of messages it carries (one for a
/// plain message, possibly several for a bundle).
#[derive(Debug, Default, Clone, Copy)]
pub struct OscCodec;

impl Decoder for OscCodec {
    type Item = Vec<ControlMessage>;
    type Error = FramecastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        // Datagram framing: the transport hands us exactly one packet.
        let datagram = src.split_to(src.len());
        Ok(Some(decode_packet(&datagram)?))
    }
}

impl Encoder<ControlMessage> for OscCodec {
    type Error = FramecastError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode_message(&item));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(address: &str, args: Vec<ControlArg>) -> ControlMessage {
        ControlMessage::new(address, args).unwrap()
    }

    #[test]
    fn golden_bytes_int_message() {
        let encoded = encode_message(&msg("/a", vec![ControlArg::Int(5)]));
        assert_eq!(
            encoded,
            [b'/', b'a', 0, 0, b',', b'i', 0, 0, 0, 0, 0, 5]
        );
        assert_eq!(
            decode_message(&encoded).unwrap(),
            msg("/a", vec![ControlArg::Int(5)])
        );
    }

    #[test]
    fn roundtrip_all_arg_types() {
        let original = msg(
            "/camera/exposure",
            vec![
                ControlArg::Int(-42),
                ControlArg::Float(0.25),
                ControlArg::Str("auto".into()),
                ControlArg::Blob(vec![1, 2, 3, 4, 5]),
                ControlArg::Str("".into()),
            ],
        );
        let bytes = encode_message(&original);
        assert_eq!(bytes.len() % 4, 0);
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded, original);
        // Byte-exact: encode(decode(x)) == x.
        assert_eq!(encode_message(&decoded), bytes);
    }

    #[test]
    fn every_truncated_prefix_errors_without_panic() {
        let bytes = encode_message(&msg(
            "/camera/exposure",
            vec![ControlArg::Float(1.5), ControlArg::Str("hi".into())],
        ));
        // Cutting exactly after the padded address yields a legal
        // zero-argument message; every other prefix must error.
        let address_end = pad4("/camera/exposure".len() + 1);
        for cut in 0..bytes.len() {
            let result = decode_message(&bytes[..cut]);
            if cut == address_end {
                assert_eq!(result.unwrap().args(), &[]);
            } else {
                assert!(result.is_err(), "prefix {cut}");
            }
        }
    }

    #[test]
    fn short_prefixes_are_truncated() {
        for len in 0..4 {
            let buf = vec![b'/'; len];
            assert!(matches!(
                decode_message(&buf),
                Err(DecodeError::Truncated { need: 4, .. })
            ));
        }
    }

    #[test]
    fn missing_nul_is_address_error() {
        assert_eq!(
            decode_message(b"/abcdef["),
            Err(DecodeError::AddressNotNullTerminated)
        );
    }

    #[test]
    fn address_must_start_with_slash() {
        let mut bytes = encode_message(&msg("/ok", vec![]));
        bytes[0] = b'x';
        assert!(matches!(
            decode_message(&bytes),
            Err(DecodeError::InvalidAddress(_))
        ));
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        // ",iz\0" — 'z' is not a type.
        let bytes = [b'/', b'a', 0, 0, b',', b'i', b'z', 0, 0, 0, 0, 5];
        assert_eq!(
            decode_message(&bytes),
            Err(DecodeError::InvalidTypeTag { tag: 'z' })
        );
    }

    #[test]
    fn tag_string_missing_comma_is_rejected() {
        let bytes = [b'/', b'a', 0, 0, b'i', 0, 0, 0];
        assert_eq!(
            decode_message(&bytes),
            Err(DecodeError::InvalidTypeTag { tag: 'i' })
        );
    }

    #[test]
    fn missing_typetag_decodes_as_no_args() {
        let decoded = decode_message(b"/cam\0\0\0\0").unwrap();
        assert_eq!(decoded.address(), "/cam");
        assert!(decoded.args().is_empty());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = encode_message(&msg("/a", vec![ControlArg::Int(1)]));
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode_message(&bytes), Err(DecodeError::TrailingBytes(4)));
    }

    #[test]
    fn blob_padding_is_exact() {
        for blob_len in 0..9 {
            let original = msg("/b", vec![ControlArg::Blob(vec![0xAA; blob_len])]);
            let bytes = encode_message(&original);
            assert_eq!(bytes.len() % 4, 0, "blob_len {blob_len}");
            assert_eq!(decode_message(&bytes).unwrap(), original);
            assert_eq!(encode_message(&decode_message(&bytes).unwrap()), bytes);
        }
    }

    #[test]
    fn bundle_decodes_to_contained_messages() {
        let m1 = msg("/a", vec![ControlArg::Int(1)]);
        let m2 = msg("/b", vec![ControlArg::Float(2.0)]);
        let e1 = encode_message(&m1);
        let e2 = encode_message(&m2);

        let mut bundle = Vec::new();
        bundle.extend_from_slice(b"#bundle\0");
        bundle.extend_from_slice(&1u64.to_be_bytes()); // immediate timetag
        bundle.extend_from_slice(&(e1.len() as i32).to_be_bytes());
        bundle.extend_from_slice(&e1);
        bundle.extend_from_slice(&(e2.len() as i32).to_be_bytes());
        bundle.extend_from_slice(&e2);

        assert_eq!(decode_packet(&bundle).unwrap(), vec![m1.clone(), m2]);

        // Nested bundle.
        let mut outer = Vec::new();
        outer.extend_from_slice(b"#bundle\0");
        outer.extend_from_slice(&1u64.to_be_bytes());
        outer.extend_from_slice(&(bundle.len() as i32).to_be_bytes());
        outer.extend_from_slice(&bundle);
        let decoded = decode_packet(&outer).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], m1);
    }

    #[test]
    fn truncated_bundle_errors() {
        assert!(matches!(
            decode_packet(b"#bundle\0\0\0"),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn misaligned_bundle_element_errors() {
        let mut bundle = Vec::new();
        bundle.extend_from_slice(b"#bundle\0");
        bundle.extend_from_slice(&1u64.to_be_bytes());
        bundle.extend_from_slice(&3i32.to_be_bytes());
        bundle.extend_from_slice(&[0, 0, 0]);
        assert_eq!(
            decode_packet(&bundle),
            Err(DecodeError::InvalidBundle("element size not 4-byte aligned"))
        );
    }

    #[test]
    fn tokio_codec_decodes_whole_datagrams() {
        let mut codec = OscCodec;
        let mut buf = BytesMut::new();
        Encoder::encode(
            &mut codec,
            msg("/a", vec![ControlArg::Int(1)]),
            &mut buf,
        )
        .unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].address(), "/a");
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
