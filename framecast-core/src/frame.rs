//! Frame types shared between the publish and subscribe paths.
//!
//! [`Frame`] is the ephemeral payload of one publish call: it borrows the
//! host's pixel buffer, and ownership of the content transfers to the slot's
//! shared plane on write. [`FrameRef`] is the owned copy handed back to a
//! consumer by a successful poll.

use crate::error::FramecastError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for published frames.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8 = 0x1,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8 = 0x2,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8 = 0x3,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = FramecastError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(PixelFormat::Bgra8),
            0x2 => Ok(PixelFormat::Rgba8),
            0x3 => Ok(PixelFormat::Rgb8),
            _ => Err(FramecastError::UnknownVariant {
                type_name: "PixelFormat",
                value: value as u64,
            }),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One logical image offered to [`publish`](crate::publisher::Publisher::publish).
///
/// Borrows the caller's pixel buffer; `pixels` must hold exactly
/// `width * height * bytes_per_pixel` bytes (tightly packed, no row padding).
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Construct a frame, validating the buffer length against the
    /// declared dimensions.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &'a [u8],
    ) -> Result<Self, FramecastError> {
        if width == 0 || height == 0 {
            return Err(FramecastError::InvalidFrame("zero dimension"));
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(FramecastError::InvalidFrame(
                "pixel buffer length does not match dimensions",
            ));
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// Byte size of one tightly packed plane of these dimensions.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

// ── FrameRef ─────────────────────────────────────────────────────

/// A consumer's private copy of the latest complete frame.
///
/// The pixels are copied out of the shared plane under seqlock validation,
/// so the buffer is never torn even while the producer keeps publishing.
#[derive(Debug, Clone)]
pub struct FrameRef {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Generation counter value of the frame this copy reflects.
    pub generation: u64,
    pub pixels: Vec<u8>,
}
