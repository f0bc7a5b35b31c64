//! QOI ("Quite OK Image") decoder and encoder.
//!
//! The decoder turns a QOI byte stream — in memory, behind any
//! [`Read`](std::io::Read) source, or on disk — into an interleaved 8-bit
//! pixel buffer (with optional 16-bit and linear-float output), and the
//! encoder serializes such a buffer back into the same container. On top of
//! the raw codec sits an stb-style loading pipeline: the caller may request
//! any channel count from 1 (grey) to 4 (RGBA), ask for a vertical flip, or
//! widen/tone-map the result, and gets back exactly that.
//!
//! # Format
//!
//! A QOI file is a 14-byte header, a sequence of chunks, and an 8-byte end
//! marker:
//!
//! - 4-byte magic `qoif`
//! - u32be width, u32be height
//! - u8 channels: 3 (RGB) or 4 (RGBA)
//! - u8 colorspace: 0 (sRGB with linear alpha) or 1 (all channels linear)
//!
//! Both codec ends start from a previous-pixel register of `(0, 0, 0, 255)`
//! and a zero-initialized 64-slot table of recently seen pixels, indexed by
//! `(3r + 5g + 7b + 11a) & 63`. Each chunk starts with a 2-bit or 8-bit
//! tag; 8-bit tags take precedence:
//!
//! ```plain
//! tag 0b00 QOI_OP_INDEX  6-bit slot into the pixel table
//! tag 0b01 QOI_OP_DIFF   2-bit per-channel deltas, bias 2 (-2..=1)
//! tag 0b10 QOI_OP_LUMA   6-bit green delta (bias 32), +1 byte with the
//!                        red/blue deltas relative to green (bias 8)
//! tag 0b11 QOI_OP_RUN    6-bit run length, bias -1 (1..=62; 63 and 64
//!                        collide with the two 8-bit tags)
//! 0xFE     QOI_OP_RGB    +3 bytes, full R, G, B; alpha kept
//! 0xFF     QOI_OP_RGBA   +4 bytes, full R, G, B, A
//! ```
//!
//! All deltas wrap around the 8-bit channel value. The stream ends with
//! seven `0x00` bytes and a single `0x01`.
//!
//! # Decoding
//!
//! ```no_run
//! let bytes = std::fs::read("image.qoi").unwrap();
//! let image = qoix::decode(&bytes, &qoix::DecodeOptions::default()).unwrap();
//! assert_eq!(
//!     image.pixels.len(),
//!     image.width as usize * image.height as usize * image.channels.count(),
//! );
//! ```
//!
//! # Encoding
//!
//! ```
//! use qoix::{encode_to_vec, EncodeOptions, PixelFormat};
//!
//! let pixels = [12u8, 34, 56];
//! let bytes = encode_to_vec(&pixels, 1, 1, PixelFormat::Rgb, &EncodeOptions::default()).unwrap();
//! assert_eq!(&bytes[..4], b"qoif");
//! ```

use core::fmt;

pub mod decode;
pub mod encode;
pub mod ops;
pub mod stream;

mod pixels;

pub use decode::{
    decode, decode_16, decode_16_path, decode_16_reader, decode_f32, decode_f32_path,
    decode_f32_reader, decode_file, decode_path, decode_reader, info, info_path, info_reader,
    DecodeError, DecodeOptions, Image,
};
pub use encode::{encode, encode_path, encode_to_vec, EncodeError, EncodeOptions};

pub(crate) const MAGIC: [u8; 4] = *b"qoif";
pub(crate) const PADDING: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

/// Size of the fixed QOI header in bytes.
pub const HEADER_SIZE: usize = 14;

/// Default per-side dimension limit. Larger images are likely malformed or
/// malicious; the limit can be raised per call via
/// [`DecodeOptions::max_dimensions`].
pub const DEFAULT_MAX_DIMENSIONS: u32 = 1 << 24;

/// Channel count stored in a QOI file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channels {
    Rgb = 3,
    Rgba = 4,
}

impl Channels {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Channels::Rgb),
            4 => Some(Channels::Rgba),
            _ => None,
        }
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channels::Rgb => "RGB",
            Channels::Rgba => "RGBA",
        })
    }
}

/// Informational colorspace tag from the header. Does not change decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Colorspace {
    /// sRGB color channels with a linear alpha channel.
    Srgb = 0,
    /// All channels linear.
    Linear = 1,
}

impl Colorspace {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Colorspace::Srgb),
            1 => Some(Colorspace::Linear),
            _ => None,
        }
    }
}

impl fmt::Display for Colorspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Colorspace::Srgb => "sRGB",
            Colorspace::Linear => "linear",
        })
    }
}

/// Channel layout of a caller-side pixel buffer.
///
/// Components are interleaved in this order:
///
/// | count | components |
/// |---|---|
/// | 1 | grey |
/// | 2 | grey, alpha |
/// | 3 | red, green, blue |
/// | 4 | red, green, blue, alpha |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PixelFormat {
    Grey = 1,
    GreyAlpha = 2,
    Rgb = 3,
    Rgba = 4,
}

impl PixelFormat {
    pub const fn count(self) -> usize {
        self as usize
    }

    pub const fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::GreyAlpha | PixelFormat::Rgba)
    }
}

impl From<Channels> for PixelFormat {
    fn from(channels: Channels) -> Self {
        match channels {
            Channels::Rgb => PixelFormat::Rgb,
            Channels::Rgba => PixelFormat::Rgba,
        }
    }
}

/// Parsed QOI header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub channels: Channels,
    pub colorspace: Colorspace,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} ({})",
            self.width, self.height, self.channels, self.colorspace
        )
    }
}
