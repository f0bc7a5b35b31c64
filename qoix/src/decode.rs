//! QOI decoding: header parsing, the op-replay loop, and the stb-style
//! loading surface (desired channel counts, flips, 16-bit and float
//! output, memory/reader/file sources).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::ops::{Op, Rgba};
use crate::pixels;
use crate::stream::ByteStream;
use crate::{Channels, Colorspace, Header, PixelFormat, DEFAULT_MAX_DIMENSIONS, MAGIC, PADDING};

#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(display("not a QOI stream (bad magic)"))]
    NotQoi,

    #[snafu(display("invalid channel count in header: {value} (must be 3 or 4)"))]
    InvalidChannels { value: u8 },

    #[snafu(display("invalid colorspace in header: {value} (must be 0 or 1)"))]
    InvalidColorspace { value: u8 },

    #[snafu(display("image is {width}x{height}, but each side is limited to {limit} pixels"))]
    TooLarge { width: u32, height: u32, limit: u32 },

    #[snafu(display("{width}x{height} pixels at {channels} channels do not fit in 2 GB"))]
    SizeOverflow { width: u32, height: u32, channels: u8 },

    #[snafu(display("failed to allocate a {bytes}-byte pixel buffer"))]
    OutOfMemory { bytes: usize },

    #[snafu(display("failed to read from the source"))]
    Read { source: io::Error },

    #[snafu(display("failed to open {}", path.display()))]
    Open { path: PathBuf, source: io::Error },
}

/// Per-call decoder settings.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Channel count of the returned buffer. `None` keeps whatever the
    /// file stores (3 or 4). Requests for 3 or 4 channels decode directly;
    /// grey and grey-alpha decode natively first and collapse afterwards.
    pub desired_channels: Option<PixelFormat>,
    /// Return the image bottom-up instead of top-down.
    pub flip_vertical: bool,
    /// Per-side dimension limit, [`DEFAULT_MAX_DIMENSIONS`] by default.
    pub max_dimensions: u32,
    /// Gamma applied to color channels by [`decode_f32`].
    pub hdr_gamma: f32,
    /// Post-gamma scale applied to color channels by [`decode_f32`].
    pub hdr_scale: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            desired_channels: None,
            flip_vertical: false,
            max_dimensions: DEFAULT_MAX_DIMENSIONS,
            hdr_gamma: 2.2,
            hdr_scale: 1.0,
        }
    }
}

/// A decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T = u8> {
    /// Interleaved components, `width * height * channels.count()` of them.
    pub pixels: Vec<T>,
    pub width: u32,
    pub height: u32,
    /// Layout of `pixels` (what the caller asked for).
    pub channels: PixelFormat,
    /// Channel count stored in the file, regardless of what was requested.
    pub source_channels: Channels,
}

impl<T> Image<T> {
    fn with_pixels<U>(self, pixels: Vec<U>) -> Image<U> {
        Image {
            pixels,
            width: self.width,
            height: self.height,
            channels: self.channels,
            source_channels: self.source_channels,
        }
    }
}

/// Running decoder state: the previous-pixel register and the 64-slot
/// table of recently seen pixels.
#[derive(Debug)]
pub struct DecodeContext {
    prev: Rgba,
    index: [Rgba; 64],
}

impl DecodeContext {
    pub const fn new() -> Self {
        Self {
            prev: Rgba::START,
            index: [Rgba::ZERO; 64],
        }
    }
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeContext {
    /// Replays ops into a fresh `width * height * target` buffer. `target`
    /// must be `Rgb` or `Rgba`; grey outputs convert after the fact.
    fn decode_pixels(
        &mut self,
        stream: &mut ByteStream<'_>,
        width: u32,
        height: u32,
        target: PixelFormat,
    ) -> Result<Vec<u8>, DecodeError> {
        let bpp = target.count();
        let px_count = width as usize * height as usize;
        let bytes = px_count * bpp;

        let mut out: Vec<u8> = Vec::new();
        out.try_reserve_exact(bytes)
            .ok()
            .context(OutOfMemorySnafu { bytes })?;
        out.resize(bytes, 0);

        let mut filled = 0;
        while filled < px_count {
            let op = Op::read(stream).context(ReadSnafu)?;
            let (px, count) = match op {
                // The table is untouched during a run; only non-run ops
                // update their slot.
                Op::Run(n) => (self.prev, usize::from(n).min(px_count - filled)),
                other => {
                    let px = other.apply(self.prev, &self.index);
                    self.index[px.hash()] = px;
                    (px, 1)
                }
            };
            self.prev = px;

            let chunk = &mut out[filled * bpp..(filled + count) * bpp];
            let src = [px.r, px.g, px.b, px.a];
            for dst in chunk.chunks_exact_mut(bpp) {
                dst.copy_from_slice(&src[..bpp]);
            }
            filled += count;
        }

        // Consume the end marker so a file cursor lands one past the
        // image; stay lenient if the writer truncated it.
        let mut trailer = [0u8; PADDING.len()];
        match stream.read_exact(&mut trailer) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(e).context(ReadSnafu),
        }

        Ok(out)
    }
}

pub(crate) fn read_header(stream: &mut ByteStream<'_>) -> Result<Header, DecodeError> {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).context(ReadSnafu)?;
    ensure!(magic == MAGIC, NotQoiSnafu);

    let width = stream.read_u32::<BigEndian>().context(ReadSnafu)?;
    let height = stream.read_u32::<BigEndian>().context(ReadSnafu)?;
    let channels = stream.read_u8().context(ReadSnafu)?;
    let colorspace = stream.read_u8().context(ReadSnafu)?;

    Ok(Header {
        width,
        height,
        channels: Channels::from_u8(channels).context(InvalidChannelsSnafu { value: channels })?,
        colorspace: Colorspace::from_u8(colorspace)
            .context(InvalidColorspaceSnafu { value: colorspace })?,
    })
}

fn decode_stream(
    stream: &mut ByteStream<'_>,
    options: &DecodeOptions,
) -> Result<Image<u8>, DecodeError> {
    let header = read_header(stream)?;
    ensure!(
        header.width <= options.max_dimensions && header.height <= options.max_dimensions,
        TooLargeSnafu {
            width: header.width,
            height: header.height,
            limit: options.max_dimensions,
        }
    );

    let native = PixelFormat::from(header.channels);
    let (decode_as, requested) = match options.desired_channels {
        None => (native, native),
        Some(f @ (PixelFormat::Rgb | PixelFormat::Rgba)) => (f, f),
        Some(f) => (native, f),
    };

    let px_count = u64::from(header.width) * u64::from(header.height);
    ensure!(
        px_count * decode_as.count() as u64 <= i32::MAX as u64,
        SizeOverflowSnafu {
            width: header.width,
            height: header.height,
            channels: decode_as.count() as u8,
        }
    );

    let mut ctx = DecodeContext::new();
    let mut pixels = ctx.decode_pixels(stream, header.width, header.height, decode_as)?;

    if requested != decode_as {
        let bytes = px_count as usize * requested.count();
        pixels = pixels::convert_channels(
            &pixels,
            header.width as usize,
            header.height as usize,
            decode_as.count(),
            requested.count(),
        )
        .ok()
        .context(OutOfMemorySnafu { bytes })?;
    }

    if options.flip_vertical {
        pixels::flip_vertical(&mut pixels, header.width as usize * requested.count());
    }

    Ok(Image {
        pixels,
        width: header.width,
        height: header.height,
        channels: requested,
        source_channels: header.channels,
    })
}

/// Decodes a QOI image held in memory.
pub fn decode(data: &[u8], options: &DecodeOptions) -> Result<Image<u8>, DecodeError> {
    decode_stream(&mut ByteStream::from_slice(data), options)
}

/// Decodes a QOI image pulled from any reader.
pub fn decode_reader<R: Read>(mut reader: R, options: &DecodeOptions) -> Result<Image<u8>, DecodeError> {
    decode_stream(&mut ByteStream::from_reader(&mut reader), options)
}

/// Opens `path`, decodes it, and closes it again.
pub fn decode_path<P: AsRef<Path>>(
    path: P,
    options: &DecodeOptions,
) -> Result<Image<u8>, DecodeError> {
    let path = path.as_ref();
    let file = File::open(path).context(OpenSnafu { path })?;
    decode_reader(file, options)
}

/// Decodes from an already-open file, leaving it open with its cursor
/// exactly one past the last byte of the image (the unread part of the
/// refill window is seeked back).
pub fn decode_file(file: &mut File, options: &DecodeOptions) -> Result<Image<u8>, DecodeError> {
    let (image, unread) = {
        let mut stream = ByteStream::from_reader(file);
        let image = decode_stream(&mut stream, options)?;
        (image, stream.buffered_rest())
    };
    file.seek(SeekFrom::Current(-(unread as i64)))
        .context(ReadSnafu)?;
    Ok(image)
}

fn widen(image: Image<u8>) -> Result<Image<u16>, DecodeError> {
    let bytes = image.pixels.len() * 2;
    let pixels = pixels::widen_to_16(&image.pixels)
        .ok()
        .context(OutOfMemorySnafu { bytes })?;
    Ok(image.with_pixels(pixels))
}

fn tone_map(image: Image<u8>, options: &DecodeOptions) -> Result<Image<f32>, DecodeError> {
    let bytes = image.pixels.len() * 4;
    let pixels = pixels::ldr_to_hdr(
        &image.pixels,
        image.channels.count(),
        options.hdr_gamma,
        options.hdr_scale,
    )
    .ok()
    .context(OutOfMemorySnafu { bytes })?;
    Ok(image.with_pixels(pixels))
}

/// Like [`decode`], but widens every component to 16 bits
/// (`(v << 8) | v`).
pub fn decode_16(data: &[u8], options: &DecodeOptions) -> Result<Image<u16>, DecodeError> {
    widen(decode(data, options)?)
}

/// [`decode_16`] over any reader.
pub fn decode_16_reader<R: Read>(
    reader: R,
    options: &DecodeOptions,
) -> Result<Image<u16>, DecodeError> {
    widen(decode_reader(reader, options)?)
}

/// [`decode_16`] over a file path.
pub fn decode_16_path<P: AsRef<Path>>(
    path: P,
    options: &DecodeOptions,
) -> Result<Image<u16>, DecodeError> {
    widen(decode_path(path, options)?)
}

/// Like [`decode`], but tone-maps every color component to a linear float
/// via `(v / 255) ^ hdr_gamma * hdr_scale`; alpha maps linearly.
pub fn decode_f32(data: &[u8], options: &DecodeOptions) -> Result<Image<f32>, DecodeError> {
    tone_map(decode(data, options)?, options)
}

/// [`decode_f32`] over any reader.
pub fn decode_f32_reader<R: Read>(
    reader: R,
    options: &DecodeOptions,
) -> Result<Image<f32>, DecodeError> {
    tone_map(decode_reader(reader, options)?, options)
}

/// [`decode_f32`] over a file path.
pub fn decode_f32_path<P: AsRef<Path>>(
    path: P,
    options: &DecodeOptions,
) -> Result<Image<f32>, DecodeError> {
    tone_map(decode_path(path, options)?, options)
}

/// Reads just the header of an in-memory QOI stream. Never touches pixel
/// data; 14 bytes of input are enough.
pub fn info(data: &[u8]) -> Result<Header, DecodeError> {
    read_header(&mut ByteStream::from_slice(data))
}

/// [`info`] over any reader.
pub fn info_reader<R: Read>(mut reader: R) -> Result<Header, DecodeError> {
    read_header(&mut ByteStream::from_reader(&mut reader))
}

/// [`info`] over a file path.
pub fn info_path<P: AsRef<Path>>(path: P) -> Result<Header, DecodeError> {
    let path = path.as_ref();
    let mut file = File::open(path).context(OpenSnafu { path })?;
    info_reader(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(width: u32, height: u32, channels: u8, colorspace: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.push(channels);
        bytes.push(colorspace);
        bytes
    }

    #[test]
    fn single_rgb_pixel() {
        let mut bytes = header_bytes(1, 1, 3, 0);
        bytes.extend_from_slice(&[0xFE, 12, 34, 56]);
        bytes.extend_from_slice(&PADDING);

        let image = decode(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(image.pixels, vec![12, 34, 56]);
        assert_eq!((image.width, image.height), (1, 1));
        assert_eq!(image.source_channels, Channels::Rgb);
    }

    #[test]
    fn bad_magic_is_not_qoi() {
        let bytes = b"qoixxxxxxxxxxx";
        assert!(matches!(
            decode(bytes, &DecodeOptions::default()),
            Err(DecodeError::NotQoi)
        ));
    }

    #[test]
    fn header_field_validation() {
        let bytes = header_bytes(1, 1, 5, 0);
        assert!(matches!(
            info(&bytes),
            Err(DecodeError::InvalidChannels { value: 5 })
        ));

        let bytes = header_bytes(1, 1, 3, 2);
        assert!(matches!(
            info(&bytes),
            Err(DecodeError::InvalidColorspace { value: 2 })
        ));
    }

    #[test]
    fn info_succeeds_where_truncated_decode_fails() {
        let bytes = header_bytes(1, 1, 4, 1);
        assert_eq!(bytes.len(), crate::HEADER_SIZE);

        let header = info(&bytes).unwrap();
        assert_eq!((header.width, header.height), (1, 1));
        assert_eq!(header.channels, Channels::Rgba);
        assert_eq!(header.colorspace, Colorspace::Linear);

        assert!(matches!(
            decode(&bytes, &DecodeOptions::default()),
            Err(DecodeError::Read { .. })
        ));
    }

    #[test]
    fn oversized_dimensions_fail_before_allocating() {
        let bytes = header_bytes(DEFAULT_MAX_DIMENSIONS + 1, 1, 3, 0);
        assert!(matches!(
            decode(&bytes, &DecodeOptions::default()),
            Err(DecodeError::TooLarge { .. })
        ));

        // Both sides within the per-side limit, but the byte count
        // overflows a signed 32-bit size.
        let bytes = header_bytes(DEFAULT_MAX_DIMENSIONS, DEFAULT_MAX_DIMENSIONS, 4, 0);
        assert!(matches!(
            decode(&bytes, &DecodeOptions::default()),
            Err(DecodeError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn max_dimensions_is_per_call() {
        let mut bytes = header_bytes(3, 1, 3, 0);
        bytes.extend_from_slice(&[0xFE, 1, 2, 3, 0xC0 | 1]);
        bytes.extend_from_slice(&PADDING);

        let options = DecodeOptions {
            max_dimensions: 2,
            ..Default::default()
        };
        assert!(matches!(
            decode(&bytes, &options),
            Err(DecodeError::TooLarge { .. })
        ));
        assert!(decode(&bytes, &DecodeOptions::default()).is_ok());
    }

    #[test]
    fn run_repeats_the_previous_pixel() {
        // 4x1: RGB, then a run of three
        let mut bytes = header_bytes(4, 1, 3, 0);
        bytes.extend_from_slice(&[0xFE, 9, 8, 7, 0xC0 | 2]);
        bytes.extend_from_slice(&PADDING);

        let image = decode(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(image.pixels, vec![9, 8, 7, 9, 8, 7, 9, 8, 7, 9, 8, 7]);
    }

    #[test]
    fn index_table_starts_all_zero_including_alpha() {
        // A fully transparent black pixel hashes to slot 0, which holds
        // (0, 0, 0, 0) before any pixel was seen. INDEX 0 as the very
        // first op must therefore produce transparent black.
        let mut bytes = header_bytes(1, 1, 4, 0);
        bytes.push(0x00);
        bytes.extend_from_slice(&PADDING);

        let image = decode(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(image.pixels, vec![0, 0, 0, 0]);
    }

    #[test]
    fn grey_request_collapses_rgba() {
        let mut bytes = header_bytes(1, 1, 4, 0);
        bytes.extend_from_slice(&[0xFF, 200, 100, 50, 77]);
        bytes.extend_from_slice(&PADDING);

        let options = DecodeOptions {
            desired_channels: Some(PixelFormat::Grey),
            ..Default::default()
        };
        let image = decode(&bytes, &options).unwrap();
        let y = ((77 * 200u32 + 150 * 100 + 29 * 50) >> 8) as u8;
        assert_eq!(image.pixels, vec![y]);
        assert_eq!(image.channels, PixelFormat::Grey);
        assert_eq!(image.source_channels, Channels::Rgba);

        let options = DecodeOptions {
            desired_channels: Some(PixelFormat::GreyAlpha),
            ..Default::default()
        };
        let image = decode(&bytes, &options).unwrap();
        assert_eq!(image.pixels, vec![y, 77]);
    }

    #[test]
    fn rgb_file_expands_to_rgba_on_request() {
        let mut bytes = header_bytes(1, 1, 3, 0);
        bytes.extend_from_slice(&[0xFE, 1, 2, 3]);
        bytes.extend_from_slice(&PADDING);

        let options = DecodeOptions {
            desired_channels: Some(PixelFormat::Rgba),
            ..Default::default()
        };
        let image = decode(&bytes, &options).unwrap();
        assert_eq!(image.pixels, vec![1, 2, 3, 255]);
        assert_eq!(image.source_channels, Channels::Rgb);
    }

    #[test]
    fn flip_on_load_reverses_rows() {
        // 1x2: two RGB pixels
        let mut bytes = header_bytes(1, 2, 3, 0);
        bytes.extend_from_slice(&[0xFE, 1, 1, 1, 0xFE, 2, 2, 2]);
        bytes.extend_from_slice(&PADDING);

        let options = DecodeOptions {
            flip_vertical: true,
            ..Default::default()
        };
        let image = decode(&bytes, &options).unwrap();
        assert_eq!(image.pixels, vec![2, 2, 2, 1, 1, 1]);
    }

    #[test]
    fn widened_and_float_decodes_match_the_8_bit_one() {
        let mut bytes = header_bytes(1, 1, 3, 0);
        bytes.extend_from_slice(&[0xFE, 0, 128, 255]);
        bytes.extend_from_slice(&PADDING);

        let image = decode_16(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(image.pixels, vec![0, 0x8080, 0xFFFF]);

        let options = DecodeOptions {
            hdr_gamma: 1.0,
            hdr_scale: 2.0,
            ..Default::default()
        };
        let image = decode_f32(&bytes, &options).unwrap();
        assert_eq!(image.pixels[0], 0.0);
        assert!((image.pixels[2] - 2.0).abs() < 1e-6);
    }
}
