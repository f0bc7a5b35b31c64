//! QOI encoding: source-pixel normalization, the op-selection cascade, and
//! the staged output writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use itertools::{Either, Itertools};
use snafu::{ensure, ResultExt, Snafu};

use crate::ops::{Op, Rgba};
use crate::{Channels, Colorspace, PixelFormat, MAGIC, PADDING};

#[derive(Debug, Snafu)]
pub enum EncodeError {
    #[snafu(display(
        "invalid dimensions: {width}x{height} at {channels} channels does not describe {len} bytes of pixel data"
    ))]
    InvalidDimensions {
        width: u32,
        height: u32,
        channels: u8,
        len: usize,
    },

    #[snafu(display("failed to write the encoded stream"))]
    WriteIo { source: io::Error },

    #[snafu(display("failed to create {}", path.display()))]
    Create { path: PathBuf, source: io::Error },
}

/// Per-call encoder settings.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Colorspace tag written to the header. Informational only.
    pub colorspace: Colorspace,
    /// Encode rows bottom-up, so a bottom-up source comes out top-down.
    pub flip_vertical: bool,
    /// Discard the alpha channel of 2- and 4-channel sources and write a
    /// 3-channel file. Translucent pixels are composited over a magenta
    /// background so dropped coverage stays visible.
    pub drop_alpha: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            colorspace: Colorspace::Srgb,
            flip_vertical: false,
            drop_alpha: false,
        }
    }
}

/// Batches op emission into 64-byte writes to the underlying sink.
struct StagedWriter<W> {
    inner: W,
    buf: [u8; 64],
    used: usize,
}

impl<W: Write> StagedWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buf: [0; 64],
            used: 0,
        }
    }

    fn flush_staged(&mut self) -> io::Result<()> {
        if self.used > 0 {
            self.inner.write_all(&self.buf[..self.used])?;
            self.used = 0;
        }
        Ok(())
    }
}

impl<W: Write> Write for StagedWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.used + data.len() > self.buf.len() {
            self.flush_staged()?;
        }
        if data.len() >= self.buf.len() {
            self.inner.write_all(data)?;
        } else {
            self.buf[self.used..self.used + data.len()].copy_from_slice(data);
            self.used += data.len();
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_staged()?;
        self.inner.flush()
    }
}

/// Running encoder state, mirroring the decoder's.
#[derive(Debug)]
pub struct EncodeContext {
    prev: Rgba,
    index: [Rgba; 64],
}

impl EncodeContext {
    pub const fn new() -> Self {
        Self {
            prev: Rgba::START,
            index: [Rgba::ZERO; 64],
        }
    }
}

impl Default for EncodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeContext {
    fn encode_pixels<W, I>(&mut self, w: &mut W, pixels: I) -> io::Result<()>
    where
        W: Write,
        I: Iterator<Item = Rgba>,
    {
        for (count, px) in pixels.dedup_with_count() {
            if px == self.prev {
                // the whole group continues the current run
                emit_runs(w, count)?;
                continue;
            }

            let op = Op::pick(px, self.prev, &self.index);
            if !matches!(op, Op::Index(_)) {
                self.index[px.hash()] = px;
            }
            op.write_to(w)?;
            self.prev = px;

            // the group's first pixel broke the run; the rest repeat it
            if count > 1 {
                emit_runs(w, count - 1)?;
            }
        }
        Ok(())
    }
}

fn emit_runs<W: Write>(w: &mut W, count: usize) -> io::Result<()> {
    for _ in 0..count / 62 {
        Op::Run(62).write_to(w)?;
    }
    let rest = count % 62;
    if rest > 0 {
        Op::Run(rest as u8).write_to(w)?;
    }
    Ok(())
}

/// Materializes one source pixel as RGBA. Grey replicates, missing alpha
/// is opaque.
fn normalize(px: &[u8], format: PixelFormat, drop_alpha: bool) -> Rgba {
    let px = match format {
        PixelFormat::Grey => Rgba::new(px[0], px[0], px[0], 255),
        PixelFormat::GreyAlpha => Rgba::new(px[0], px[0], px[0], px[1]),
        PixelFormat::Rgb => Rgba::new(px[0], px[1], px[2], 255),
        PixelFormat::Rgba => Rgba::new(px[0], px[1], px[2], px[3]),
    };
    if drop_alpha && format.has_alpha() {
        composite_over_magenta(px)
    } else {
        px
    }
}

/// `out = bg + (px - bg) * alpha / 255` against magenta (255, 0, 255).
fn composite_over_magenta(px: Rgba) -> Rgba {
    let blend =
        |d: u8, bg: i32| -> u8 { (bg + (i32::from(d) - bg) * i32::from(px.a) / 255) as u8 };
    Rgba::new(blend(px.r, 255), blend(px.g, 0), blend(px.b, 255), 255)
}

/// Encodes interleaved pixels as a QOI stream into `writer`.
///
/// `pixels` must hold exactly `width * height * channels.count()` bytes.
/// The file stores 3 channels for grey/RGB sources (or when
/// [`EncodeOptions::drop_alpha`] is set) and 4 otherwise.
pub fn encode<W: Write>(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: PixelFormat,
    writer: W,
    options: &EncodeOptions,
) -> Result<(), EncodeError> {
    let bpp = channels.count();
    let px_count = u64::from(width) * u64::from(height);
    ensure!(
        width > 0
            && height > 0
            && px_count * bpp as u64 <= i32::MAX as u64
            && pixels.len() as u64 == px_count * bpp as u64,
        InvalidDimensionsSnafu {
            width,
            height,
            channels: bpp as u8,
            len: pixels.len(),
        }
    );

    let file_channels = if channels.has_alpha() && !options.drop_alpha {
        Channels::Rgba
    } else {
        Channels::Rgb
    };

    let mut w = StagedWriter::new(writer);
    w.write_all(&MAGIC).context(WriteIoSnafu)?;
    w.write_u32::<BigEndian>(width).context(WriteIoSnafu)?;
    w.write_u32::<BigEndian>(height).context(WriteIoSnafu)?;
    w.write_all(&[file_channels as u8, options.colorspace as u8])
        .context(WriteIoSnafu)?;

    let stride = width as usize * bpp;
    let rows = pixels.chunks_exact(stride);
    let rows = if options.flip_vertical {
        Either::Left(rows.rev())
    } else {
        Either::Right(rows)
    };
    let normalized = rows
        .flat_map(|row| row.chunks_exact(bpp))
        .map(|px| normalize(px, channels, options.drop_alpha));

    let mut ctx = EncodeContext::new();
    ctx.encode_pixels(&mut w, normalized).context(WriteIoSnafu)?;

    w.write_all(&PADDING).context(WriteIoSnafu)?;
    w.flush().context(WriteIoSnafu)?;
    Ok(())
}

/// [`encode`] into a freshly allocated `Vec`, sized for the worst case up
/// front.
pub fn encode_to_vec(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: PixelFormat,
    options: &EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    let px_count = width as usize * height as usize;
    let mut out = Vec::with_capacity(MAGIC.len() + 10 + px_count * 5 + PADDING.len());
    encode(pixels, width, height, channels, &mut out, options)?;
    Ok(out)
}

/// [`encode`] straight into a newly created file.
pub fn encode_path<P: AsRef<Path>>(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: PixelFormat,
    path: P,
    options: &EncodeOptions,
) -> Result<(), EncodeError> {
    let path = path.as_ref();
    let file = File::create(path).context(CreateSnafu { path })?;
    encode(pixels, width, height, channels, BufWriter::new(file), options)
}
