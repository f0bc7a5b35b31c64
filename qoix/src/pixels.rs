//! Post-decode pixel transforms: channel-count conversion, vertical flip,
//! 8-to-16-bit widening and LDR-to-HDR tone mapping.

use std::collections::TryReserveError;

/// Rec.601-style luma used when collapsing RGB to grey. The weights sum to
/// 256, so white maps to exactly 255.
pub(crate) fn grey(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}

/// Converts interleaved pixel data between channel counts, scanline by
/// scanline. Missing alpha fills with 255, grey replicates across RGB, and
/// RGB collapses to grey via [`grey`].
pub(crate) fn convert_channels(
    src: &[u8],
    width: usize,
    height: usize,
    from: usize,
    to: usize,
) -> Result<Vec<u8>, TryReserveError> {
    debug_assert_eq!(src.len(), width * height * from);

    if src.is_empty() {
        return Ok(Vec::new());
    }
    if from == to {
        let mut out = Vec::new();
        out.try_reserve_exact(src.len())?;
        out.extend_from_slice(src);
        return Ok(out);
    }

    let mut out = Vec::new();
    out.try_reserve_exact(width * height * to)?;

    for row in src.chunks_exact(width * from) {
        for px in row.chunks_exact(from) {
            let mut dst = [0u8; 4];
            match (from, to) {
                (1, 2) => dst = [px[0], 255, 0, 0],
                (1, 3) => dst = [px[0], px[0], px[0], 0],
                (1, 4) => dst = [px[0], px[0], px[0], 255],
                (2, 1) => dst[0] = px[0],
                (2, 3) => dst = [px[0], px[0], px[0], 0],
                (2, 4) => dst = [px[0], px[0], px[0], px[1]],
                (3, 1) => dst[0] = grey(px[0], px[1], px[2]),
                (3, 2) => dst = [grey(px[0], px[1], px[2]), 255, 0, 0],
                (3, 4) => dst = [px[0], px[1], px[2], 255],
                (4, 1) => dst[0] = grey(px[0], px[1], px[2]),
                (4, 2) => dst = [grey(px[0], px[1], px[2]), px[3], 0, 0],
                (4, 3) => dst = [px[0], px[1], px[2], 0],
                _ => unreachable!("channel conversion {from} -> {to}"),
            }
            out.extend_from_slice(&dst[..to]);
        }
    }

    Ok(out)
}

/// Swaps rows in place so the first row becomes the last.
pub(crate) fn flip_vertical(data: &mut [u8], row_len: usize) {
    if row_len == 0 {
        return;
    }
    let rows = data.len() / row_len;
    for r in 0..rows / 2 {
        let (head, tail) = data.split_at_mut((rows - 1 - r) * row_len);
        head[r * row_len..(r + 1) * row_len].swap_with_slice(&mut tail[..row_len]);
    }
}

/// Widens each component to 16 bits: `(v << 8) | v`, so 0 stays 0 and 255
/// becomes 0xFFFF.
pub(crate) fn widen_to_16(src: &[u8]) -> Result<Vec<u16>, TryReserveError> {
    let mut out = Vec::new();
    out.try_reserve_exact(src.len())?;
    out.extend(src.iter().map(|&v| u16::from(v) << 8 | u16::from(v)));
    Ok(out)
}

/// Maps 8-bit components to linear floats. Color components go through
/// `(v / 255) ^ gamma * scale`; alpha maps linearly. A component is alpha
/// exactly when the layout has an even channel count and it is the last
/// one.
pub(crate) fn ldr_to_hdr(
    src: &[u8],
    channels: usize,
    gamma: f32,
    scale: f32,
) -> Result<Vec<f32>, TryReserveError> {
    let alpha_at = (channels % 2 == 0).then(|| channels - 1);
    let mut out = Vec::new();
    out.try_reserve_exact(src.len())?;
    for px in src.chunks_exact(channels) {
        for (i, &v) in px.iter().enumerate() {
            let f = f32::from(v) / 255.0;
            out.push(if Some(i) == alpha_at {
                f
            } else {
                f.powf(gamma) * scale
            });
        }
    }
    Ok(out)
}
