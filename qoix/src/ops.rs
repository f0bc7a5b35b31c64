//! The six QOI wire primitives and the running pixel state they act on.

use std::io::{self, Read, Write};

use byteorder::ReadBytesExt;

use crate::stream::ByteStream;

pub(crate) const OP_INDEX: u8 = 0x00; /* 00xxxxxx */
pub(crate) const OP_DIFF: u8 = 0x40; /* 01xxxxxx */
pub(crate) const OP_LUMA: u8 = 0x80; /* 10xxxxxx */
pub(crate) const OP_RUN: u8 = 0xc0; /* 11xxxxxx */
pub(crate) const OP_RGB: u8 = 0xfe; /* 11111110 */
pub(crate) const OP_RGBA: u8 = 0xff; /* 11111111 */

const MASK_2: u8 = 0xc0;

/// An RGBA pixel. Pixels compare by their full 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// Initial previous-pixel register on both codec ends.
    pub const START: Rgba = Rgba::new(0, 0, 0, 255);

    /// Initial value of every table slot. The alpha really is 0 here, not
    /// 255; a fully transparent black pixel hits slot 0 without ever
    /// having been written.
    pub const ZERO: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba { r, g, b, a }
    }

    /// Table slot for this pixel: `(3r + 5g + 7b + 11a) & 63`.
    pub const fn hash(self) -> usize {
        let h = self
            .r
            .wrapping_mul(3)
            .wrapping_add(self.g.wrapping_mul(5))
            .wrapping_add(self.b.wrapping_mul(7))
            .wrapping_add(self.a.wrapping_mul(11));
        (h & 63) as usize
    }
}

/// One decoded wire chunk.
///
/// `Diff` and `Luma` carry the raw biased fields exactly as stored on the
/// wire; [`Op::apply`] removes the bias with wrapping arithmetic. `Run`
/// carries the decoded length (1..=62).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Rgb { r: u8, g: u8, b: u8 },
    Rgba { r: u8, g: u8, b: u8, a: u8 },
    Index(u8),
    Diff { dr: u8, dg: u8, db: u8 },
    Luma { dg: u8, dr_dg: u8, db_dg: u8 },
    Run(u8),
}

impl Op {
    /// Reads one op from the stream. The two 8-bit tags take precedence
    /// over the 2-bit tags.
    pub fn read(stream: &mut ByteStream<'_>) -> io::Result<Op> {
        let tag = stream.read_u8()?;
        Ok(match tag {
            OP_RGB => {
                let mut rgb = [0; 3];
                stream.read_exact(&mut rgb)?;
                Op::Rgb {
                    r: rgb[0],
                    g: rgb[1],
                    b: rgb[2],
                }
            }
            OP_RGBA => {
                let mut rgba = [0; 4];
                stream.read_exact(&mut rgba)?;
                Op::Rgba {
                    r: rgba[0],
                    g: rgba[1],
                    b: rgba[2],
                    a: rgba[3],
                }
            }
            _ => match tag & MASK_2 {
                OP_INDEX => Op::Index(tag & 0x3f),
                OP_DIFF => Op::Diff {
                    dr: (tag >> 4) & 0x03,
                    dg: (tag >> 2) & 0x03,
                    db: tag & 0x03,
                },
                OP_LUMA => {
                    let second = stream.read_u8()?;
                    Op::Luma {
                        dg: tag & 0x3f,
                        dr_dg: second >> 4,
                        db_dg: second & 0x0f,
                    }
                }
                OP_RUN => Op::Run((tag & 0x3f) + 1),
                _ => unreachable!(),
            },
        })
    }

    /// The pixel this op produces given the running state. `Run` yields
    /// `prev`; the caller repeats it.
    pub fn apply(self, prev: Rgba, index: &[Rgba; 64]) -> Rgba {
        match self {
            Op::Rgb { r, g, b } => Rgba::new(r, g, b, prev.a),
            Op::Rgba { r, g, b, a } => Rgba::new(r, g, b, a),
            Op::Index(slot) => index[slot as usize],
            Op::Diff { dr, dg, db } => Rgba::new(
                prev.r.wrapping_add(dr.wrapping_sub(2)),
                prev.g.wrapping_add(dg.wrapping_sub(2)),
                prev.b.wrapping_add(db.wrapping_sub(2)),
                prev.a,
            ),
            Op::Luma { dg, dr_dg, db_dg } => {
                let vg = dg.wrapping_sub(32);
                let vr = vg.wrapping_sub(8).wrapping_add(dr_dg);
                let vb = vg.wrapping_sub(8).wrapping_add(db_dg);
                Rgba::new(
                    prev.r.wrapping_add(vr),
                    prev.g.wrapping_add(vg),
                    prev.b.wrapping_add(vb),
                    prev.a,
                )
            }
            Op::Run(_) => prev,
        }
    }

    /// Serializes the op in its wire form.
    pub fn write_to<W: Write>(self, w: &mut W) -> io::Result<()> {
        match self {
            Op::Rgb { r, g, b } => w.write_all(&[OP_RGB, r, g, b]),
            Op::Rgba { r, g, b, a } => w.write_all(&[OP_RGBA, r, g, b, a]),
            Op::Index(slot) => w.write_all(&[OP_INDEX | slot]),
            Op::Diff { dr, dg, db } => w.write_all(&[OP_DIFF | dr << 4 | dg << 2 | db]),
            Op::Luma { dg, dr_dg, db_dg } => w.write_all(&[OP_LUMA | dg, dr_dg << 4 | db_dg]),
            Op::Run(len) => {
                debug_assert!((1..=62).contains(&len));
                w.write_all(&[OP_RUN | (len - 1)])
            }
        }
    }

    /// Chooses the narrowest representation for `px` given the running
    /// state. Never returns `Run`; run grouping happens before op choice.
    ///
    /// On an `Index` hit the table slot already matches and must not be
    /// rewritten; for every other result the caller stores `px` into its
    /// slot.
    pub fn pick(px: Rgba, prev: Rgba, index: &[Rgba; 64]) -> Op {
        let slot = px.hash();
        if index[slot] == px {
            return Op::Index(slot as u8);
        }

        if px.a == prev.a {
            let dr = px.r.wrapping_sub(prev.r) as i8;
            let dg = px.g.wrapping_sub(prev.g) as i8;
            let db = px.b.wrapping_sub(prev.b) as i8;

            if matches!((dr, dg, db), (-2..=1, -2..=1, -2..=1)) {
                return Op::Diff {
                    dr: (dr + 2) as u8,
                    dg: (dg + 2) as u8,
                    db: (db + 2) as u8,
                };
            }

            let dr_dg = dr.wrapping_sub(dg);
            let db_dg = db.wrapping_sub(dg);
            if matches!((dg, dr_dg, db_dg), (-32..=31, -8..=7, -8..=7)) {
                return Op::Luma {
                    dg: (dg + 32) as u8,
                    dr_dg: (dr_dg + 8) as u8,
                    db_dg: (db_dg + 8) as u8,
                };
            }

            return Op::Rgb {
                r: px.r,
                g: px.g,
                b: px.b,
            };
        }

        Op::Rgba {
            r: px.r,
            g: px.g,
            b: px.b,
            a: px.a,
        }
    }
}
