//! Floor configuration and curve synthesis.
//!
//! A floor is the smoothed spectral envelope multiplied into the residue
//! before the inverse MDCT. Type 0 (LSP-based) configurations parse but
//! their synthesis is not supported; type 1 renders a piecewise-linear curve
//! over a fixed X grid and maps it through a 256-entry inverse-dB table.

use anyhow::{Result, bail};

use crate::structs::codebook::Codebook;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::FloorError;
use crate::utils::ilog;
use crate::utils::tap::DebugTap;

/// Tagged floor configuration. Both variants share the decode contract:
/// fill `out` with the curve and report whether the channel carries energy.
#[derive(Debug, Clone)]
pub enum Floor {
    Zero(Floor0),
    One(Floor1),
}

impl Floor {
    pub fn parse(reader: &mut BsIoSliceReader, num_codebooks: usize) -> Result<Self> {
        let floor_type = reader.get_n::<u16>(16)?;
        match floor_type {
            0 => Ok(Floor::Zero(Floor0::parse(reader, num_codebooks)?)),
            1 => Ok(Floor::One(Floor1::parse(reader, num_codebooks)?)),
            t => bail!(FloorError::InvalidType(t)),
        }
    }

    /// Decodes one channel's floor from an audio packet into `out` (half a
    /// window long). Returns false when the channel is silent this packet,
    /// in which case `out` is untouched.
    pub fn decode(
        &self,
        reader: &mut BsIoSliceReader,
        codebooks: &[Codebook],
        out: &mut [f32],
        tap: &mut DebugTap,
    ) -> Result<bool> {
        match self {
            Floor::Zero(floor) => floor.decode(reader, codebooks, out),
            Floor::One(floor) => floor.decode(reader, codebooks, out, tap),
        }
    }
}

/// Type-0 floor configuration (LSP). Parse-only.
#[derive(Debug, Clone)]
pub struct Floor0 {
    pub order: u8,
    pub rate: u16,
    pub bark_map_size: u16,
    pub amplitude_bits: u8,
    pub amplitude_offset: u8,
    pub books: Vec<u8>,
}

impl Floor0 {
    fn parse(reader: &mut BsIoSliceReader, num_codebooks: usize) -> Result<Self> {
        let order = reader.get_n(8)?;
        let rate = reader.get_n(16)?;
        let bark_map_size = reader.get_n(16)?;
        let amplitude_bits = reader.get_n(6)?;
        let amplitude_offset = reader.get_n(8)?;
        let num_books = reader.get_n::<u8>(4)? as usize + 1;

        let mut books = Vec::with_capacity(num_books);
        for _ in 0..num_books {
            let book = reader.get_n::<u8>(8)?;
            if book as usize >= num_codebooks {
                bail!(FloorError::BookOutOfRange {
                    index: book as usize,
                    count: num_codebooks,
                });
            }
            books.push(book);
        }

        Ok(Self {
            order,
            rate,
            bark_map_size,
            amplitude_bits,
            amplitude_offset,
            books,
        })
    }

    fn decode(
        &self,
        _reader: &mut BsIoSliceReader,
        _codebooks: &[Codebook],
        _out: &mut [f32],
    ) -> Result<bool> {
        bail!(FloorError::Floor0SynthesisUnsupported)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FloorClass {
    pub dimensions: u8,
    pub subclass: u8,
    pub masterbook: u8,
    /// Subordinate book per subclass value; -1 means "transmit literal 0".
    pub subclass_books: Vec<i32>,
}

/// Type-1 floor configuration.
#[derive(Debug, Clone)]
pub struct Floor1 {
    pub partition_classes: Vec<u8>,
    pub classes: Vec<FloorClass>,
    /// In [1, 4]; scales Y values and selects the amplitude range.
    pub multiplier: u8,
    pub range_bits: u8,
    /// X coordinates in transmission order; starts with [0, 2^range_bits].
    pub xs: Vec<u32>,
    /// Permutation of `xs` indices, ascending by X value.
    xs_sorted_idx: Vec<usize>,
    xs_sorted: Vec<u32>,
}

impl Floor1 {
    fn parse(reader: &mut BsIoSliceReader, num_codebooks: usize) -> Result<Self> {
        let num_partitions = reader.get_n::<u8>(5)? as usize;
        let mut partition_classes = Vec::with_capacity(num_partitions);
        let mut max_class = -1i32;
        for _ in 0..num_partitions {
            let class: u8 = reader.get_n(4)?;
            max_class = max_class.max(class as i32);
            partition_classes.push(class);
        }

        let mut classes = Vec::with_capacity((max_class + 1) as usize);
        for _ in 0..max_class + 1 {
            let mut cl = FloorClass {
                dimensions: reader.get_n::<u8>(3)? + 1,
                subclass: reader.get_n(2)?,
                ..Default::default()
            };
            if cl.subclass > 0 {
                cl.masterbook = reader.get_n(8)?;
                if cl.masterbook as usize >= num_codebooks {
                    bail!(FloorError::BookOutOfRange {
                        index: cl.masterbook as usize,
                        count: num_codebooks,
                    });
                }
            }
            for _ in 0..1usize << cl.subclass {
                let book = reader.get_n::<u8>(8)? as i32 - 1;
                if book >= 0 && book as usize >= num_codebooks {
                    bail!(FloorError::BookOutOfRange {
                        index: book as usize,
                        count: num_codebooks,
                    });
                }
                cl.subclass_books.push(book);
            }
            classes.push(cl);
        }

        let multiplier = reader.get_n::<u8>(2)? + 1;
        let range_bits = reader.get_n::<u8>(4)?;

        let mut xs = vec![0u32, 1 << range_bits];
        for &class_idx in &partition_classes {
            let cl = classes.get(class_idx as usize).ok_or_else(|| {
                FloorError::ClassOutOfRange {
                    index: class_idx as usize,
                    count: classes.len(),
                }
            })?;
            for _ in 0..cl.dimensions {
                xs.push(reader.get_n(range_bits as u32)?);
            }
        }

        let mut xs_sorted_idx: Vec<usize> = (0..xs.len()).collect();
        xs_sorted_idx.sort_by_key(|&i| xs[i]);
        let xs_sorted: Vec<u32> = xs_sorted_idx.iter().map(|&i| xs[i]).collect();
        for pair in xs_sorted.windows(2) {
            if pair[0] == pair[1] {
                bail!(FloorError::DuplicateX(pair[0]));
            }
        }

        Ok(Self {
            partition_classes,
            classes,
            multiplier,
            range_bits,
            xs,
            xs_sorted_idx,
            xs_sorted,
        })
    }

    fn decode(
        &self,
        reader: &mut BsIoSliceReader,
        codebooks: &[Codebook],
        out: &mut [f32],
        tap: &mut DebugTap,
    ) -> Result<bool> {
        if !reader.get()? {
            // Valid: the channel contributes no energy this packet.
            return Ok(false);
        }

        let range: u32 = match self.multiplier {
            1 => 256,
            2 => 128,
            3 => 86,
            4 => 64,
            m => unreachable!("multiplier {m} excluded at parse"),
        };

        // Y value decode.
        let b = ilog(range as u64 - 1);
        let mut ys: Vec<u32> = Vec::with_capacity(self.xs.len());
        ys.push(reader.get_n(b)?);
        ys.push(reader.get_n(b)?);
        for &class_idx in &self.partition_classes {
            let cl = &self.classes[class_idx as usize];
            let class_bits = cl.subclass;
            let csub = (1u32 << class_bits) - 1;
            let mut cval = 0u32;
            if class_bits > 0 {
                cval = codebooks[cl.masterbook as usize].decode_scalar(reader)?;
            }
            for _ in 0..cl.dimensions {
                let book = cl.subclass_books[(cval & csub) as usize];
                cval >>= class_bits;
                ys.push(if book >= 0 {
                    codebooks[book as usize].decode_scalar(reader)?
                } else {
                    0
                });
            }
        }
        tap.push_u32("floor1 ys", None, &ys)?;
        if ys.len() != self.xs.len() {
            bail!(FloorError::PointCountMismatch {
                ys: ys.len(),
                xs: self.xs.len(),
            });
        }

        // Amplitude value synthesis: entries 0 and 1 pass through, each
        // later point corrects the prediction between its neighbors.
        let range_i = range as i64;
        let mut step2_flag = vec![false; self.xs.len()];
        step2_flag[0] = true;
        step2_flag[1] = true;
        let mut final_ys = vec![0i64; self.xs.len()];
        final_ys[0] = ys[0] as i64;
        final_ys[1] = ys[1] as i64;
        for i in 2..self.xs.len() {
            let low_idx =
                low_neighbor(&self.xs, i).ok_or(FloorError::MissingNeighbor(i))?;
            let high_idx =
                high_neighbor(&self.xs, i).ok_or(FloorError::MissingNeighbor(i))?;
            let predicted = render_point(
                self.xs[low_idx],
                final_ys[low_idx],
                self.xs[high_idx],
                final_ys[high_idx],
                self.xs[i],
            );
            let val = ys[i] as i64;
            if predicted > range_i {
                bail!(FloorError::PredictionOutOfRange {
                    predicted,
                    range,
                });
            }
            let high_room = range_i - predicted;
            let low_room = predicted;
            let room = high_room.min(low_room) * 2;
            if val == 0 {
                step2_flag[i] = false;
                final_ys[i] = predicted;
            } else {
                step2_flag[low_idx] = true;
                step2_flag[high_idx] = true;
                step2_flag[i] = true;
                final_ys[i] = if val >= room {
                    if high_room > low_room {
                        val - low_room + predicted
                    } else {
                        predicted - val + high_room - 1
                    }
                } else if val % 2 == 1 {
                    predicted - (val + 1) / 2
                } else {
                    predicted + val / 2
                };
            }
        }
        let final_ys_u32: Vec<u32> = final_ys.iter().map(|&y| y as u32).collect();
        tap.push_u32("floor1 final_ys", None, &final_ys_u32)?;
        tap.push_bool("floor1 step2_flag", None, &step2_flag)?;

        // Curve synthesis: straight lines between consecutive used points in
        // ascending X order, extended flat to the end of the spectrum.
        let multiplier = self.multiplier as i64;
        let mut floor_y = vec![0i64; out.len()];
        let mut lx = 0u32;
        let mut hx = 0u32;
        let mut ly = final_ys[self.xs_sorted_idx[0]] * multiplier;
        let mut hy = 0i64;
        for i in 1..self.xs.len() {
            let idx = self.xs_sorted_idx[i];
            if step2_flag[idx] {
                hx = self.xs_sorted[i];
                hy = final_ys[idx] * multiplier;
                render_line(lx, ly, hx, hy, &mut floor_y);
                lx = hx;
                ly = hy;
            }
        }
        if (hx as usize) < out.len() {
            render_line(hx, hy, out.len() as u32, hy, &mut floor_y);
        }
        let floor_u32: Vec<u32> = floor_y.iter().map(|&y| y as u32).collect();
        tap.push_u32("floor1 floor", None, &floor_u32)?;

        for (sample, &y) in out.iter_mut().zip(floor_y.iter()) {
            if !(0..256).contains(&y) {
                bail!(FloorError::CurveOutOfRange(y));
            }
            *sample = INVERSE_DB_TABLE[y as usize];
        }

        Ok(true)
    }
}

/// Index `n < i` maximizing `v[n]` subject to `v[n] < v[i]`; ties resolve to
/// the first such index.
pub fn low_neighbor(v: &[u32], i: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    for n in 0..i {
        if v[n] < v[i] && best.is_none_or(|b| v[n] > v[b]) {
            best = Some(n);
        }
    }
    best
}

/// Index `n < i` minimizing `v[n]` subject to `v[n] > v[i]`; ties resolve to
/// the first such index.
pub fn high_neighbor(v: &[u32], i: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    for n in 0..i {
        if v[n] > v[i] && best.is_none_or(|b| v[n] < v[b]) {
            best = Some(n);
        }
    }
    best
}

/// Y value of the line through (x0, y0) and (x1, y1) at `x`, with the
/// truncating-division convention of the reference renderer.
pub fn render_point(x0: u32, y0: i64, x1: u32, y1: i64, x: u32) -> i64 {
    let dy = y1 - y0;
    let adx = (x1 - x0) as i64;
    let ady = dy.abs();
    let err = ady * (x - x0) as i64;
    let off = err / adx;
    if dy < 0 { y0 - off } else { y0 + off }
}

/// Renders the integer line from (x0, y0) to (x1, y1) into `v[x0..x1]`,
/// splitting the slope into an integer base step plus an error carry.
/// Positions at or beyond `v.len()` are dropped.
pub fn render_line(x0: u32, y0: i64, x1: u32, y1: i64, v: &mut [i64]) {
    debug_assert!(x0 < x1);
    let dy = y1 - y0;
    let adx = (x1 - x0) as i64;
    let base = dy / adx;
    let sy = if dy < 0 { base - 1 } else { base + 1 };
    let ady = dy.abs() - base.abs() * adx;

    let mut y = y0;
    let mut err = 0i64;
    if (x0 as usize) < v.len() {
        v[x0 as usize] = y;
    }
    for x in x0 + 1..x1 {
        err += ady;
        if err >= adx {
            err -= adx;
            y += sy;
        } else {
            y += base;
        }
        if (x as usize) < v.len() {
            v[x as usize] = y;
        }
    }
}

/// Maps synthesized floor values to spectral magnitudes.
pub static INVERSE_DB_TABLE: [f32; 256] = [
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07,
    1.3699951e-07, 1.4590251e-07, 1.5538408e-07, 1.6548181e-07,
    1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07,
    2.9163793e-07, 3.1059021e-07, 3.3077411e-07, 3.5226968e-07,
    3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07,
    6.2082472e-07, 6.6116941e-07, 7.0413592e-07, 7.4989464e-07,
    7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06,
    1.3215816e-06, 1.4074654e-06, 1.4989305e-06, 1.5963394e-06,
    1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06,
    2.8133190e-06, 2.9961443e-06, 3.1908506e-06, 3.3982101e-06,
    3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06,
    5.9888572e-06, 6.3780469e-06, 6.7925283e-06, 7.2339451e-06,
    7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05,
    1.2748789e-05, 1.3577278e-05, 1.4459606e-05, 1.5399272e-05,
    1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05,
    2.7139006e-05, 2.8902651e-05, 3.0780908e-05, 3.2781225e-05,
    3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05,
    5.7772202e-05, 6.1526565e-05, 6.5524908e-05, 6.9783085e-05,
    7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 0.00010181521, 0.00010843174, 0.00011547824,
    0.00012298267, 0.00013097477, 0.00013948625, 0.00014855085,
    0.00015820453, 0.00016848555, 0.00017943469, 0.00019109536,
    0.00020351382, 0.00021673929, 0.00023082423, 0.00024582449,
    0.00026179955, 0.00027881276, 0.00029693158, 0.00031622787,
    0.00033677814, 0.00035866388, 0.00038197188, 0.00040679456,
    0.00043323036, 0.00046138411, 0.00049136745, 0.00052329927,
    0.00055730621, 0.00059352311, 0.00063209358, 0.00067317058,
    0.00071691700, 0.00076350630, 0.00081312324, 0.00086596457,
    0.00092223983, 0.00098217216, 0.0010459992,  0.0011139742,
    0.0011863665,  0.0012634633,  0.0013455702,  0.0014330129,
    0.0015261382,  0.0016253153,  0.0017309374,  0.0018434235,
    0.0019632195,  0.0020908006,  0.0022266726,  0.0023713743,
    0.0025254795,  0.0026895994,  0.0028643847,  0.0030505286,
    0.0032487691,  0.0034598925,  0.0036847358,  0.0039241906,
    0.0041792066,  0.0044507950,  0.0047400328,  0.0050480668,
    0.0053761186,  0.0057254891,  0.0060975636,  0.0064938176,
    0.0069158225,  0.0073652516,  0.0078438871,  0.0083536271,
    0.0088964928,  0.009474637,   0.010090352,   0.010746080,
    0.011444421,   0.012188144,   0.012980198,   0.013823725,
    0.014722068,   0.015678791,   0.016697687,   0.017782797,
    0.018938423,   0.020169149,   0.021479854,   0.022875735,
    0.024362330,   0.025945531,   0.027631618,   0.029427276,
    0.031339626,   0.033376252,   0.035545228,   0.037855157,
    0.040315199,   0.042935108,   0.045725273,   0.048696758,
    0.051861348,   0.055231591,   0.058820850,   0.062643361,
    0.066714279,   0.071049749,   0.075666962,   0.080584227,
    0.085821044,   0.091398179,   0.097337747,   0.10366330,
    0.11039993,    0.11757434,    0.12521498,    0.13335215,
    0.14201813,    0.15124727,    0.16107617,    0.17154380,
    0.18269168,    0.19456402,    0.20720788,    0.22067342,
    0.23501402,    0.25028656,    0.26655159,    0.28387361,
    0.30232132,    0.32196786,    0.34289114,    0.36517414,
    0.38890521,    0.41417847,    0.44109412,    0.46975890,
    0.50028648,    0.53279791,    0.56742212,    0.60429640,
    0.64356699,    0.68538959,    0.72993007,    0.77736504,
    0.82788260,    0.88168307,    0.93897980,    1.0,
];

#[test]
fn test_render_point_real_stream_values() {
    assert_eq!(render_point(0, 28, 128, 67, 12), 31);
    assert_eq!(render_point(12, 38, 128, 67, 46), 46);
    assert_eq!(render_point(0, 28, 12, 38, 4), 31);
    assert_eq!(render_point(4, 33, 12, 38, 8), 35);
    assert_eq!(render_point(12, 38, 46, 31, 16), 38);
    assert_eq!(render_point(16, 30, 46, 31, 23), 30);
    assert_eq!(render_point(23, 40, 46, 31, 33), 37);
    assert_eq!(render_point(46, 31, 128, 67, 70), 41);
    assert_eq!(render_point(70, 20, 128, 67, 90), 36);
}

#[test]
fn test_neighbors() {
    let v = [1, 4, 2, 3, 6, 5];
    assert_eq!(low_neighbor(&v, 1), Some(0));
    assert_eq!(low_neighbor(&v, 2), Some(0));
    assert_eq!(low_neighbor(&v, 3), Some(2));
    assert_eq!(low_neighbor(&v, 4), Some(1));
    assert_eq!(low_neighbor(&v, 5), Some(1));
    assert_eq!(high_neighbor(&v, 2), Some(1));
    assert_eq!(high_neighbor(&v, 3), Some(1));
    assert_eq!(high_neighbor(&v, 5), Some(4));
    // No element before index 0; nothing bigger than the maximum.
    assert_eq!(low_neighbor(&v, 0), None);
    assert_eq!(high_neighbor(&v, 4), None);
}

#[test]
fn test_neighbors_real_stream_values() {
    let v = [0, 128, 12, 46, 4, 8, 16, 23, 33, 70, 2, 6, 10, 14, 19, 28, 39, 58, 90];
    assert_eq!(high_neighbor(&v, 2), Some(1));
    assert_eq!(high_neighbor(&v, 4), Some(2));
    assert_eq!(high_neighbor(&v, 9), Some(1));
    assert_eq!(high_neighbor(&v, 13), Some(6));
    assert_eq!(high_neighbor(&v, 17), Some(9));
    assert_eq!(low_neighbor(&v, 10), Some(0));
    assert_eq!(low_neighbor(&v, 18), Some(9));
}

#[test]
fn test_render_line_endpoints_and_monotonicity() {
    let mut v = vec![0i64; 128];
    render_line(0, 10, 128, 67, &mut v);
    assert_eq!(v[0], 10);
    assert!((v[127] - 67).abs() <= 1);
    for pair in v.windows(2) {
        assert!(pair[1] >= pair[0]);
    }

    let mut v = vec![0i64; 64];
    render_line(0, 50, 64, 3, &mut v);
    assert_eq!(v[0], 50);
    assert!((v[63] - 3).abs() <= 1);
    for pair in v.windows(2) {
        assert!(pair[1] <= pair[0]);
    }
}

#[test]
fn test_render_line_clamps_to_buffer() {
    let mut v = vec![0i64; 16];
    render_line(8, 4, 64, 40, &mut v);
    assert_eq!(v[7], 0);
    assert_eq!(v[8], 4);
    // Positions 16..64 fall outside the spectrum and are dropped.
    assert_eq!(v.len(), 16);
}

#[test]
fn test_floor1_decode_flat_curve() {
    use crate::testutil::BitWriter;

    // One partition of one dimension, no subordinate book: only the two
    // endpoint Y values are transmitted.
    let floor = Floor1 {
        partition_classes: vec![0],
        classes: vec![FloorClass {
            dimensions: 1,
            subclass: 0,
            masterbook: 0,
            subclass_books: vec![-1],
        }],
        multiplier: 1,
        range_bits: 7,
        xs: vec![0, 128, 64],
        xs_sorted_idx: vec![0, 2, 1],
        xs_sorted: vec![0, 64, 128],
    };

    let mut w = BitWriter::new();
    w.put(1, 1); // nonzero: floor present
    w.put(10, 8); // y[0]
    w.put(20, 8); // y[1]
    let bytes = w.finish();
    let mut reader = BsIoSliceReader::from_slice(&bytes);

    let mut out = vec![0.0f32; 64];
    let mut tap = DebugTap::null();
    let used = floor.decode(&mut reader, &[], &mut out, &mut tap).unwrap();
    assert!(used);

    // Line from (0,10) to (128,20): y[x] = 10 + 10x/128, truncated.
    assert_eq!(out[0], INVERSE_DB_TABLE[10]);
    assert_eq!(out[63], INVERSE_DB_TABLE[14]);

    // A leading zero bit means the floor is unused.
    let mut w = BitWriter::new();
    w.put(0, 1);
    let bytes = w.finish();
    let mut reader = BsIoSliceReader::from_slice(&bytes);
    let used = floor.decode(&mut reader, &[], &mut out, &mut tap).unwrap();
    assert!(!used);
}
