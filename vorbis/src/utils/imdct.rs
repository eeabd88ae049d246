//! Inverse Modified Discrete Cosine Transform.
//!
//! Maps `n/2` frequency coefficients to `n` time-domain samples with the
//! TDAC output ordering the overlap-add stage expects:
//!
//! `y[j] = sum_k X[k] * cos(pi/(2n) * (2j + 1 + n/2) * (2k + 1))`
//!
//! Realized as a DCT-IV of length `n/2` computed through a pre/post-twiddled
//! complex FFT of length `n/4`, followed by the three-segment TDAC unpack.
//! Twiddle tables and scratch buffers are owned by the instance; `backward`
//! does not allocate. A stream needs exactly two instances, one per
//! blocksize.

use std::f32::consts::PI;
use std::f64::consts::PI as PI64;

#[derive(Debug)]
pub struct Imdct {
    n: usize,
    /// Pre-twiddles `e^(-i*pi*(4r+1)/(2n))`, one per FFT slot.
    pre: Vec<(f32, f32)>,
    /// Post-twiddles `e^(-i*2*pi*k/n)`, one per FFT slot.
    post: Vec<(f32, f32)>,
    /// Interleaved complex FFT workspace, `n/4` elements.
    scratch: Vec<f32>,
    /// DCT-IV output, `n/2` elements.
    dct: Vec<f32>,
}

impl Imdct {
    /// Builds the tables for transform length `n` (the window size, a power
    /// of two; the spectrum has `n/2` coefficients).
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two() && n >= 16, "invalid IMDCT length {n}");

        let quarter = n / 4;
        let mut pre = Vec::with_capacity(quarter);
        let mut post = Vec::with_capacity(quarter);
        for r in 0..quarter {
            let a = PI64 * (4 * r + 1) as f64 / (2 * n) as f64;
            pre.push((a.cos() as f32, (-a.sin()) as f32));
            let b = 2.0 * PI64 * r as f64 / n as f64;
            post.push((b.cos() as f32, (-b.sin()) as f32));
        }

        Self {
            n,
            pre,
            post,
            scratch: vec![0.0; n / 2],
            dct: vec![0.0; n / 2],
        }
    }

    /// The window size `n`.
    pub fn window_len(&self) -> usize {
        self.n
    }

    /// Inverse transform: `spectrum` has `n/2` coefficients, `out` receives
    /// `n` time-domain samples.
    pub fn backward(&mut self, spectrum: &[f32], out: &mut [f32]) {
        let n = self.n;
        let half = n / 2;
        let quarter = n / 4;

        assert_eq!(spectrum.len(), half);
        assert_eq!(out.len(), n);

        // Pair even coefficients with reversed odd ones and pre-rotate.
        for r in 0..quarter {
            let re = spectrum[2 * r];
            let im = spectrum[half - 1 - 2 * r];
            let (wr, wi) = self.pre[r];
            self.scratch[2 * r] = re * wr - im * wi;
            self.scratch[2 * r + 1] = re * wi + im * wr;
        }

        fft_forward(&mut self.scratch);

        // Post-rotate; each FFT bin yields one even- and one odd-indexed
        // DCT-IV output.
        for k in 0..quarter {
            let zr = self.scratch[2 * k];
            let zi = self.scratch[2 * k + 1];
            let (wr, wi) = self.post[k];
            let vr = zr * wr - zi * wi;
            let vi = zr * wi + zi * wr;
            self.dct[2 * k] = vr;
            self.dct[half - 1 - 2 * k] = -vi;
        }

        // TDAC unpack of the DCT-IV block into the full window.
        for j in 0..quarter {
            out[j] = self.dct[j + quarter];
        }
        for j in quarter..3 * quarter {
            out[j] = -self.dct[3 * quarter - 1 - j];
        }
        for j in 3 * quarter..n {
            out[j] = -self.dct[j - 3 * quarter];
        }
    }
}

/// In-place forward DFT over interleaved complex values, radix-2
/// decimation-in-time with bit-reversal reordering.
fn fft_forward(buf: &mut [f32]) {
    let n = buf.len() / 2;
    debug_assert!(n.is_power_of_two());

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;

        if i < j {
            buf.swap(2 * i, 2 * j);
            buf.swap(2 * i + 1, 2 * j + 1);
        }
    }

    let mut step = 1;
    while step < n {
        let step2 = step * 2;
        let theta = PI / step as f32;

        for k in (0..n).step_by(step2) {
            for j in 0..step {
                let angle = theta * j as f32;
                let wr = angle.cos();
                let wi = -angle.sin();

                let i1 = k + j;
                let i2 = i1 + step;

                let tr = wr * buf[2 * i2] - wi * buf[2 * i2 + 1];
                let ti = wr * buf[2 * i2 + 1] + wi * buf[2 * i2];

                buf[2 * i2] = buf[2 * i1] - tr;
                buf[2 * i2 + 1] = buf[2 * i1 + 1] - ti;
                buf[2 * i1] += tr;
                buf[2 * i1 + 1] += ti;
            }
        }
        step = step2;
    }
}

#[cfg(test)]
fn imdct_reference(spectrum: &[f32], n: usize) -> Vec<f64> {
    let half = n / 2;
    (0..n)
        .map(|i| {
            (0..half)
                .map(|k| {
                    let angle = PI64 / (2 * n) as f64
                        * ((2 * i + 1 + half) * (2 * k + 1)) as f64;
                    spectrum[k] as f64 * angle.cos()
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
fn pseudo_random_spectrum(len: usize, mut seed: u32) -> Vec<f32> {
    (0..len)
        .map(|_| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        })
        .collect()
}

#[test]
fn test_backward_matches_reference() {
    for (n, seed) in [(16, 7), (64, 1), (128, 2), (256, 3)] {
        let spectrum = pseudo_random_spectrum(n / 2, seed);
        let mut imdct = Imdct::new(n);
        let mut out = vec![0.0f32; n];
        imdct.backward(&spectrum, &mut out);

        let reference = imdct_reference(&spectrum, n);
        for (i, (&fast, &slow)) in out.iter().zip(reference.iter()).enumerate() {
            let err = (fast as f64 - slow).abs();
            assert!(
                err < 1e-3 * (1.0 + slow.abs()),
                "n={n} sample {i}: fast {fast} vs reference {slow}"
            );
        }
    }
}

#[test]
fn test_backward_impulse_is_cosine() {
    // A single bin decodes to a pure cosine of the matching frequency.
    let n = 64;
    let mut spectrum = vec![0.0f32; n / 2];
    spectrum[3] = 1.0;
    let mut imdct = Imdct::new(n);
    let mut out = vec![0.0f32; n];
    imdct.backward(&spectrum, &mut out);

    for (i, &y) in out.iter().enumerate() {
        let expected =
            (PI64 / (2 * n) as f64 * ((2 * i + 1 + n / 2) * 7) as f64).cos();
        assert!((y as f64 - expected).abs() < 1e-4, "sample {i}");
    }
}

#[test]
fn test_output_tdac_symmetry() {
    // The decoded window is odd-symmetric about n/4 and even-symmetric
    // about 3n/4, which the overlap-add relies on.
    let n = 128;
    let spectrum = pseudo_random_spectrum(n / 2, 42);
    let mut imdct = Imdct::new(n);
    let mut out = vec![0.0f32; n];
    imdct.backward(&spectrum, &mut out);

    let quarter = n / 4;
    for i in 0..quarter {
        let a = out[quarter + i];
        let b = out[quarter - 1 - i];
        assert!((a + b).abs() < 1e-4, "odd symmetry at {i}");

        let c = out[3 * quarter + i];
        let d = out[3 * quarter - 1 - i];
        assert!((c - d).abs() < 1e-4, "even symmetry at {i}");
    }
}
