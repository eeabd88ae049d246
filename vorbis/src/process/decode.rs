//! Per-stream packet decoding.
//!
//! A [`StreamDecoder`] owns one logical stream: the identification header,
//! the immutable setup, the two IMDCT instances and the overlap-add
//! [`DecodeState`]. Packets arrive in stream order from the router; the
//! first three are id, comment and setup, everything after is audio.
//!
//! Audio decode follows a strict order: packet type and mode, window flags,
//! per-channel floor decode, nonzero-vector propagation, per-submap residue
//! decode, inverse coupling in reverse order, floor product, inverse MDCT,
//! windowed overlap-add, cursor advance with PCM emission.

use anyhow::{Result, bail, ensure};
use log::{debug, trace};

use crate::process::{Control, DecodeCallbacks};
use crate::structs::floor::Floor;
use crate::structs::id_header::IdHeader;
use crate::structs::setup::Setup;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{DecodeError, HeaderError};
use crate::utils::ilog;
use crate::utils::imdct::Imdct;
use crate::utils::tap::DebugTap;

/// Packet type bytes of the three header packets.
pub const PACKET_TYPE_ID: u8 = 1;
pub const PACKET_TYPE_COMMENT: u8 = 3;
pub const PACKET_TYPE_SETUP: u8 = 5;

const HEADER_MAGIC: &[u8; 6] = b"vorbis";

/// Name announced to the debug tap.
const DECODER_NAME: &str = "vorbis";

/// Validates the `[type][\"vorbis\"]` prelude of a header packet and returns
/// the body after it.
pub(crate) fn check_packet_prelude(data: &[u8], expected_type: u8) -> Result<&[u8]> {
    if data.len() < 16 {
        bail!(HeaderError::PacketTooShort(data.len()));
    }
    if data[0] != expected_type {
        bail!(HeaderError::InvalidPacketType {
            read: data[0],
            expected: expected_type,
        });
    }
    let magic: [u8; 6] = data[1..7].try_into().expect("slice length");
    if &magic != HEADER_MAGIC {
        bail!(HeaderError::InvalidMagic(magic));
    }

    Ok(&data[7..])
}

/// Decoder for one logical stream.
pub struct StreamDecoder {
    pub serial: u32,
    header: Option<IdHeader>,
    setup: Option<Setup>,
    /// IMDCT instances for blocksize_0 and blocksize_1.
    imdct: Option<[Imdct; 2]>,
    state: DecodeState,
    packet_count: u64,
    audio_packet_count: u64,
}

impl StreamDecoder {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            header: None,
            setup: None,
            imdct: None,
            state: DecodeState::default(),
            packet_count: 0,
            audio_packet_count: 0,
        }
    }

    pub fn header(&self) -> Option<&IdHeader> {
        self.header.as_ref()
    }

    pub fn setup(&self) -> Option<&Setup> {
        self.setup.as_ref()
    }

    /// Routes one packet by the stream's packet counter.
    pub fn handle_packet<C: DecodeCallbacks>(
        &mut self,
        data: &[u8],
        callbacks: &mut C,
        tap: &mut DebugTap,
    ) -> Result<()> {
        let index = self.packet_count;
        self.packet_count += 1;
        match index {
            0 => self.parse_id(data, callbacks),
            1 => self.parse_comment(data),
            2 => self.parse_setup(data, callbacks, tap),
            _ => self.parse_audio(data, callbacks, tap),
        }
    }

    fn parse_id<C: DecodeCallbacks>(&mut self, data: &[u8], callbacks: &mut C) -> Result<()> {
        let body = check_packet_prelude(data, PACKET_TYPE_ID)?;
        let header = IdHeader::parse(body)?;
        debug!(
            "stream {:#010X}: {} channels, {} Hz, blocksizes {}/{}",
            self.serial,
            header.audio_channels,
            header.audio_sample_rate,
            header.blocksize_0(),
            header.blocksize_1()
        );
        self.header = Some(header);

        if callbacks.got_header(&header) == Control::Stop {
            bail!(DecodeError::CallbackStop);
        }
        Ok(())
    }

    fn parse_comment(&mut self, data: &[u8]) -> Result<()> {
        // Only the prelude is validated; the metadata body is skipped.
        check_packet_prelude(data, PACKET_TYPE_COMMENT)?;
        trace!("stream {:#010X}: comment header ({} bytes)", self.serial, data.len());
        Ok(())
    }

    fn parse_setup<C: DecodeCallbacks>(
        &mut self,
        data: &[u8],
        callbacks: &mut C,
        tap: &mut DebugTap,
    ) -> Result<()> {
        let body = check_packet_prelude(data, PACKET_TYPE_SETUP)?;
        let header = self.header.ok_or(DecodeError::SetupBeforeId)?;

        let mut reader = BsIoSliceReader::from_slice(body);
        let setup = Setup::parse(&mut reader, &header)?;

        let blocksize_0 = header.blocksize_0() as usize;
        let blocksize_1 = header.blocksize_1() as usize;
        self.imdct = Some([Imdct::new(blocksize_0), Imdct::new(blocksize_1)]);
        // Generous ring; anything holding one long window on each side of
        // the cursor would do.
        self.state
            .init(header.audio_channels, blocksize_0 * 5 + blocksize_1 * 5);

        tap.begin_stream(DECODER_NAME, header.audio_sample_rate, header.audio_channels)?;
        for floor in &setup.floors {
            if let Floor::One(floor1) = floor {
                tap.push_u8("floor1_unpack multiplier", None, &[floor1.multiplier])?;
                tap.push_u32("floor1_unpack xs", None, &floor1.xs)?;
            }
        }
        tap.push_u8("finish_setup", None, &[])?;

        let stop = callbacks.got_setup(&setup) == Control::Stop;
        self.setup = Some(setup);
        if stop {
            bail!(DecodeError::CallbackStop);
        }
        Ok(())
    }

    fn parse_audio<C: DecodeCallbacks>(
        &mut self,
        data: &[u8],
        callbacks: &mut C,
        tap: &mut DebugTap,
    ) -> Result<()> {
        let header = self.header.ok_or(DecodeError::AudioBeforeSetup)?;
        let setup = self.setup.as_ref().ok_or(DecodeError::AudioBeforeSetup)?;
        let imdct = self
            .imdct
            .as_mut()
            .ok_or(DecodeError::AudioBeforeSetup)?;
        let state = &mut self.state;

        tap.push_u8("start_audio_packet", None, &[])?;
        let mut reader = BsIoSliceReader::from_slice(data);
        if reader.get()? {
            bail!(DecodeError::NotAudioPacket);
        }

        // Mode and window flags.
        let mode_bits = ilog(setup.modes.len() as u64 - 1);
        let mode_idx = reader.get_n::<u16>(mode_bits)? as usize;
        let mode = setup.modes.get(mode_idx).ok_or(DecodeError::ModeOutOfRange {
            index: mode_idx,
            count: setup.modes.len(),
        })?;
        let mapping = &setup.mappings[mode.mapping as usize];
        let mut prev_window_flag = false;
        let mut next_window_flag = false;
        if mode.block_flag {
            prev_window_flag = reader.get()?;
            next_window_flag = reader.get()?;
        }
        let window = mode.window(prev_window_flag, next_window_flag);
        let n = window.len();
        let channels = header.audio_channels as usize;

        // Floor curve decode, one spectrum slice per channel.
        let mut floor_outputs = vec![0f32; n * channels];
        let mut floor_used = vec![false; channels];
        for channel in 0..channels {
            let submap_number = mapping.muxs[channel] as usize;
            let floor_number = mapping.submaps[submap_number].floor;
            tap.push_u8("floor_number", Some(channel as u8), &[floor_number])?;
            let floor = &setup.floors[floor_number as usize];
            let out = &mut floor_outputs[n * channel..n * (channel + 1)];
            let used = floor.decode(&mut reader, &setup.codebooks, out, tap)?;
            floor_used[channel] = used;
            if used {
                tap.push_f32("floor_outputs", Some(channel as u8), out)?;
            }
        }

        // Nonzero-vector propagation over the coupling pairs.
        for coupling in &mapping.couplings {
            let magnitude = coupling.magnitude as usize;
            let angle = coupling.angle as usize;
            if floor_used[magnitude] || floor_used[angle] {
                floor_used[magnitude] = true;
                floor_used[angle] = true;
            }
        }

        // Residue decode per submap into zeroed half-spectra.
        let mut residue_outputs: Vec<Vec<f32>> = vec![Vec::new(); channels];
        for (submap_idx, submap) in mapping.submaps.iter().enumerate() {
            let mut submap_channels = Vec::new();
            let mut channel_used = Vec::new();
            for (channel, &mux) in mapping.muxs.iter().enumerate() {
                if mux as usize == submap_idx {
                    submap_channels.push(channel);
                    channel_used.push(floor_used[channel]);
                }
            }

            let residue = &setup.residues[submap.residue as usize];
            let decode_len = residue.decode_len(n);
            let mut out = vec![vec![0f32; decode_len]; submap_channels.len()];
            residue.decode(
                &mut reader,
                &setup.codebooks,
                &channel_used,
                decode_len,
                &mut out,
                None,
            )?;
            for (slot, &channel) in submap_channels.iter().enumerate() {
                residue_outputs[channel] = std::mem::take(&mut out[slot]);
            }
        }
        for (channel, out) in residue_outputs.iter().enumerate() {
            tap.push_f32("after_residue", Some(channel as u8), out)?;
        }

        // Inverse coupling, reverse coupling order.
        for coupling in mapping.couplings.iter().rev() {
            let (magnitude_vector, angle_vector) = dual_mut(
                &mut residue_outputs,
                coupling.magnitude as usize,
                coupling.angle as usize,
            );
            ensure!(
                magnitude_vector.len() == angle_vector.len(),
                "coupled channels decode different spectrum lengths"
            );
            for (m, a) in magnitude_vector.iter_mut().zip(angle_vector.iter_mut()) {
                let (new_m, new_a) = inverse_couple(*m, *a);
                *m = new_m;
                *a = new_a;
            }
        }

        // Floor product over the half spectrum.
        for (channel, residue_data) in residue_outputs.iter_mut().enumerate() {
            if floor_used[channel] {
                let floor_data = &floor_outputs[n * channel..n * channel + n / 2];
                ensure!(
                    residue_data.len() >= n / 2,
                    "residue vector shorter than the half spectrum"
                );
                for (sample, &envelope) in residue_data.iter_mut().zip(floor_data.iter()) {
                    *sample *= envelope;
                }
            }
            tap.push_f32("after_envelope", Some(channel as u8), residue_data)?;
        }

        // Inverse MDCT and windowed overlap-add.
        let imdct = &mut imdct[mode.block_flag as usize];
        ensure!(
            imdct.window_len() == n,
            "IMDCT length does not match the mode blocksize"
        );
        let mut pcm = vec![0f32; n];
        for (channel, residue_data) in residue_outputs.iter().enumerate() {
            ensure!(
                residue_data.len() * 2 == n,
                "spectrum length does not match the window"
            );
            imdct.backward(residue_data, &mut pcm);
            tap.push_f32("pcm_after_mdct", Some(channel as u8), &pcm)?;
            state.add_pcm(channel, &pcm, window)?;
        }

        tap.push_u8("finish_audio_packet", None, &[])?;

        // Cache the right-hand half and emit the completed span.
        let blocksize_0 = header.blocksize_0() as usize;
        let blocksize_1 = header.blocksize_1() as usize;
        let prev_win_size = if self.audio_packet_count > 0 {
            if prev_window_flag { blocksize_1 } else { blocksize_0 }
        } else {
            0
        };
        let next_win_size = if next_window_flag { blocksize_1 } else { blocksize_0 };
        state.advance(callbacks, tap, prev_win_size, n, next_win_size)?;

        self.audio_packet_count += 1;
        Ok(())
    }
}

/// Maps the (sum, difference)-like coupled pair back to two amplitudes.
#[inline]
fn inverse_couple(m: f32, a: f32) -> (f32, f32) {
    if m > 0.0 {
        if a > 0.0 { (m, m - a) } else { (m + a, m) }
    } else if a > 0.0 {
        (m, m + a)
    } else {
        (m - a, m)
    }
}

fn dual_mut<T>(v: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (low, high) = v.split_at_mut(b);
        (&mut low[a], &mut high[0])
    } else {
        let (low, high) = v.split_at_mut(a);
        (&mut high[0], &mut low[b])
    }
}

/// Overlap-add accumulator for one stream.
///
/// Each channel owns a PCM ring; windowed IMDCT output is added at the
/// cursor, and after every packet the span between the previous and current
/// window midpoints is emitted. Samples outside the live span stay zero.
#[derive(Debug, Default)]
pub struct DecodeState {
    pcm_buffer: Vec<Vec<f32>>,
    /// Cursor: where the current window was added.
    pcm_offset: usize,
    /// Offset from the cursor to the midpoint of the previous window.
    prev_second_half_offset: usize,
}

impl DecodeState {
    fn init(&mut self, num_channels: u8, pcm_buffer_size: usize) {
        self.pcm_buffer = vec![vec![0.0; pcm_buffer_size]; num_channels as usize];
        self.pcm_offset = 0;
        self.prev_second_half_offset = 0;
    }

    /// Adds one channel's windowed time-domain output at the cursor.
    fn add_pcm(&mut self, channel: usize, new_pcm: &[f32], window: &[f32]) -> Result<()> {
        ensure!(channel < self.pcm_buffer.len(), "channel out of range");
        ensure!(
            new_pcm.len() == window.len(),
            "window length does not match the PCM block"
        );
        let buffer = &mut self.pcm_buffer[channel];
        ensure!(
            self.pcm_offset + window.len() <= buffer.len(),
            "PCM block does not fit the accumulator"
        );

        let target = &mut buffer[self.pcm_offset..self.pcm_offset + new_pcm.len()];
        for ((acc, &sample), &weight) in target.iter_mut().zip(new_pcm).zip(window) {
            *acc += sample * weight;
        }
        Ok(())
    }

    /// Emits the PCM between the previous and current window midpoints, then
    /// advances the cursor, compacting the ring when the next window would
    /// run off either edge. The first packet of a stream emits nothing.
    fn advance<C: DecodeCallbacks>(
        &mut self,
        callbacks: &mut C,
        tap: &mut DebugTap,
        prev_win_size: usize,
        cur_win_size: usize,
        next_win_size: usize,
    ) -> Result<()> {
        ensure!(!self.pcm_buffer.is_empty(), "decode state not initialized");
        let num_channels = self.pcm_buffer.len();
        let buffer_len = self.pcm_buffer[0].len();
        let mut cur_second_half_offset = self.pcm_offset + cur_win_size / 2;

        if prev_win_size > 0 {
            let prev_second_half_offset = self.pcm_offset + self.prev_second_half_offset;
            ensure!(
                prev_second_half_offset < cur_second_half_offset,
                "window midpoints out of order"
            );
            let num_samples = cur_second_half_offset - prev_second_half_offset;
            let mut channel_pcms = Vec::with_capacity(num_channels);
            for channel in 0..num_channels {
                let span =
                    &self.pcm_buffer[channel][prev_second_half_offset..cur_second_half_offset];
                tap.push_f32("pcm", Some(channel as u8), span)?;
                channel_pcms.push(span);
            }
            debug_assert!(channel_pcms.iter().all(|s| s.len() == num_samples));
            if callbacks.got_pcm_data(&channel_pcms) == Control::Stop {
                bail!(DecodeError::CallbackStop);
            }
        }

        let mut next_pcm_offset =
            self.pcm_offset as isize + (cur_win_size / 4) as isize * 3 - (next_win_size / 4) as isize;

        if next_pcm_offset + next_win_size as isize >= buffer_len as isize {
            // Move left, keeping the live right half of the current window.
            let needed_offset =
                self.pcm_offset as isize + (cur_win_size / 2) as isize - next_pcm_offset;
            cur_second_half_offset = needed_offset.max(0) as usize;
            let delete_start = cur_second_half_offset + cur_win_size / 2;
            let src = self.pcm_offset + cur_win_size / 2;
            for buffer in &mut self.pcm_buffer {
                buffer.copy_within(src..src + cur_win_size / 2, cur_second_half_offset);
                buffer[delete_start..].fill(0.0);
            }
            next_pcm_offset = 0;
        } else if next_pcm_offset < 0 {
            // Short window before a long one: make room on the left.
            let extra_room = (-next_pcm_offset) as usize;
            ensure!(
                extra_room > self.pcm_offset,
                "cursor already leaves enough room on the left"
            );
            cur_second_half_offset += extra_room;
            let src = self.pcm_offset;
            for buffer in &mut self.pcm_buffer {
                buffer.copy_within(src..src + cur_win_size, extra_room);
                buffer[..extra_room].fill(0.0);
            }
            next_pcm_offset = 0;
        }

        let next_pcm_offset = next_pcm_offset as usize;
        ensure!(
            cur_second_half_offset >= next_pcm_offset,
            "cursor advanced past the current window midpoint"
        );
        self.prev_second_half_offset = cur_second_half_offset - next_pcm_offset;
        self.pcm_offset = next_pcm_offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        spans: Vec<Vec<Vec<f32>>>,
    }

    impl DecodeCallbacks for Collector {
        fn got_pcm_data(&mut self, pcm: &[&[f32]]) -> Control {
            self.spans
                .push(pcm.iter().map(|s| s.to_vec()).collect());
            Control::Continue
        }
    }

    fn drive(state: &mut DecodeState, collector: &mut Collector, windows: &[(usize, usize, usize)]) {
        let mut tap = DebugTap::null();
        for &(prev, cur, next) in windows {
            let pcm = vec![1.0f32; cur];
            let window = vec![1.0f32; cur];
            for channel in 0..state.pcm_buffer.len() {
                state.add_pcm(channel, &pcm, &window).unwrap();
            }
            state
                .advance(collector, &mut tap, prev, cur, next)
                .unwrap();
        }
    }

    #[test]
    fn test_inverse_couple_quadrants() {
        // Known stereo pair: magnitude 1.0, angle 0.5.
        assert_eq!(inverse_couple(1.0, 0.5), (1.0, 0.5));
        assert_eq!(inverse_couple(1.0, -0.25), (0.75, 1.0));
        assert_eq!(inverse_couple(-1.0, 0.5), (-1.0, -0.5));
        assert_eq!(inverse_couple(-1.0, -0.25), (-0.75, -1.0));
        assert_eq!(inverse_couple(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn first_packet_emits_nothing() {
        let mut state = DecodeState::default();
        state.init(1, 960);
        let mut collector = Collector::default();
        drive(&mut state, &mut collector, &[(0, 64, 64)]);
        assert!(collector.spans.is_empty());
    }

    #[test]
    fn steady_short_windows_emit_half_blocks() {
        let mut state = DecodeState::default();
        state.init(2, 960);
        let mut collector = Collector::default();
        drive(
            &mut state,
            &mut collector,
            &[(0, 64, 64), (64, 64, 64), (64, 64, 64)],
        );
        assert_eq!(collector.spans.len(), 2);
        for span in &collector.spans {
            assert_eq!(span.len(), 2);
            assert_eq!(span[0].len(), 32);
            assert_eq!(span[1].len(), 32);
        }
    }

    #[test]
    fn short_to_long_transition_emits_mixed_span() {
        let mut state = DecodeState::default();
        state.init(1, 64 * 5 + 256 * 5);
        let mut collector = Collector::default();
        // Second packet is long; the short first packet forces a move to
        // the right to make room on the left.
        drive(
            &mut state,
            &mut collector,
            &[(0, 64, 256), (64, 256, 256)],
        );
        assert_eq!(collector.spans.len(), 1);
        assert_eq!(collector.spans[0][0].len(), (256 / 2 + 64 / 2) / 2);
    }

    #[test]
    fn long_run_compacts_and_stays_gap_free() {
        let mut state = DecodeState::default();
        state.init(1, 960);
        let mut collector = Collector::default();

        let mut windows = vec![(0, 128, 128)];
        for _ in 0..40 {
            windows.push((128, 128, 128));
        }
        drive(&mut state, &mut collector, &windows);

        // Every packet after the first emits exactly half a long window,
        // across multiple left-compactions of the ring.
        assert_eq!(collector.spans.len(), 40);
        let total: usize = collector.spans.iter().map(|s| s[0].len()).sum();
        assert_eq!(total, 40 * 64);
        // Steady overlap-add of all-ones blocks through an all-ones window
        // doubles every emitted sample.
        for span in &collector.spans {
            for &sample in &span[0] {
                assert_eq!(sample, 2.0);
            }
        }
    }
}
