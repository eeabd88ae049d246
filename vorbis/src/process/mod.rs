//! Streaming decode pipeline.
//!
//! 1. **Page extraction** ([`extract`]): [`extract::PageReader`] frames the
//!    byte source into CRC-checked pages.
//!
//! 2. **Packet decoding** ([`decode`]): [`decode::StreamDecoder`] consumes a
//!    stream's packets in order and turns audio packets into PCM.
//!
//! The [`Decoder`] here ties them together: it owns the stream registry
//! keyed by serial number, splits each page into packets along its segment
//! table and reports results through the host's [`DecodeCallbacks`].

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::structs::id_header::IdHeader;
use crate::structs::page::Page;
use crate::structs::setup::Setup;
use crate::utils::errors::{DecodeError, FramingError};
use crate::utils::io::ByteSource;
use crate::utils::tap::DebugTap;

pub mod decode;
pub mod extract;

use decode::StreamDecoder;
use extract::PageReader;

/// Continue-or-stop indication returned by every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Finish cleanly at the next packet boundary.
    Stop,
}

/// Host callback surface. Within a stream, `got_header` precedes
/// `got_setup` precedes any `got_pcm_data`; `got_eof` arrives last. PCM
/// slices borrow the decoder's ring and are only valid during the call;
/// consecutive spans concatenate to the waveform without gap or overlap.
pub trait DecodeCallbacks {
    fn got_header(&mut self, _header: &IdHeader) -> Control {
        Control::Continue
    }

    fn got_setup(&mut self, _setup: &Setup) -> Control {
        Control::Continue
    }

    fn got_pcm_data(&mut self, _pcm: &[&[f32]]) -> Control {
        Control::Continue
    }

    fn got_eof(&mut self) -> Control {
        Control::Continue
    }
}

/// Pull-driven Ogg Vorbis decoder over a byte source.
pub struct Decoder<S: ByteSource, C: DecodeCallbacks> {
    pages: PageReader<S>,
    streams: HashMap<u32, StreamDecoder>,
    callbacks: C,
    tap: DebugTap,
    packet_count: u64,
}

impl<S: ByteSource, C: DecodeCallbacks> Decoder<S, C> {
    pub fn new(source: S, callbacks: C) -> Self {
        Self::with_tap(source, callbacks, DebugTap::null())
    }

    /// Attaches a checkpoint observer for intermediate decode state.
    pub fn with_tap(source: S, callbacks: C, tap: DebugTap) -> Self {
        Self {
            pages: PageReader::new(source),
            streams: HashMap::new(),
            callbacks,
            tap,
            packet_count: 0,
        }
    }

    /// Decodes until the source is exhausted, a callback asks to stop, or
    /// the stream turns out malformed. A callback stop is a clean return.
    pub fn run(&mut self) -> Result<()> {
        while let Some(page) = self.pages.next_page()? {
            if let Err(err) = self.process_page(&page) {
                if matches!(
                    err.downcast_ref::<DecodeError>(),
                    Some(DecodeError::CallbackStop)
                ) {
                    return Ok(());
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Total packets routed so far, across all streams.
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn into_callbacks(self) -> C {
        self.callbacks
    }

    fn process_page(&mut self, page: &Page) -> Result<()> {
        let serial = page.header.serial;
        if page.header.is_first() {
            if self.streams.contains_key(&serial) {
                bail!(FramingError::DuplicateSerial(serial));
            }
            self.streams.insert(serial, StreamDecoder::new(serial));
        }
        let Some(stream) = self.streams.get_mut(&serial) else {
            bail!(FramingError::UnknownSerial(serial));
        };

        // A packet ends at the first lacing value below 255.
        let mut offset = 0usize;
        let mut len = 0usize;
        for &segment in &page.segment_table {
            len += segment as usize;
            if segment < 255 {
                let packet = &page.data[offset..offset + len];
                stream.handle_packet(packet, &mut self.callbacks, &mut self.tap)?;
                self.packet_count += 1;
                offset += len;
                len = 0;
            }
        }
        if len != 0 || offset != page.data.len() {
            bail!(FramingError::TrailingSegmentData { left: len as u32 });
        }

        if page.header.is_last() {
            let stop = self.callbacks.got_eof() == Control::Stop;
            self.streams.remove(&serial);
            if stop {
                bail!(DecodeError::CallbackStop);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::id_header::build_id_body;
    use crate::structs::page::{FLAG_FIRST, FLAG_LAST, build_page};
    use crate::structs::setup::write_minimal_setup;
    use crate::testutil::BitWriter;
    use crate::utils::io::SliceSource;

    #[derive(Debug, PartialEq)]
    enum Event {
        Header { channels: u8, sample_rate: u32 },
        Setup { modes: usize },
        Pcm(Vec<Vec<f32>>),
        Eof,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        stop_after_setup: bool,
    }

    impl DecodeCallbacks for Recorder {
        fn got_header(&mut self, header: &IdHeader) -> Control {
            self.events.push(Event::Header {
                channels: header.audio_channels,
                sample_rate: header.audio_sample_rate,
            });
            Control::Continue
        }

        fn got_setup(&mut self, setup: &Setup) -> Control {
            self.events.push(Event::Setup {
                modes: setup.modes.len(),
            });
            if self.stop_after_setup {
                Control::Stop
            } else {
                Control::Continue
            }
        }

        fn got_pcm_data(&mut self, pcm: &[&[f32]]) -> Control {
            self.events
                .push(Event::Pcm(pcm.iter().map(|s| s.to_vec()).collect()));
            Control::Continue
        }

        fn got_eof(&mut self) -> Control {
            self.events.push(Event::Eof);
            Control::Continue
        }
    }

    fn header_packet(type_byte: u8, body: &[u8]) -> Vec<u8> {
        let mut packet = vec![type_byte];
        packet.extend_from_slice(b"vorbis");
        packet.extend_from_slice(body);
        packet
    }

    fn setup_packet() -> Vec<u8> {
        let mut w = BitWriter::new();
        write_minimal_setup(&mut w);
        header_packet(5, &w.finish())
    }

    /// A silent audio packet for the minimal setup: packet-type bit 0, a
    /// zero-bit mode index, and a cleared floor bit per channel.
    fn silent_audio_packet() -> Vec<u8> {
        vec![0x00]
    }

    fn stream_bytes(audio_pages: &[&[&[u8]]]) -> Vec<u8> {
        let serial = 7;
        let id = header_packet(1, &build_id_body(2, 48000, 6, 7));
        let comment = header_packet(3, &[0u8; 9]);
        let setup = setup_packet();

        let mut bytes = build_page(FLAG_FIRST, 0, serial, 0, &[&id]);
        bytes.extend(build_page(0, 0, serial, 1, &[&comment, &setup]));
        let last = audio_pages.len();
        for (i, packets) in audio_pages.iter().enumerate() {
            let flag = if i + 1 == last { FLAG_LAST } else { 0 };
            bytes.extend(build_page(flag, 0, serial, 2 + i as u32, packets));
        }
        bytes
    }

    #[test]
    fn decodes_a_minimal_stream_in_callback_order() {
        let a1 = silent_audio_packet();
        let a2 = silent_audio_packet();
        let a3 = silent_audio_packet();
        let bytes = stream_bytes(&[&[&a1, &a2], &[&a3]]);

        let mut decoder = Decoder::new(SliceSource::new(&bytes), Recorder::default());
        decoder.run().unwrap();
        assert_eq!(decoder.packet_count(), 6);

        let events = decoder.into_callbacks().events;
        assert_eq!(
            events[0],
            Event::Header {
                channels: 2,
                sample_rate: 48000
            }
        );
        assert_eq!(events[1], Event::Setup { modes: 1 });

        // Three silent audio packets: the first emits nothing, the next two
        // emit a quarter of two short blocks of exact zeros per channel.
        let pcm_events: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Pcm(spans) => Some(spans),
                _ => None,
            })
            .collect();
        assert_eq!(pcm_events.len(), 2);
        for spans in pcm_events {
            assert_eq!(spans.len(), 2);
            for span in spans {
                assert_eq!(span.len(), 32);
                assert!(span.iter().all(|&s| s == 0.0));
            }
        }

        assert_eq!(events.last(), Some(&Event::Eof));
    }

    #[test]
    fn callback_stop_returns_cleanly() {
        let a1 = silent_audio_packet();
        let bytes = stream_bytes(&[&[&a1]]);

        let recorder = Recorder {
            stop_after_setup: true,
            ..Default::default()
        };
        let mut decoder = Decoder::new(SliceSource::new(&bytes), recorder);
        decoder.run().unwrap();

        let events = decoder.into_callbacks().events;
        assert!(matches!(events.last(), Some(Event::Setup { .. })));
    }

    #[test]
    fn rejects_duplicate_and_unknown_serials() {
        let id = header_packet(1, &build_id_body(1, 44100, 6, 6));
        let mut bytes = build_page(FLAG_FIRST, 0, 7, 0, &[&id]);
        bytes.extend(build_page(FLAG_FIRST, 0, 7, 1, &[&id]));
        let mut decoder = Decoder::new(SliceSource::new(&bytes), Recorder::default());
        assert!(decoder.run().is_err());

        let bytes = build_page(0, 0, 99, 0, &[&id]);
        let mut decoder = Decoder::new(SliceSource::new(&bytes), Recorder::default());
        let err = decoder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FramingError>(),
            Some(FramingError::UnknownSerial(99))
        ));
    }

    #[test]
    fn rejects_header_bit_in_audio_packet() {
        let bad_audio = vec![0x01];
        let bytes = stream_bytes(&[&[&bad_audio]]);
        let mut decoder = Decoder::new(SliceSource::new(&bytes), Recorder::default());
        let err = decoder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::NotAudioPacket)
        ));
    }

    #[test]
    fn corrupted_page_yields_no_pcm() {
        let a1 = silent_audio_packet();
        let a2 = silent_audio_packet();
        let mut bytes = stream_bytes(&[&[&a1, &a2]]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut decoder = Decoder::new(SliceSource::new(&bytes), Recorder::default());
        assert!(decoder.run().is_err());
        let events = decoder.into_callbacks().events;
        assert!(!events.iter().any(|e| matches!(e, Event::Pcm(_))));
        assert!(!events.contains(&Event::Eof));
    }
}
