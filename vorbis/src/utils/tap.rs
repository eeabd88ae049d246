//! Checkpoint observer for intermediate decode state.
//!
//! Every decode stage pushes named tensors (floor Y lists, residue vectors,
//! post-MDCT PCM, ...) through the stream's tap. The tap is injected at
//! decoder construction and either discards them, prints one summary line
//! per checkpoint, or appends them to a binary dump whose records a separate
//! tool can compare against another decoder's dump of the same stream.
//!
//! Binary layout: the file opens with the literal `ParseOggVorbis-header-v1`,
//! then length-prefixed records `[u32 key-len][key][u8 type-id][u8 elem-size]
//! [u32 payload-len][payload]`. The first records are `decoder-name`,
//! `decoder-sample-rate` and `decoder-num-channels`; each checkpoint then
//! contributes `entry-name`, an optional `entry-channel` and `entry-data`.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    F32,
    I32,
    U32,
    U8,
    I64,
    U64,
    Bool,
}

impl ElementType {
    const fn type_id(self) -> u8 {
        match self {
            ElementType::F32 => 1,
            ElementType::I32 => 2,
            ElementType::U32 => 3,
            ElementType::U8 => 4,
            ElementType::I64 => 5,
            ElementType::U64 => 6,
            ElementType::Bool => 7,
        }
    }

    const fn elem_size(self) -> u8 {
        match self {
            ElementType::F32 | ElementType::I32 | ElementType::U32 => 4,
            ElementType::I64 | ElementType::U64 => 8,
            ElementType::U8 | ElementType::Bool => 1,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::I32 => "i32",
            ElementType::U32 => "u32",
            ElementType::U8 => "u8",
            ElementType::I64 => "i64",
            ElementType::U64 => "u64",
            ElementType::Bool => "bool",
        }
    }
}

enum Sink {
    Null,
    Stdout,
    File(BufWriter<File>),
}

/// Per-decoder checkpoint sink.
pub struct DebugTap {
    sink: Sink,
    decoder_name: String,
}

const FILE_MAGIC: &str = "ParseOggVorbis-header-v1";

impl DebugTap {
    /// Discards all checkpoints. This is the default sink.
    pub fn null() -> Self {
        Self {
            sink: Sink::Null,
            decoder_name: String::new(),
        }
    }

    /// Prints one summary line per checkpoint to stdout.
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout,
            decoder_name: String::new(),
        }
    }

    /// Appends binary records to `path`.
    pub fn file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
            decoder_name: String::new(),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self.sink, Sink::Null)
    }

    /// Announces a decoded stream. Must precede any checkpoint push; for the
    /// file sink this writes the dump header records.
    pub fn begin_stream(
        &mut self,
        decoder_name: &str,
        sample_rate: u32,
        num_channels: u8,
    ) -> Result<()> {
        self.decoder_name = decoder_name.to_string();

        if let Sink::File(w) = &mut self.sink {
            raw_write(w, FILE_MAGIC.as_bytes())?;
            write_record(
                w,
                "decoder-name",
                ElementType::U8,
                decoder_name.as_bytes(),
            )?;
            write_record(
                w,
                "decoder-sample-rate",
                ElementType::U32,
                &sample_rate.to_le_bytes(),
            )?;
            write_record(w, "decoder-num-channels", ElementType::U8, &[num_channels])?;
            w.flush()?;
        }

        Ok(())
    }

    pub fn push_f32(&mut self, name: &str, channel: Option<u8>, data: &[f32]) -> Result<()> {
        self.push(name, channel, ElementType::F32, data, |v| v.to_le_bytes().to_vec())
    }

    pub fn push_i32(&mut self, name: &str, channel: Option<u8>, data: &[i32]) -> Result<()> {
        self.push(name, channel, ElementType::I32, data, |v| v.to_le_bytes().to_vec())
    }

    pub fn push_u32(&mut self, name: &str, channel: Option<u8>, data: &[u32]) -> Result<()> {
        self.push(name, channel, ElementType::U32, data, |v| v.to_le_bytes().to_vec())
    }

    pub fn push_u8(&mut self, name: &str, channel: Option<u8>, data: &[u8]) -> Result<()> {
        self.push(name, channel, ElementType::U8, data, |v| vec![*v])
    }

    pub fn push_i64(&mut self, name: &str, channel: Option<u8>, data: &[i64]) -> Result<()> {
        self.push(name, channel, ElementType::I64, data, |v| v.to_le_bytes().to_vec())
    }

    pub fn push_u64(&mut self, name: &str, channel: Option<u8>, data: &[u64]) -> Result<()> {
        self.push(name, channel, ElementType::U64, data, |v| v.to_le_bytes().to_vec())
    }

    pub fn push_bool(&mut self, name: &str, channel: Option<u8>, data: &[bool]) -> Result<()> {
        self.push(name, channel, ElementType::Bool, data, |v| vec![*v as u8])
    }

    fn push<T: Display>(
        &mut self,
        name: &str,
        channel: Option<u8>,
        ty: ElementType,
        data: &[T],
        to_bytes: impl Fn(&T) -> Vec<u8>,
    ) -> Result<()> {
        match &mut self.sink {
            Sink::Null => Ok(()),
            Sink::Stdout => {
                print_summary_line(&self.decoder_name, name, channel, ty, data);
                Ok(())
            }
            Sink::File(w) => {
                write_record(w, "entry-name", ElementType::U8, name.as_bytes())?;
                if let Some(channel) = channel {
                    write_record(w, "entry-channel", ElementType::U8, &[channel])?;
                }
                let mut payload = Vec::with_capacity(data.len() * ty.elem_size() as usize);
                for v in data {
                    payload.extend_from_slice(&to_bytes(v));
                }
                write_record(w, "entry-data", ty, &payload)?;
                Ok(())
            }
        }
    }
}

fn raw_write<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn write_record<W: Write>(w: &mut W, key: &str, ty: ElementType, payload: &[u8]) -> Result<()> {
    raw_write(w, key.as_bytes())?;
    w.write_all(&[ty.type_id(), ty.elem_size()])?;
    raw_write(w, payload)?;
    Ok(())
}

fn print_summary_line<T: Display>(
    decoder: &str,
    name: &str,
    channel: Option<u8>,
    ty: ElementType,
    data: &[T],
) {
    let channel = channel.map(i32::from).unwrap_or(-1);
    let mut line = format!(
        "decoder='{decoder}' name='{name}' channel={channel} data={}{{",
        ty.name()
    );
    for (i, v) in data.iter().enumerate() {
        if i == 10 {
            line.push_str(" ...");
            break;
        }
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&v.to_string());
    }
    line.push_str(&format!("}} len={}", data.len()));
    println!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn null_tap_accepts_everything() {
        let mut tap = DebugTap::null();
        tap.begin_stream("vorbis", 48000, 2).unwrap();
        tap.push_f32("pcm", Some(0), &[0.5, -0.5]).unwrap();
        tap.push_u8("start_audio_packet", None, &[]).unwrap();
        assert!(tap.is_null());
    }

    #[test]
    fn file_tap_writes_magic_and_records() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("vorbis-tap-test-{}", std::process::id()));

        let mut tap = DebugTap::file(&path).unwrap();
        tap.begin_stream("vorbis", 44100, 1).unwrap();
        tap.push_u32("floor1 ys", None, &[1, 2, 3]).unwrap();
        drop(tap);

        let mut bytes = Vec::new();
        File::open(&path)
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        // [u32 len]["ParseOggVorbis-header-v1"]
        let magic_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(magic_len, FILE_MAGIC.len());
        assert_eq!(&bytes[4..4 + magic_len], FILE_MAGIC.as_bytes());

        // First record key is decoder-name.
        let rest = &bytes[4 + magic_len..];
        let key_len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        assert_eq!(&rest[4..4 + key_len], b"decoder-name");

        // The u32 entry-data payload for [1, 2, 3] appears with elem size 4.
        let needle: &[u8] = &[
            1, 0, 0, 0, //
            2, 0, 0, 0, //
            3, 0, 0, 0,
        ];
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }
}
