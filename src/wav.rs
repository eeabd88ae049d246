use std::io::{self, BufWriter, Seek, SeekFrom, Write};

/// IEEE float WAVE format tag.
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

/// RIFF/WAVE writer for 32-bit float PCM.
pub struct WavWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    riff_size_position: u64,
    data_size_position: u64,
    data_written: u64,
    sample_rate: u32,
    channels: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    /// Create a new WAV writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            riff_size_position: 0,
            data_size_position: 0,
            data_written: 0,
            sample_rate: 48000,
            channels: 2,
        }
    }

    /// Configure audio format parameters
    pub fn configure_audio_format(&mut self, sample_rate: u32, channels: u32) -> io::Result<()> {
        if self.data_written > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot change format after writing data",
            ));
        }

        self.sample_rate = sample_rate;
        self.channels = channels;
        Ok(())
    }

    /// Write the RIFF/WAVE header with placeholder sizes
    pub fn write_header(&mut self) -> io::Result<()> {
        self.writer.write_all(b"RIFF")?;
        self.riff_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?; // File size (to be updated later)
        self.writer.write_all(b"WAVE")?;

        self.writer.write_all(b"fmt ")?;
        self.writer.write_all(&16u32.to_le_bytes())?;
        self.writer
            .write_all(&WAVE_FORMAT_IEEE_FLOAT.to_le_bytes())?;
        self.writer
            .write_all(&(self.channels as u16).to_le_bytes())?;
        self.writer.write_all(&self.sample_rate.to_le_bytes())?;

        let byte_rate = self.sample_rate * self.channels * 4;
        self.writer.write_all(&byte_rate.to_le_bytes())?;

        let block_align = self.channels * 4;
        self.writer.write_all(&(block_align as u16).to_le_bytes())?;
        self.writer.write_all(&32u16.to_le_bytes())?;

        self.writer.write_all(b"data")?;
        self.data_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?; // Data size (to be updated later)

        Ok(())
    }

    /// Write interleaved float samples
    pub fn write_samples(&mut self, samples: &[f32]) -> io::Result<()> {
        for &sample in samples {
            self.writer.write_all(&sample.to_le_bytes())?;
        }
        self.data_written += samples.len() as u64 * 4;
        Ok(())
    }

    /// Patch up the chunk sizes and flush
    pub fn finalize(&mut self) -> io::Result<()> {
        let data_size = self.data_written.min(u32::MAX as u64) as u32;
        let riff_size = data_size + 36;

        self.writer.flush()?;
        self.writer
            .seek(SeekFrom::Start(self.riff_size_position))?;
        self.writer.write_all(&riff_size.to_le_bytes())?;
        self.writer
            .seek(SeekFrom::Start(self.data_size_position))?;
        self.writer.write_all(&data_size.to_le_bytes())?;
        self.writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_sizes_are_patched_on_finalize() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut buffer);
            writer.configure_audio_format(44100, 1).unwrap();
            writer.write_header().unwrap();
            writer.write_samples(&[0.0, 0.5, -0.5, 1.0]).unwrap();
            writer.finalize().unwrap();
        }

        let bytes = buffer.into_inner();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 16 data bytes, RIFF size = 36 + 16.
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 52);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 16);
        // Format tag 3 (IEEE float), 1 channel, 32 bits.
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 44100);
        assert_eq!(u16::from_le_bytes(bytes[20..22].try_into().unwrap()), 3);
        assert_eq!(u16::from_le_bytes(bytes[34..36].try_into().unwrap()), 32);
        assert_eq!(bytes.len(), 44 + 16);
    }

    #[test]
    fn format_locks_after_first_write() {
        let mut buffer = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut buffer);
        writer.configure_audio_format(48000, 2).unwrap();
        writer.write_header().unwrap();
        writer.write_samples(&[0.0]).unwrap();
        assert!(writer.configure_audio_format(96000, 2).is_err());
    }
}
