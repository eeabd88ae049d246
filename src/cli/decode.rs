use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar};
use log::{info, warn};

use vorbis::process::{Control, DecodeCallbacks, Decoder};
use vorbis::structs::id_header::IdHeader;
use vorbis::utils::tap::DebugTap;

use super::command::{Cli, DecodeArgs};
use crate::input::InputReader;
use crate::wav::WavWriter;

pub fn cmd_decode(args: &DecodeArgs, _cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    info!("Decoding Ogg Vorbis stream: {}", args.input.display());

    let input = InputReader::new(&args.input)?;

    let tap = if let Some(path) = &args.debug_out {
        DebugTap::file(path)
            .with_context(|| format!("creating debug dump {}", path.display()))?
    } else if args.debug_stdout {
        DebugTap::stdout()
    } else {
        DebugTap::null()
    };

    let progress = multi.map(|multi| {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_message("decoding");
        pb
    });

    let handler = DecodeHandler {
        progress,
        ..Default::default()
    };
    let mut decoder = Decoder::with_tap(input, handler, tap);
    decoder.run()?;

    let handler = decoder.into_callbacks();
    if let Some(pb) = &handler.progress {
        pb.finish_and_clear();
    }

    let Some(header) = handler.header else {
        warn!("No Vorbis stream found in the input");
        return Ok(());
    };
    let samples = handler.pcm.first().map_or(0, Vec::len);
    info!(
        "Decoded {} samples x {} channels at {} Hz",
        samples, header.audio_channels, header.audio_sample_rate
    );

    if let Some(path) = &args.output_path {
        write_wav(path, &header, &handler.pcm)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {}", path.display());
    }

    Ok(())
}

#[derive(Default)]
struct DecodeHandler {
    header: Option<IdHeader>,
    /// Accumulated PCM, one vector per channel.
    pcm: Vec<Vec<f32>>,
    progress: Option<ProgressBar>,
}

impl DecodeCallbacks for DecodeHandler {
    fn got_header(&mut self, header: &IdHeader) -> Control {
        self.header = Some(*header);
        self.pcm = vec![Vec::new(); header.audio_channels as usize];
        Control::Continue
    }

    fn got_pcm_data(&mut self, pcm: &[&[f32]]) -> Control {
        for (channel, span) in self.pcm.iter_mut().zip(pcm) {
            channel.extend_from_slice(span);
        }
        if let Some(pb) = &self.progress {
            pb.inc(pcm.first().map_or(0, |s| s.len()) as u64);
        }
        Control::Continue
    }
}

fn write_wav(path: &Path, header: &IdHeader, pcm: &[Vec<f32>]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = WavWriter::new(file);
    writer.configure_audio_format(header.audio_sample_rate, pcm.len() as u32)?;
    writer.write_header()?;

    let samples = pcm.first().map_or(0, Vec::len);
    let channels = pcm.len();

    // Interleave in blocks to keep write calls reasonable.
    const FRAMES_PER_BLOCK: usize = 4096;
    let mut block = Vec::with_capacity(FRAMES_PER_BLOCK * channels);
    let mut frame = 0;
    while frame < samples {
        block.clear();
        let end = (frame + FRAMES_PER_BLOCK).min(samples);
        for i in frame..end {
            for channel in pcm {
                block.push(channel[i]);
            }
        }
        writer.write_samples(&block)?;
        frame = end;
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_concatenates_pcm_spans() {
        let header = IdHeader {
            vorbis_version: 0,
            audio_channels: 2,
            audio_sample_rate: 48000,
            bitrate_maximum: 0,
            bitrate_nominal: 0,
            bitrate_minimum: 0,
            blocksizes_exp: 6 | (7 << 4),
        };

        let mut handler = DecodeHandler::default();
        assert_eq!(handler.got_header(&header), Control::Continue);
        handler.got_pcm_data(&[&[1.0, 2.0], &[3.0, 4.0]]);
        handler.got_pcm_data(&[&[5.0], &[6.0]]);

        assert_eq!(handler.pcm[0], vec![1.0, 2.0, 5.0]);
        assert_eq!(handler.pcm[1], vec![3.0, 4.0, 6.0]);
    }
}
