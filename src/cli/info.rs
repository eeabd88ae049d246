use anyhow::Result;
use indicatif::MultiProgress;
use log::info;

use vorbis::process::{Control, DecodeCallbacks, Decoder};
use vorbis::structs::floor::Floor;
use vorbis::structs::id_header::IdHeader;
use vorbis::structs::setup::Setup;

use super::command::{Cli, InfoArgs};
use crate::input::InputReader;

pub fn cmd_info(args: &InfoArgs, _cli: &Cli, _multi: Option<&MultiProgress>) -> Result<()> {
    info!("Analyzing Ogg Vorbis stream: {}", args.input.display());

    let input = InputReader::new(&args.input)?;
    let mut decoder = Decoder::new(input, InfoCollector::default());
    decoder.run()?;
    let collector = decoder.into_callbacks();

    match (collector.header, collector.setup) {
        (Some(header), setup) => print_stream_info(&header, setup.as_ref()),
        (None, _) => {
            println!("No Vorbis stream found in the file.");
            println!("This doesn't appear to be a valid Ogg Vorbis stream.");
        }
    }

    Ok(())
}

fn print_stream_info(header: &IdHeader, setup: Option<&SetupSummary>) {
    println!("Vorbis stream:");
    println!("  Channels:        {}", header.audio_channels);
    println!("  Sample rate:     {} Hz", header.audio_sample_rate);
    println!(
        "  Blocksizes:      {} / {}",
        header.blocksize_0(),
        header.blocksize_1()
    );
    if header.bitrate_nominal != 0 {
        println!("  Nominal bitrate: {} b/s", header.bitrate_nominal);
    }

    let Some(setup) = setup else {
        println!("  Setup header missing or truncated.");
        return;
    };
    println!("  Codebooks:       {}", setup.codebooks);
    println!(
        "  Floors:          {} (types {:?})",
        setup.floor_types.len(),
        setup.floor_types
    );
    println!(
        "  Residues:        {} (types {:?})",
        setup.residue_types.len(),
        setup.residue_types
    );
    println!("  Mappings:        {}", setup.mappings);
    println!("  Modes:           {} ({} long)", setup.modes, setup.long_modes);
}

struct SetupSummary {
    codebooks: usize,
    floor_types: Vec<u16>,
    residue_types: Vec<u16>,
    mappings: usize,
    modes: usize,
    long_modes: usize,
}

#[derive(Default)]
struct InfoCollector {
    header: Option<IdHeader>,
    setup: Option<SetupSummary>,
}

impl DecodeCallbacks for InfoCollector {
    fn got_header(&mut self, header: &IdHeader) -> Control {
        self.header = Some(*header);
        Control::Continue
    }

    fn got_setup(&mut self, setup: &Setup) -> Control {
        self.setup = Some(SetupSummary {
            codebooks: setup.codebooks.len(),
            floor_types: setup
                .floors
                .iter()
                .map(|floor| match floor {
                    Floor::Zero(_) => 0,
                    Floor::One(_) => 1,
                })
                .collect(),
            residue_types: setup.residues.iter().map(|r| r.residue_type).collect(),
            mappings: setup.mappings.len(),
            modes: setup.modes.len(),
            long_modes: setup.modes.iter().filter(|m| m.block_flag).count(),
        });
        // Headers are all this command needs; stop before any audio decode.
        Control::Stop
    }
}
