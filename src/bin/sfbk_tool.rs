/// Example: .\sfbk_tool.exe to-xml .\soundfonts\*.sf2 -o unpack
/// Example: .\sfbk_tool.exe list-presets .\soundfonts\GeneralUser.sf2

use std::fs::File;
use std::path::PathBuf;

use clap::{Parser, command, Subcommand};
use colored::Colorize;
use sfbk::sfbk::{ChunkId, SfFile};
use sfbk::sfont::{Settings, SoundFont};
use sfbk::dtype::ReadFrom;
use sfbk::fileutils::{VERSION, collect_bank_paths, resolve_output_folder};

#[derive(Parser)]
#[command(version = VERSION, about = "Tools for inspecting SF2/SF3 SoundFont banks", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the parsed structure of SF2 files as XML
    ToXML {
        /// Sets the path of the SF2 files to be dumped
        #[arg(value_name = "INPUT")]
        input_glob: String,

        /// Sets the folder to output the dumps
        #[arg(short = 'o', long, value_name = "OUTPUT")]
        output_folder: Option<PathBuf>,
    },
    /// Print the preset table of an SF2 file
    ListPresets {
        /// Sets the path of the SF2 file
        #[arg(value_name = "INPUT")]
        input_file: PathBuf,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::ToXML { input_glob, output_folder } => {
            let output_folder = resolve_output_folder(output_folder)?;
            let bank_paths = collect_bank_paths(input_glob, &output_folder, "sf2.xml")?;

            for (input_file_path, output_file_path) in bank_paths {
                print!("Dumping {}... ", input_file_path.display());
                let mut raw = File::open(input_file_path)?;
                let mut sf = SfFile::default();
                sf.read_from_file(&mut raw)?;

                let st = quick_xml::se::to_string(&sf)?;
                std::fs::write(output_file_path, st)?;
                println!("done!");
            }

            println!("\nAll files successfully processed.");
        },
        Commands::ListPresets { input_file } => {
            let sfont = SoundFont::load(input_file, &Settings::default())?;

            let mut raw = File::open(input_file)?;
            let mut sf = SfFile::default();
            sf.read_from_file(&mut raw)?;
            if let Some(bank_name) = sf.info_text(ChunkId::Inam) {
                println!("{}", bank_name.bold());
            }
            println!("{} presets, {} instruments, {} samples\n",
                sf.presets.len(), sf.insts.len(), sf.samples.len());

            for preset in sfont.presets() {
                println!("{:3}:{:<3} {}", preset.bank(), preset.program(), preset.name());
            }
        }
    }

    Ok(())
}
