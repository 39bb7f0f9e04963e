use clap::{Parser, Subcommand};
use spz_codec::{
    decode_ply, decode_spz, encode_ply, encode_spz, CoordinateSystem, GaussianCloud,
};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "spz-tool",
    version,
    about = "Inspects and converts Gaussian splat files (.ply <-> .spz)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print summary statistics for a splat file.
    Info {
        /// Path to a .ply or .spz file.
        path: PathBuf,
    },
    /// Convert between .ply and .spz; the codec on each side is chosen by
    /// the path suffix.
    Convert {
        /// Path to the input file.
        input: PathBuf,
        /// Path to the output file.
        output: PathBuf,
    },
}

fn is_ply(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ply"))
}

fn load_cloud(path: &Path) -> Result<GaussianCloud, Box<dyn Error>> {
    let data = fs::read(path)
        .map_err(|e| format!("Error reading input file '{}': {}", path.display(), e))?;
    let cloud = if is_ply(path) {
        decode_ply(&data, CoordinateSystem::Unspecified)?
    } else {
        decode_spz(&data, CoordinateSystem::Unspecified)?
    };
    Ok(cloud)
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Info { path } => {
            let cloud = load_cloud(&path)?;
            println!("points:        {}", cloud.num_points);
            println!("sh degree:     {}", cloud.sh_degree);
            println!("antialiased:   {}", cloud.antialiased);
            println!("median volume: {}", cloud.median_volume());
        }
        Command::Convert { input, output } => {
            let start_time = Instant::now();
            let cloud = load_cloud(&input)?;
            let encoded = if is_ply(&output) {
                encode_ply(&cloud, CoordinateSystem::Unspecified)?
            } else {
                encode_spz(&cloud, CoordinateSystem::Unspecified)?
            };
            fs::write(&output, &encoded)
                .map_err(|e| format!("Error writing output file '{}': {}", output.display(), e))?;
            let duration = start_time.elapsed();
            println!(
                "Converted {} splats: '{}' -> '{}' ({} bytes) in {} ms",
                cloud.num_points,
                input.display(),
                output.display(),
                encoded.len(),
                duration.as_millis()
            );
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
