use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dicom_grouper::{GrouperConfig, VolumeLoader, scan_directory};

/// Group the DICOM files of a directory into patients and series
#[derive(Parser, Debug)]
#[command(name = "dicom-grouper", version)]
struct Args {
    /// Directory to scan
    dir: PathBuf,

    /// TOML file with grouping settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "dicom_grouper=debug"
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Only read files directly inside the directory
    #[arg(long)]
    no_recursive: bool,

    /// Load the series with the most slices as a volume
    #[arg(long)]
    load_largest: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let config = GrouperConfig::load(args.config.as_deref()).context("loading configuration")?;
    let mut grouper = scan_directory(&args.dir, !args.no_recursive, config, |done, total| {
        if done == total || done % 100 == 0 {
            info!("Read {}/{} files", done, total);
        }
    })
    .with_context(|| format!("grouping {:?}", args.dir))?;
    for key in grouper.unrepaired_patients() {
        warn!("Series of {} were left unrepaired", key);
    }

    for patient in grouper.patients() {
        println!("{}", patient.key());
        for group in patient.groups() {
            println!(
                "  [{}] {}: {} slices, z spacing {}",
                group.index(),
                group.title(),
                group.slice_count(),
                group.zspacing()
            );
        }
    }

    if args.load_largest {
        let Some(index) = grouper.largest_group().map(|group| group.index()) else {
            warn!("No series found in {:?}", args.dir);
            return Ok(());
        };
        let group = grouper
            .group_mut(index)
            .context("largest series disappeared")?;
        let volume = VolumeLoader::load_group(group).context("loading largest series")?;
        println!(
            "Volume of series {}: {:?} voxels, spacing {:?}",
            index,
            volume.dim(),
            volume.spacing
        );
    }

    Ok(())
}
