mod cli;

use std::io::{Read, Write};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sfs_rs::{DiskImage, Geometry, SimpleFs};

use crate::cli::{Cli, Command, VolumeArgs};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let geom = Geometry::new(
        cli.volume.block_size,
        cli.volume.blocks,
        cli.volume.inodes,
    );

    match cli.command {
        Command::Format => format_volume(&cli.volume, geom),
        Command::Ls => ls(&cli.volume, geom),
        Command::Stat { name } => stat(&cli.volume, geom, &name),
        Command::Cat { name } => cat(&cli.volume, geom, &name),
        Command::Put { name, from } => put(&cli.volume, geom, &name, from.as_deref()),
        Command::Rm { name } => rm(&cli.volume, geom, &name),
    }
}

fn format_volume(volume: &VolumeArgs, geom: Geometry) -> anyhow::Result<()> {
    let image = DiskImage::create(&volume.image, geom.block_size, geom.block_count)
        .with_context(|| format!("failed to create image {}", volume.image.display()))?;
    let fs = SimpleFs::format(image, geom)?;
    info!(
        "created {} ({} free data blocks)",
        volume.image.display(),
        fs.free_blocks()
    );
    Ok(())
}

fn mount(volume: &VolumeArgs, geom: Geometry) -> anyhow::Result<SimpleFs<DiskImage>> {
    let image = DiskImage::open(&volume.image, geom.block_size, geom.block_count)
        .with_context(|| format!("failed to open image {}", volume.image.display()))?;
    Ok(SimpleFs::mount(image, geom)?)
}

fn ls(volume: &VolumeArgs, geom: Geometry) -> anyhow::Result<()> {
    let mut fs = mount(volume, geom)?;
    let mut names = Vec::new();
    while let Some(name) = fs.next_file_name() {
        names.push(name);
    }
    for name in names {
        let size = fs.size_of(&name)?;
        println!("{size:>10}  {name}");
    }
    Ok(())
}

fn stat(volume: &VolumeArgs, geom: Geometry, name: &str) -> anyhow::Result<()> {
    let fs = mount(volume, geom)?;
    println!("{}", fs.size_of(name)?);
    Ok(())
}

fn cat(volume: &VolumeArgs, geom: Geometry, name: &str) -> anyhow::Result<()> {
    let mut fs = mount(volume, geom)?;
    let size = fs.size_of(name)?;
    let fd = fs.open(name)?;
    fs.seek(fd, 0)?;
    let data = fs.read(fd, usize::try_from(size).context("file too large to read")?)?;
    fs.close(fd)?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

fn put(
    volume: &VolumeArgs,
    geom: Geometry,
    name: &str,
    from: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let data = match from {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read payload {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let mut fs = mount(volume, geom)?;
    let fd = fs.open(name)?;
    fs.seek(fd, 0)?;
    let written = fs.write(fd, &data)?;
    fs.close(fd)?;
    if written < data.len() {
        anyhow::bail!("volume full: wrote {written} of {} bytes", data.len());
    }
    info!("wrote {written} bytes to {name}");
    Ok(())
}

fn rm(volume: &VolumeArgs, geom: Geometry, name: &str) -> anyhow::Result<()> {
    let mut fs = mount(volume, geom)?;
    fs.remove(name)?;
    Ok(())
}
