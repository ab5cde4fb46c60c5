use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub volume: VolumeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct VolumeArgs {
    #[arg(long, env = "SFS_IMAGE", default_value = "sfs.img")]
    pub image: PathBuf,

    #[arg(long, env = "SFS_BLOCK_SIZE", default_value_t = 1024)]
    pub block_size: u32,

    #[arg(long, env = "SFS_BLOCKS", default_value_t = 100)]
    pub blocks: u32,

    #[arg(long, env = "SFS_INODES", default_value_t = 10)]
    pub inodes: u32,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh volume image, replacing any existing one.
    Format,

    /// List every file with its size.
    Ls,

    /// Print one file's size in bytes.
    Stat { name: String },

    /// Copy a file out of the volume to stdout.
    Cat { name: String },

    /// Write a local file (or stdin) into the volume at offset 0.
    Put {
        name: String,

        /// Read the payload from this path instead of stdin.
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Delete a file.
    Rm { name: String },
}
