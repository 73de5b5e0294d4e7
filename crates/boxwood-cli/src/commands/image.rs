//! `boxwood image`: manage the local image catalog.

use std::path::PathBuf;

use boxwood_common::config::RuntimeConfig;
use boxwood_image::store::ImageStore;
use clap::{Args, Subcommand};

use crate::output;

/// Image subcommands.
#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// Import a root filesystem tarball (optionally gzip-compressed).
    Import(ImportArgs),
    /// List imported images.
    #[command(alias = "list")]
    Ls,
}

/// Arguments for `image import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to the tar or tar.gz archive.
    pub archive: PathBuf,

    /// Name to import the image as.
    pub name: String,

    /// Expected SHA-256 of the archive; the import is refused on mismatch.
    #[arg(long)]
    pub sha256: Option<String>,
}

/// Executes an `image` subcommand.
///
/// # Errors
///
/// Returns an error if the image store cannot be opened or the operation
/// fails.
pub fn execute(command: ImageCommand, config: &RuntimeConfig) -> anyhow::Result<()> {
    let store = ImageStore::open(config.image_dir()).map_err(|e| anyhow::anyhow!("{e}"))?;
    match command {
        ImageCommand::Import(args) => {
            let info = store
                .import(&args.archive, &args.name, args.sha256.as_deref())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", info.name);
        }
        ImageCommand::Ls => {
            let rows: Vec<Vec<String>> = store
                .list()
                .map_err(|e| anyhow::anyhow!("{e}"))?
                .into_iter()
                .map(|image| vec![image.name, image.path.display().to_string()])
                .collect();
            print!("{}", output::render_table(&["NAME", "PATH"], &rows));
        }
    }
    Ok(())
}
