use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::Path;
use walkdir::WalkDir;

pub static TAR_FILE_EXT: &str = "tar";

/// Creates TAR archive at `archive` from everything under `folder`
///
/// Entry names are made relative to `root`, so `root/shop_1/a.json` is stored
/// as `shop_1/a.json`. The archive is created exclusively; anything already
/// sitting at `archive` is removed first. A partially written archive is
/// removed on failure. Returns the number of files archived.
#[named]
pub fn archive_folder<P1: AsRef<Path>, P2: AsRef<Path>, P3: AsRef<Path>>(
    root: P1,
    folder: P2,
    archive: P3,
) -> Result<usize> {
    let archive = archive.as_ref();
    remove_existing(archive).add_fn_name(function_path!())?;

    tracing::info!(
        "Tar archiving start from {:?} to {:?}",
        folder.as_ref(),
        archive
    );
    let file = File::create_new(archive)
        .map_err(Error::from)
        .add_msg(format!("Failed to create archive {:?}", archive))
        .add_fn_name(function_path!())?;

    match write_entries(file, root.as_ref(), folder.as_ref()) {
        Ok(count) => {
            tracing::info!("Tar archiving to {:?} finished, {} files", archive, count);
            Ok(count)
        }
        Err(mut e) => {
            if let Err(e2) = std::fs::remove_file(archive) {
                e = e.chain(e2.into())
            }
            Err(e
                .add_msg(format!("Archiving {:?} failed", folder.as_ref()))
                .add_fn_name(function_path!()))
        }
    }
}

fn write_entries(file: File, root: &Path, folder: &Path) -> Result<usize> {
    let mut writer = tar::Builder::new(BufWriter::new(file));
    writer.follow_symlinks(false);

    let mut file_count = 0;
    for entry in WalkDir::new(folder).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let name = entry.path().strip_prefix(root)?;
        tracing::debug!("Archiving {:?}", name);
        writer.append_path_with_name(entry.path(), name)?;
        if entry.file_type().is_file() {
            file_count += 1;
        }
    }

    writer
        .into_inner()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    Ok(file_count)
}

/// Clears a leftover at `path`, whatever kind of entry it is.
fn remove_existing(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => {
            tracing::warn!("Deleting old directory in place of archive: {:?}", path);
            std::fs::remove_dir_all(path)?;
        }
        Ok(_) => {
            tracing::warn!("Deleting old archive: {:?}", path);
            std::fs::remove_file(path)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
