use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::{Error, Result};

/// Create (or truncate) the payload file and size it to `size` bytes.
///
/// Workers write their ranges out of order, so the file must already span the
/// whole resource before the first write lands. A partially created file is
/// removed on failure.
pub fn preallocate(path: impl AsRef<Path>, size: u64) -> Result<()> {
    let path = path.as_ref();
    let write_err = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::create(path).map_err(write_err)?;
    if let Err(e) = file.set_len(size) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(write_err(e));
    }
    file.sync_all().map_err(write_err)
}

/// Length of the payload file, or `None` when it does not exist.
pub fn payload_len(path: impl AsRef<Path>) -> Result<Option<u64>> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(Error::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Move the finished payload onto the output path in one rename.
pub fn commit(payload: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
    let (payload, output) = (payload.as_ref(), output.as_ref());
    fs::rename(payload, output).map_err(|source| Error::Rename {
        from: payload.to_path_buf(),
        to: output.to_path_buf(),
        source,
    })
}

/// Delete the progress store. A store that is already gone is not an error.
pub fn remove_store(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    removed.map_err(|source| Error::Remove {
        path: path.to_path_buf(),
        source,
    })
}
