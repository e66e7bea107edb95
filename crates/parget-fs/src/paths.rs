use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Locations used by one download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPaths {
    output:  PathBuf,
    payload: PathBuf,
    store:   PathBuf,
}

impl PayloadPaths {
    /// Derive the payload and store paths for `output`.
    ///
    /// `a.iso` becomes `a.iso.tmp` and `a.iso.db`; an output whose name already
    /// ends in a dot (`a.`) gets `a.tmp` and `a.db`.
    pub fn for_output(output: impl Into<PathBuf>) -> Result<Self> {
        let output = output.into();
        let name = match output.file_name() {
            Some(name) if !name.is_empty() => name.to_os_string(),
            _ => return Err(Error::InvalidOutput(output)),
        };

        let dotted = name.to_string_lossy().ends_with('.');
        let sibling = |ext: &str| {
            let mut file: OsString = name.clone();
            if !dotted {
                file.push(".");
            }
            file.push(ext);
            output.with_file_name(file)
        };

        Ok(Self {
            payload: sibling("tmp"),
            store: sibling("db"),
            output,
        })
    }

    pub fn output(&self) -> &Path { &self.output }

    pub fn payload(&self) -> &Path { &self.payload }

    pub fn store(&self) -> &Path { &self.store }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_extensions() {
        let paths = PayloadPaths::for_output("/data/ubuntu.iso").unwrap();
        assert_eq!(paths.output(), Path::new("/data/ubuntu.iso"));
        assert_eq!(paths.payload(), Path::new("/data/ubuntu.iso.tmp"));
        assert_eq!(paths.store(), Path::new("/data/ubuntu.iso.db"));
    }

    #[test]
    fn trailing_dot_is_not_doubled() {
        let paths = PayloadPaths::for_output("/data/archive.").unwrap();
        assert_eq!(paths.payload(), Path::new("/data/archive.tmp"));
        assert_eq!(paths.store(), Path::new("/data/archive.db"));
    }

    #[test]
    fn rejects_paths_without_file_name() {
        assert!(matches!(
            PayloadPaths::for_output("/"),
            Err(Error::InvalidOutput(_))
        ));
        assert!(PayloadPaths::for_output("..").is_err());
    }
}
