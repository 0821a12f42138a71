use log::debug;
use std::path::Path;

use crate::error::PermissionError;

/// Creates `directory` if it's absent and checks that files can be created in it.
///
/// The write check creates an anonymous temporary file inside the directory, so the
/// only lasting side effect is the directory itself.
pub fn ensure_writable(directory: &Path) -> Result<(), PermissionError> {
    match std::fs::metadata(directory) {
        Ok(m) if !m.is_dir() => return Err(PermissionError::NotADirectory { path: directory.to_owned() }),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("creating {:?}", directory);
            std::fs::create_dir_all(directory)
                .map_err(|e| PermissionError::Create { path: directory.to_owned(), reason: e.to_string() })?;
        }
        Err(e) => return Err(PermissionError::Create { path: directory.to_owned(), reason: e.to_string() }),
    }
    tempfile::tempfile_in(directory)
        .map(drop)
        .map_err(|e| PermissionError::NotWritable { path: directory.to_owned(), reason: e.to_string() })
}
