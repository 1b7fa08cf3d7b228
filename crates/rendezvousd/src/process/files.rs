//! Atomic runtime file writes.

use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

/// Writes `contents` to a temporary sibling of `path` and renames it into
/// place, so readers never observe a partial file.
pub(super) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "runtime file has no parent directory")
    })?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("rendezvousd"),
    );
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn replaces_existing_contents() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("rendezvousd.health");
        std::fs::write(&path, b"old contents that are longer").expect("seed file");

        atomic_write(&path, b"new").expect("write");

        assert_eq!(std::fs::read(&path).expect("read back"), b"new");
    }
}
