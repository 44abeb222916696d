use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::Error;

/// Resolve `script` relative to `root` and check it is a regular,
/// executable file. Used at registration time by both the CLI's
/// entry-script check and `CommandTask::enqueue`.
pub fn validate_script_path(root: &Path, script: &Path) -> Result<PathBuf, Error> {
    let full = root.join(script);

    let meta = full.metadata().map_err(|_| Error::NotFound {
        path: full.clone(),
    })?;

    if !meta.is_file() {
        return Err(Error::NotAFile { path: full });
    }

    if meta.permissions().mode() & 0o111 == 0 {
        return Err(Error::NotExecutable { path: full });
    }

    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt as _;

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_script_path(dir.path(), Path::new("nope")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn rejects_non_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("entry");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&script, perms).unwrap();

        let err = validate_script_path(dir.path(), Path::new("entry")).unwrap_err();
        assert!(matches!(err, Error::NotExecutable { .. }));
    }

    #[test]
    fn accepts_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("entry");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).unwrap();

        validate_script_path(dir.path(), Path::new("entry")).unwrap();
    }

    #[test]
    fn rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let err = validate_script_path(dir.path(), Path::new("sub")).unwrap_err();
        assert!(matches!(err, Error::NotAFile { .. }));
    }
}
