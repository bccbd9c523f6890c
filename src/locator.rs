use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A candidate database found under the scan root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseFile {
    pub path: PathBuf,
    /// Position in discovery order. Output is appended in this order.
    pub order: usize,
}

/// Collect every file under `root` whose name is one of `file_names`.
///
/// One full walk per name, concatenated, so all primary databases precede all
/// backups. Within a directory entries are visited in name order. Subdirectories
/// that cannot be read are logged and skipped; only a failure to read `root`
/// itself is returned.
pub fn locate_databases(root: &Path, file_names: &[String]) -> io::Result<Vec<DatabaseFile>> {
    let mut paths = Vec::new();
    for name in file_names {
        collect_named(root, OsStr::new(name), &mut paths)?;
    }
    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(order, path)| DatabaseFile { path, order })
        .collect())
}

fn collect_named(dir: &Path, name: &OsStr, found: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries: Vec<fs::DirEntry> = Vec::new();
    for entry in fs::read_dir(dir)? {
        match entry {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::debug!(dir = %dir.display(), "skipping unreadable entry: {e}");
            }
        }
    }
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                tracing::debug!(entry = %entry.path().display(), "skipping entry: {e}");
                continue;
            }
        };
        let path = entry.path();
        if file_type.is_dir() {
            if let Err(e) = collect_named(&path, name, found) {
                tracing::warn!(dir = %path.display(), "skipping unreadable directory: {e}");
            }
        } else if entry.file_name() == name
            && (file_type.is_file() || (file_type.is_symlink() && path.is_file()))
        {
            found.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::default_file_names;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn primaries_come_before_backups() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("a/state.vscdb.backup"));
        touch(&root.join("a/state.vscdb"));
        touch(&root.join("b/state.vscdb.backup"));
        touch(&root.join("b/nested/deeper/state.vscdb"));

        let found = locate_databases(root, &default_file_names()).unwrap();
        assert_eq!(found.len(), 4);

        let names: Vec<_> = found
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["state.vscdb", "state.vscdb", "state.vscdb.backup", "state.vscdb.backup"]
        );
        for (i, db) in found.iter().enumerate() {
            assert_eq!(db.order, i);
        }
    }

    #[test]
    fn ignores_similar_names_and_directories() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("x/state.vscdb-journal"));
        touch(&root.join("x/old-state.vscdb"));
        fs::create_dir_all(root.join("y/state.vscdb")).unwrap();

        let found = locate_databases(root, &default_file_names()).unwrap();
        assert!(found.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_does_not_stop_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("a/state.vscdb"));
        touch(&root.join("locked/state.vscdb"));
        touch(&root.join("z/state.vscdb"));
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();

        let found = locate_databases(root, &default_file_names());
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        let found = found.unwrap();
        assert!(found.iter().any(|d| d.path == root.join("a/state.vscdb")));
        assert!(found.iter().any(|d| d.path == root.join("z/state.vscdb")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(locate_databases(&tmp.path().join("nope"), &default_file_names()).is_err());
    }
}
