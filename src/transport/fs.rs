use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::SyncError;

/// Open the extract at `location` as a buffered line stream.
///
/// Locations are plain filesystem paths; a leading `file://` is accepted.
pub fn open_location(location: &str) -> Result<BufReader<File>, SyncError> {
    let path = location_path(location);
    let file = File::open(&path)?;
    debug!(path = %path.display(), "extract opened");
    Ok(BufReader::new(file))
}

/// Filesystem path named by a location string.
pub fn location_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

/// True if the path has a `.txt` extension (case-insensitive).
pub fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}

/// Extract files under `path`.
///
/// A file is returned as is; a directory yields its `.txt` entries (not
/// recursive) in name order.
pub fn list_extracts(path: &Path) -> Result<Vec<PathBuf>, SyncError> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_text_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    debug!(dir = %path.display(), extracts = files.len(), "extract directory listed");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::BufRead;
    use tempfile::tempdir;

    #[test]
    fn opens_plain_and_file_url_locations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appointments.txt");
        fs::write(&path, "Header|Appointment\n1|2|Registered|20200101|||||\n").unwrap();

        let location = path.to_string_lossy().to_string();
        let lines: Vec<String> = open_location(&location)
            .unwrap()
            .lines()
            .map(Result::unwrap)
            .collect();
        assert_eq!(lines.len(), 2);

        let url = format!("file://{location}");
        assert!(open_location(&url).is_ok());
        assert!(matches!(
            open_location(&format!("{location}.missing")),
            Err(SyncError::Io(_))
        ));
    }

    #[test]
    fn directories_list_text_extracts_in_order() {
        let dir = tempdir().unwrap();
        for name in ["b.txt", "a.TXT", "notes.md"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.txt")).unwrap();
        let names: Vec<String> = list_extracts(dir.path())
            .unwrap()
            .iter()
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a.TXT", "b.txt"]);

        let single = dir.path().join("b.txt");
        assert_eq!(list_extracts(&single).unwrap(), vec![single]);
    }
}
