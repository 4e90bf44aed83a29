//! Media folder handle. Its lifetime follows the collection's open/close.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Media {
    dir: PathBuf,
    connected: bool,
}

impl Media {
    /// Media handle for the collection at `col_path`: `<stem>.media` beside it.
    pub fn for_collection(col_path: &Path) -> Self {
        let stem = col_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "collection".to_string());
        let dir = col_path.with_file_name(format!("{}.media", stem));
        Self {
            dir,
            connected: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Create the folder if needed and mark the handle usable.
    pub fn connect(&mut self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.connected = true;
        log::debug!("Media folder connected at {:?}", self.dir);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.connected {
            self.connected = false;
            log::debug!("Media folder closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_connect_creates_folder() {
        let temp_dir = TempDir::new().unwrap();
        let mut media = Media::for_collection(&temp_dir.path().join("collection.anki2"));
        assert_eq!(media.dir(), temp_dir.path().join("collection.media"));
        assert!(!media.is_connected());

        media.connect().unwrap();
        assert!(media.dir().is_dir());
        media.close();
        media.close();
        assert!(!media.is_connected());
    }
}
