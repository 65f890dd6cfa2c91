use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};

use live_stream::StreamError;

/// Lays out capture files inside an output directory
#[derive(Debug, Clone, Default)]
pub struct StorageManager;

impl StorageManager {
    pub fn new() -> Self {
        Self
    }

    /// Create the output directory if needed
    pub async fn create_work_dir<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, StreamError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        log::debug!("Output directory ready: {:?}", dir);
        Ok(dir.to_path_buf())
    }

    /// Create the next output file, named after the current local time.
    ///
    /// Never opens an existing file; a taken name gets a `_n` suffix.
    pub async fn create_file<P: AsRef<Path>>(&self, dir: P, ext: &str) -> Result<(PathBuf, File), StreamError> {
        let dir = dir.as_ref();
        let stem = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();

        let mut path = dir.join(format!("{}.{}", stem, ext));
        let mut n = 1;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    path = dir.join(format!("{}_{}.{}", stem, n, ext));
                    n += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Delete a file that ended up empty. Returns true if it was removed.
    pub async fn discard_if_empty<P: AsRef<Path>>(&self, file: P) -> Result<bool, StreamError> {
        let file = file.as_ref();
        let metadata = match fs::metadata(file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if metadata.len() > 0 {
            return Ok(false);
        }
        fs::remove_file(file).await?;
        log::debug!("Removed empty capture file: {:?}", file);
        Ok(true)
    }
}
