//! Frame backup
//!
//! Writes every fragment of every view of one frame as JSON lines:
//!
//! ```text
//! {"version":"0.1.0","host":"localhost:15000","database":"d","frame":"f"}
//! {"view":"inverse","slice":0,"bits":[[1,2]]}
//! {"view":"standard","slice":0,"bits":[[2,1]]}
//! {"view":"standard","slice":3,"bits":[[2,3145728]]}
//! ```
//!
//! Views are emitted by name, fragments by slice. A view directory without a
//! `fragments/` directory has never been written and is skipped, so the
//! backup does not create one. Opening a view that does have fragments can
//! still trim a partial record off the end of a fragment log.

use crate::error::{Error, Result};
use crate::storage::{FileFragment, Fragment, View};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Directory under a frame that holds its views
const VIEWS_DIR: &str = "views";

/// Directory under a view that holds its fragment files
const FRAGMENTS_DIR: &str = "fragments";

/// First line of a backup stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHeader {
    pub version: String,
    pub host: String,
    pub database: String,
    pub frame: String,
}

/// One fragment's bits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub view: String,
    pub slice: u64,
    pub bits: Vec<(u64, u64)>,
}

/// Backs up a frame into a single file
#[derive(Debug, Clone)]
pub struct BackupCommand {
    /// host:port recorded as the source of the backup
    pub host: String,
    pub database: String,
    pub frame: String,
    /// Output file; stdout when unset
    pub path: Option<PathBuf>,
    /// Root of the database/frame/view tree
    pub data_dir: PathBuf,
}

impl BackupCommand {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            host: "localhost:15000".to_string(),
            database: String::new(),
            frame: String::new(),
            path: None,
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::InvalidArgument("database required".to_string()));
        }
        if self.frame.is_empty() {
            return Err(Error::InvalidArgument("frame required".to_string()));
        }

        info!(
            host = %self.host,
            db = %self.database,
            frame = %self.frame,
            "Starting backup"
        );

        let cmd = self.clone();
        let records = tokio::task::spawn_blocking(move || cmd.collect())
            .await
            .map_err(|e| Error::InvalidState(format!("backup task failed: {}", e)))??;

        let buf = self.encode(&records)?;
        match &self.path {
            Some(path) => tokio::fs::write(path, &buf).await?,
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&buf).await?;
                stdout.flush().await?;
            }
        }

        info!(fragments = records.len(), bytes = buf.len(), "Backup complete");
        Ok(())
    }

    fn views_dir(&self) -> PathBuf {
        self.data_dir
            .join(&self.database)
            .join(&self.frame)
            .join(VIEWS_DIR)
    }

    /// Opens each view of the frame and snapshots its fragments
    fn collect(&self) -> Result<Vec<FragmentRecord>> {
        let views_dir = self.views_dir();
        if !views_dir.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "frame not found: {}/{}",
                self.database, self.frame
            )));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&views_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut records = Vec::new();
        for name in names {
            if !views_dir.join(&name).join(FRAGMENTS_DIR).is_dir() {
                debug!(view = %name, "Skipping view without fragments");
                continue;
            }

            let view: View<FileFragment> =
                View::new(views_dir.join(&name), &self.database, &self.frame, &name);
            view.open()?;

            let mut fragments = view.fragments();
            fragments.sort_by_key(|f| f.slice());
            for frag in fragments {
                debug!(view = %name, slice = frag.slice(), bits = frag.len(), "Backing up fragment");
                records.push(FragmentRecord {
                    view: name.clone(),
                    slice: frag.slice(),
                    bits: frag.bits(),
                });
            }

            view.close()?;
        }
        Ok(records)
    }

    fn encode(&self, records: &[FragmentRecord]) -> Result<Vec<u8>> {
        let header = BackupHeader {
            version: crate::VERSION.to_string(),
            host: self.host.clone(),
            database: self.database.clone(),
            frame: self.frame.clone(),
        };

        let mut buf = Vec::new();
        write_line(&mut buf, &header)?;
        for record in records {
            write_line(&mut buf, record)?;
        }
        Ok(buf)
    }
}

fn write_line<T: Serialize>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *buf, value)
        .map_err(|e| Error::SerializationError(format!("Failed to encode backup line: {}", e)))?;
    buf.push(b'\n');
    Ok(())
}
