//! Data-root layout: `~/.sendy` with `data/` (owner-only), `logs/`, and
//! `files/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub struct DataRoot {
    pub root: PathBuf,
    pub data: PathBuf,
    pub logs: PathBuf,
    pub files: PathBuf,
}

impl DataRoot {
    /// Resolve the root (explicit flag or `$HOME/.sendy`) and create the
    /// subdirectories.
    pub fn prepare(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let root = match explicit {
            Some(path) => path,
            None => home_dir().context("cannot determine home directory")?.join(".sendy"),
        };

        let data = root.join("data");
        let logs = root.join("logs");
        let files = root.join("files");

        fs::create_dir_all(&data).with_context(|| format!("create {}", data.display()))?;
        fs::create_dir_all(&logs).with_context(|| format!("create {}", logs.display()))?;
        fs::create_dir_all(&files).with_context(|| format!("create {}", files.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&data, fs::Permissions::from_mode(0o700))
                .with_context(|| format!("restrict {}", data.display()))?;
        }

        Ok(Self {
            root,
            data,
            logs,
            files,
        })
    }

    pub fn key_file(&self) -> PathBuf {
        self.data.join("key")
    }

    pub fn db_file(&self) -> PathBuf {
        self.data.join("chat.db")
    }

    pub fn log_dir(&self, component: &str) -> PathBuf {
        self.logs.join(component)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Timestamped log file under `dir`, created on demand.
pub fn open_log_file(dir: &Path, prefix: &str) -> anyhow::Result<std::fs::File> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let stamp = unix_stamp();
    let path = dir.join(format!("{prefix}-{stamp}.log"));
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))
}

fn unix_stamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
