use std::path::{Path, PathBuf};

use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
};

/// Replaces the contents of `path` so that readers either see the old file or the complete new
/// one. Data goes to a sibling temporary file first, which is then renamed over the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let temporary = temporary_sibling(path);

    let mut file = File::create(&temporary).await?;
    let written = async {
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = fs::remove_file(&temporary).await;
        return Err(e);
    }

    fs::rename(&temporary, path).await
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Advisory lock held on a side file for as long as the guard lives. Renaming replaces the
/// locked file itself, so the lock can't live on the data file.
pub struct FileLock {
    file: File,
}

impl FileLock {
    async fn open(path: &Path) -> Result<File, io::Error> {
        File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await
    }

    pub async fn exclusive(path: &Path) -> Result<Self, io::Error> {
        let file = Self::open(path).await?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    pub async fn shared(path: &Path) -> Result<Self, io::Error> {
        let file = Self::open(path).await?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    pub async fn release(self) -> Result<(), io::Error> {
        self.file.unlock_async().await
    }
}
