use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use super::{ObjectStoreT, PublishError, Result};

/// 本機目錄作為物件儲存，每個 key 對應目錄下的一個檔案。
///
/// 寫入先落在同目錄的暫存檔，`sync` 後再改名，讀取端不會看到寫到一半的檔案。
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// key 只能是單一檔名，不可含路徑分隔符或指向上層。
    fn verify_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(PublishError::InvalidKey("Empty key".to_string()));
        }
        if key.contains(['/', '\\', '\0', '\n', '\r']) {
            return Err(PublishError::InvalidKey(format!(
                "Invalid characters in key: {}",
                key
            )));
        }
        if key == "." || key == ".." {
            return Err(PublishError::InvalidKey(format!("Invalid key: {}", key)));
        }
        Ok(())
    }
}

impl ObjectStoreT for LocalDirectory {
    fn name(&self) -> &'static str {
        "local directory"
    }

    fn store(&self, key: &str, payload: &[u8]) -> Result<()> {
        Self::verify_key(key)?;
        std::fs::create_dir_all(&self.root)?;

        let mut temp = NamedTempFile::new_in(&self.root)?;
        temp.write_all(payload)?;
        temp.as_file().sync_all()?;
        temp.persist(self.root.join(key))
            .map_err(|e| PublishError::Io(e.error))?;
        Ok(())
    }
}
