use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::TransferError;

/// Narrow interface to the object store both stages read from and write to.
pub trait ObjectStore {
    fn download(&self, container: &str, key: &str, dest: &Path) -> Result<(), TransferError>;

    fn upload(&self, src: &Path, container: &str, key: &str) -> Result<(), TransferError>;

    fn get_bytes(&self, container: &str, key: &str) -> Result<Vec<u8>, TransferError>;

    fn put_bytes(&self, data: &[u8], container: &str, key: &str) -> Result<(), TransferError>;
}

/// Object store backed by a directory tree: `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, TransferError> {
        let denied = || TransferError::PermissionDenied {
            container: container.to_string(),
            key: key.to_string(),
        };
        let container_ok = !container.is_empty()
            && Path::new(container)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        let key_ok = !key.is_empty()
            && Path::new(key)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !container_ok || !key_ok {
            return Err(denied());
        }
        Ok(self.root.join(container).join(key))
    }

    fn write_atomically(
        &self,
        container: &str,
        key: &str,
        write: impl FnOnce(&Path) -> io::Result<()>,
    ) -> Result<(), TransferError> {
        let path = self.object_path(container, key)?;
        let io_err = |e| TransferError::from_io(container, key, e);

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(io_err)?;

        let tmp = parent.join(format!(".{}.partial", uuid::Uuid::new_v4()));
        if let Err(e) = write(&tmp).and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn download(&self, container: &str, key: &str, dest: &Path) -> Result<(), TransferError> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| TransferError::from_io(container, key, e))?;
        }
        fs::copy(&path, dest).map_err(|e| TransferError::from_io(container, key, e))?;
        log::info!("downloaded {}/{} to {}", container, key, dest.display());
        Ok(())
    }

    fn upload(&self, src: &Path, container: &str, key: &str) -> Result<(), TransferError> {
        self.write_atomically(container, key, |tmp| fs::copy(src, tmp).map(|_| ()))?;
        log::info!("uploaded {} to {}/{}", src.display(), container, key);
        Ok(())
    }

    fn get_bytes(&self, container: &str, key: &str) -> Result<Vec<u8>, TransferError> {
        let path = self.object_path(container, key)?;
        fs::read(&path).map_err(|e| TransferError::from_io(container, key, e))
    }

    fn put_bytes(&self, data: &[u8], container: &str, key: &str) -> Result<(), TransferError> {
        self.write_atomically(container, key, |tmp| fs::write(tmp, data))?;
        log::info!("stored {} bytes at {}/{}", data.len(), container, key);
        Ok(())
    }
}
