use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::DispatchError;
use crate::event::FrameMessage;

/// Hands a frame to the identification stage without waiting for it to run.
pub trait Dispatcher {
    fn dispatch(&self, message: &FrameMessage) -> Result<(), DispatchError>;
}

/// Queues messages as JSON files in a spool directory.
///
/// File names start with a millisecond timestamp so a sorted listing is
/// arrival order. Consumers call [`SpoolDispatcher::complete`] or
/// [`SpoolDispatcher::fail`] once a message has been handled.
#[derive(Debug, Clone)]
pub struct SpoolDispatcher {
    dir: PathBuf,
}

/// A message waiting in the spool.
#[derive(Debug, Clone)]
pub struct Spooled {
    pub path: PathBuf,
    pub message: FrameMessage,
}

impl SpoolDispatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pending messages, oldest first. Unreadable files are logged and skipped.
    pub fn pending(&self) -> Result<Vec<Spooled>, DispatchError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = fs::read(&path)
                .map_err(DispatchError::from)
                .and_then(|raw| serde_json::from_slice::<FrameMessage>(&raw).map_err(Into::into));
            match parsed {
                Ok(message) => out.push(Spooled { path, message }),
                Err(e) => log::warn!("skipping unreadable spool entry {}: {}", path.display(), e),
            }
        }
        Ok(out)
    }

    /// Remove a handled message.
    pub fn complete(&self, entry: &Spooled) -> Result<(), DispatchError> {
        fs::remove_file(&entry.path)?;
        Ok(())
    }

    /// Park a message whose handling failed so it is not picked up again.
    pub fn fail(&self, entry: &Spooled) -> Result<PathBuf, DispatchError> {
        let mut parked = entry.path.clone().into_os_string();
        parked.push(".failed");
        let parked = PathBuf::from(parked);
        fs::rename(&entry.path, &parked)?;
        Ok(parked)
    }
}

impl Dispatcher for SpoolDispatcher {
    fn dispatch(&self, message: &FrameMessage) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(message)?;
        fs::create_dir_all(&self.dir)?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let name = format!("{:013}-{}", millis, uuid::Uuid::new_v4());
        let tmp = self.dir.join(format!(".{}.partial", name));
        let path = self.dir.join(format!("{}.json", name));

        fs::write(&tmp, payload)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::info!(
            "dispatched {}/{} to {}",
            message.bucket,
            message.key,
            path.display()
        );
        Ok(())
    }
}
