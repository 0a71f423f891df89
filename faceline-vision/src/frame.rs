use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder binary not found: {0}")]
    MissingDecoder(PathBuf),
    #[error("decoder exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("decoder produced no frame at {0}")]
    NoOutput(PathBuf),
    #[error("decoder did not finish within {0:?}")]
    Timeout(Duration),
    #[error("decoder io: {0}")]
    Io(#[from] io::Error),
}

/// Something that can turn a video file into a still image of its first frame.
pub trait FrameDecoder {
    fn extract_first_frame(&self, video: &Path, output: &Path) -> Result<PathBuf, DecodeError>;
}

/// Runs an ffmpeg binary as a subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    pub path: PathBuf,
    pub timeout: Duration,
}

impl FfmpegDecoder {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn args(video: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            video.display().to_string(),
            "-vf".to_string(),
            "select=eq(n\\,0)".to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            output.display().to_string(),
            "-y".to_string(),
        ]
    }

    fn wait_with_deadline(&self, child: &mut Child) -> Result<ExitStatus, DecodeError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                log::error!("decoder exceeded {:?}, killing pid {}", self.timeout, child.id());
                let _ = child.kill();
                let _ = child.wait();
                return Err(DecodeError::Timeout(self.timeout));
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn extract_first_frame(&self, video: &Path, output: &Path) -> Result<PathBuf, DecodeError> {
        let args = Self::args(video, output);
        log::info!("running decoder: {} {}", self.path.display(), args.join(" "));

        let mut child = Command::new(&self.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => DecodeError::MissingDecoder(self.path.clone()),
                _ => DecodeError::Io(e),
            })?;

        // ffmpeg logs everything to stderr; drain it so the pipe never fills.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let status = self.wait_with_deadline(&mut child)?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            log::error!("decoder failed: {}", stderr.trim());
            return Err(DecodeError::Failed {
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        log::debug!("decoder output: {}", stderr.trim());

        if !output.is_file() {
            return Err(DecodeError::NoOutput(output.to_path_buf()));
        }
        log::info!("extracted first frame to {}", output.display());
        Ok(output.to_path_buf())
    }
}
