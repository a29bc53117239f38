use anyhow::{Context, Result};
use isolation_watch::config::CameraConfig;
use isolation_watch::session::{FrameDimensions, VideoSource};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::info;

/// A BGR frame straight from OpenCV.
pub struct CameraFrame(pub Mat);

impl FrameDimensions for CameraFrame {
    fn dimensions(&self) -> (u32, u32) {
        (self.0.cols().max(0) as u32, self.0.rows().max(0) as u32)
    }
}

/// Camera or video file opened through `VideoCapture`.
pub struct OpenCvSource {
    capture: VideoCapture,
}

impl OpenCvSource {
    pub fn open(camera: &CameraConfig) -> Result<Self> {
        let mut capture = match &camera.file {
            Some(path) => VideoCapture::from_file(path, videoio::CAP_ANY)
                .with_context(|| format!("Failed to open video file {path}"))?,
            None => VideoCapture::new(camera.index, videoio::CAP_ANY)
                .with_context(|| format!("Failed to open camera {}", camera.index))?,
        };

        if !capture.is_opened()? {
            anyhow::bail!("Video source is not available (camera {}, file {:?})", camera.index, camera.file);
        }

        if let Some(w) = camera.width {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, f64::from(w))?;
        }
        if let Some(h) = camera.height {
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, f64::from(h))?;
        }

        info!(
            width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)?,
            height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)?,
            fps = capture.get(videoio::CAP_PROP_FPS)?,
            "video source opened"
        );
        Ok(Self { capture })
    }
}

impl VideoSource for OpenCvSource {
    type Frame = CameraFrame;

    fn read(&mut self) -> Result<Option<CameraFrame>> {
        let mut frame = Mat::default();
        let ok = self.capture.read(&mut frame).context("Failed to read frame")?;
        if !ok || frame.empty() {
            return Ok(None);
        }
        Ok(Some(CameraFrame(frame)))
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!(error = %e, "failed to release video source");
        } else {
            info!("video source released");
        }
    }
}
