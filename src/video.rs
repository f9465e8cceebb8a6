// src/video.rs

use anyhow::{bail, Result};
use opencv::{
    core::Mat,
    highgui,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{info, warn};

/// Frame source for one review session.
pub struct VideoSource {
    cap: VideoCapture,
    pub fps: f64,
    pub width: i32,
    pub height: i32,
    pub total_frames: i32,
    pub current_frame: i32,
}

impl VideoSource {
    pub fn open(path: &str, fallback_fps: f64) -> Result<Self> {
        info!("Opening video: {path}");

        let cap = VideoCapture::from_file(path, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            bail!("failed to open video file {path}");
        }

        let mut fps = cap.get(videoio::CAP_PROP_FPS)?;
        if fps <= 0.0 {
            warn!("Container reports no frame rate; assuming {fallback_fps} FPS");
            fps = fallback_fps;
        }
        let total_frames = cap.get(videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            cap,
            fps,
            width,
            height,
            total_frames,
            current_frame: 0,
        })
    }

    /// Inter-frame delay for playback at recorded speed, in milliseconds.
    pub fn frame_delay_ms(&self) -> i32 {
        ((1000.0 / self.fps) as i32).max(1)
    }

    pub fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut mat = Mat::default();
        if !self.cap.read(&mut mat)? || mat.empty() {
            return Ok(None);
        }
        self.current_frame += 1;
        Ok(Some(mat))
    }

    pub fn release(&mut self) -> Result<()> {
        self.cap.release()?;
        Ok(())
    }
}

/// The review window.
pub struct DisplayWindow {
    name: String,
}

impl DisplayWindow {
    pub fn open(name: &str, width: i32, height: i32) -> Result<Self> {
        highgui::named_window(name, highgui::WINDOW_NORMAL)?;
        highgui::resize_window(name, width, height)?;
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn show(&self, frame: &Mat) -> Result<()> {
        highgui::imshow(&self.name, frame)?;
        Ok(())
    }

    /// Blocks up to `delay_ms` (forever when 0) and returns the pressed key,
    /// masked to its LSByte for cross-platform compatibility, or -1.
    pub fn wait_key(&self, delay_ms: i32) -> Result<i32> {
        let key = highgui::wait_key(delay_ms)?;
        Ok(if key > 0 { key & 0xff } else { key })
    }

    pub fn close_all() {
        if let Err(e) = highgui::destroy_all_windows() {
            warn!("Failed to destroy display windows: {e}");
        }
    }
}
