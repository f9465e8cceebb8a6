// src/timestamp.rs
//
// Burnt-in timestamp readback. The recording device renders date and time
// into the image; we crop the known region, binarize it, and hand it to the
// tesseract executable the same way the lab machines already have it
// installed. Failure here is recoverable: the session continues.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use opencv::{
    core::{AlgorithmHint, Mat, Rect, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use std::path::PathBuf;
use std::process::Command;

use crate::config::TimestampConfig;
use crate::types::FrameStamp;

/// Source of date/time text for a frame. A trait seam so session logic can
/// be exercised without an OCR install.
pub trait TimestampSource {
    fn read(&self, frame: &Mat) -> Result<FrameStamp>;
}

pub struct OcrTimestampReader {
    region: Rect,
    threshold: f64,
    tesseract_cmd: String,
    scratch: PathBuf,
}

impl OcrTimestampReader {
    pub fn new(config: &TimestampConfig) -> Self {
        let [x, y, w, h] = config.region;
        Self {
            region: Rect::new(x, y, w, h),
            threshold: config.threshold,
            tesseract_cmd: config
                .tesseract_cmd
                .clone()
                .unwrap_or_else(|| "tesseract".to_string()),
            scratch: std::env::temp_dir().join(format!("coopmap_ts_{}.png", std::process::id())),
        }
    }
}

impl TimestampSource for OcrTimestampReader {
    fn read(&self, frame: &Mat) -> Result<FrameStamp> {
        // Clamp the configured region to the frame so a smaller test video
        // cannot push the crop out of bounds.
        let x = self.region.x.clamp(0, frame.cols());
        let y = self.region.y.clamp(0, frame.rows());
        let width = self.region.width.min(frame.cols() - x);
        let height = self.region.height.min(frame.rows() - y);
        if width <= 0 || height <= 0 {
            bail!("timestamp region lies outside the frame");
        }
        let region = Rect::new(x, y, width, height);

        let area = Mat::roi(frame, region)?.try_clone()?;
        let mut gray = Mat::default();
        imgproc::cvt_color(
            &area,
            &mut gray,
            imgproc::COLOR_BGR2GRAY,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;
        // Binary threshold for better recognition of the overlay glyphs.
        let mut binary = Mat::default();
        imgproc::threshold(&gray, &mut binary, self.threshold, 255.0, imgproc::THRESH_BINARY)?;

        let scratch = self
            .scratch
            .to_str()
            .context("scratch path is not valid UTF-8")?;
        if !imgcodecs::imwrite(scratch, &binary, &Vector::new())
            .context("failed to stage timestamp region for OCR")?
        {
            bail!("image writer refused timestamp scratch file {scratch}");
        }

        // --psm 7: treat the crop as a single text line.
        let output = Command::new(&self.tesseract_cmd)
            .arg(scratch)
            .arg("stdout")
            .args(["--psm", "7"])
            .output()
            .with_context(|| format!("failed to run {}", self.tesseract_cmd))?;
        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_stamp(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Expects `DD/MM/YYYY HH:MM:SS`, tolerating surrounding OCR noise spaces.
fn parse_stamp(raw: &str) -> Result<FrameStamp> {
    let mut tokens = raw.split_whitespace();
    let (Some(date), Some(time)) = (tokens.next(), tokens.next()) else {
        bail!("unparsable timestamp text {raw:?}");
    };

    NaiveDate::parse_from_str(date, "%d/%m/%Y")
        .with_context(|| format!("bad date text {date:?}"))?;
    NaiveTime::parse_from_str(time, "%H:%M:%S")
        .with_context(|| format!("bad time text {time:?}"))?;

    Ok(FrameStamp {
        date: date.to_string(),
        time: time.to_string(),
    })
}
