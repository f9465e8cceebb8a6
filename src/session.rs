// src/session.rs
//
// The review session: owns the managers and collaborators and threads them
// through the display loop. Single-threaded and cooperative; the window
// callback only enqueues pointer events, which are drained and dispatched on
// the loop thread. Persistence is synchronous, ordered write-before-display.

use anyhow::{bail, Context, Result};
use chrono::Local;
use opencv::{
    core::{Mat, Vector},
    highgui, imgcodecs,
    prelude::*,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::annotation::AnnotationMachine;
use crate::config::{Config, KeyMap};
use crate::coordinate::CoordinateManager;
use crate::mapping::SpatialMapper;
use crate::output::{CoordinateRow, ObservationLog, ObservationSink, OutputTarget};
use crate::overlay::{FontSpec, OverlayCoordinator};
use crate::timestamp::{OcrTimestampReader, TimestampSource};
use crate::types::PixelPoint;
use crate::video::{DisplayWindow, VideoSource};

const WINDOW_NAME: &str = "Video";

/// How long the screen-capture acknowledgment stays up. Short enough that it
/// never needs to pause playback.
const SCREENCAP_ACK_DURATION: Duration = Duration::from_millis(1150);

#[derive(Debug, Clone, Copy)]
enum PointerEvent {
    Primary(PixelPoint),
    Secondary(PixelPoint),
}

#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_displayed: u64,
    pub coordinates_recorded: u32,
    pub coordinates_cleared: u32,
    pub annotations_saved: u32,
    pub screencaps_saved: u32,
}

pub struct Session {
    keys: KeyMap,
    video: VideoSource,
    window: DisplayWindow,
    overlay: OverlayCoordinator,
    coords: CoordinateManager,
    annotation: AnnotationMachine,
    log: ObservationLog,
    annotation_target: OutputTarget,
    screencap_target: OutputTarget,
    stamps: Box<dyn TimestampSource>,
    events: Arc<Mutex<VecDeque<PointerEvent>>>,
    paused: bool,
    /// Last decoded frame; held across iterations while paused or typing.
    current: Option<Mat>,
    /// Raw frame captured when typing began; the annotation commit persists
    /// this, not whatever the loop shows later.
    frozen: Option<Mat>,
    screencap_ack_at: Option<Instant>,
    stats: SessionStats,
}

impl Session {
    pub fn new(config: &Config, mapper: Option<SpatialMapper>) -> Result<Self> {
        let keys = KeyMap::from_config(&config.keys)?;
        let session_stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let duration = Duration::from_secs_f64(config.display.duration_secs);

        let log_target = OutputTarget::new(&config.output.coords_dir)?;
        let log = ObservationLog::create(&log_target, &session_stamp, mapper.is_some())?;
        info!("Observations will be written to {}", log.path().display());

        let annotation_target =
            OutputTarget::new(Path::new(&config.output.annotations_dir).join(&session_stamp))?;
        let screencap_target =
            OutputTarget::new(Path::new(&config.output.screencaps_dir).join(&session_stamp))?;

        let video = VideoSource::open(&config.video.path, config.video.fallback_fps)?;
        let window = DisplayWindow::open(
            WINDOW_NAME,
            config.video.window_width,
            config.video.window_height,
        )?;

        Ok(Self {
            keys,
            video,
            window,
            overlay: OverlayCoordinator::new(FontSpec::from_config(&config.font)),
            coords: CoordinateManager::new(duration, mapper),
            annotation: AnnotationMachine::new(duration),
            log,
            annotation_target,
            screencap_target,
            stamps: Box::new(OcrTimestampReader::new(&config.timestamp)),
            events: Arc::new(Mutex::new(VecDeque::new())),
            paused: false,
            current: None,
            frozen: None,
            screencap_ack_at: None,
            stats: SessionStats::default(),
        })
    }

    pub fn run(&mut self) -> Result<SessionStats> {
        self.install_pointer_callback()?;
        let delay = self.video.frame_delay_ms();

        loop {
            let typing = self.annotation.is_typing();

            // Typing suspends frame advancement entirely; pause holds the
            // current frame while overlays keep compositing.
            if !typing && !self.paused {
                match self.video.read_frame()? {
                    Some(frame) => self.current = Some(frame),
                    None => break,
                }
            }
            if self.current.is_none() {
                break;
            }

            // One cooperative scheduling point: playback waits a frame
            // period, typing blocks until the next key.
            let key = self.window.wait_key(if typing { 0 } else { delay })?;
            let now = Instant::now();

            self.drain_pointer_events(now)?;

            if self.annotation.is_typing() {
                self.annotation.handle_key(key, now);
            } else {
                if self.keys.exit.matches(key) {
                    info!("Exit key pressed");
                    break;
                }
                self.handle_control_key(key, now)?;
            }

            self.persist_committed_annotation(now)?;

            self.coords.expire(now);
            if let Some(shown_at) = self.screencap_ack_at {
                if now.duration_since(shown_at) >= SCREENCAP_ACK_DURATION {
                    self.screencap_ack_at = None;
                }
            }

            self.display()?;
        }

        Ok(std::mem::take(&mut self.stats))
    }

    /// Releases the capture and the window. Safe to call on every exit path.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.video.release() {
            warn!("Failed to release video capture: {e}");
        }
        DisplayWindow::close_all();
    }

    fn install_pointer_callback(&self) -> Result<()> {
        let queue = Arc::clone(&self.events);
        highgui::set_mouse_callback(
            self.window.name(),
            Some(Box::new(move |event, x, y, _flags| {
                let pointer = if event == highgui::EVENT_LBUTTONDOWN {
                    Some(PointerEvent::Primary(PixelPoint::new(x, y)))
                } else if event == highgui::EVENT_RBUTTONDOWN {
                    Some(PointerEvent::Secondary(PixelPoint::new(x, y)))
                } else {
                    None
                };
                if let Some(pointer) = pointer {
                    if let Ok(mut queue) = queue.lock() {
                        queue.push_back(pointer);
                    }
                }
            })),
        )?;
        Ok(())
    }

    fn drain_pointer_events(&mut self, now: Instant) -> Result<()> {
        let drained: Vec<PointerEvent> = match self.events.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        for event in drained {
            // Pointer input is modal: ignored while an annotation is typed.
            if self.annotation.is_typing() {
                continue;
            }
            match event {
                PointerEvent::Primary(point) => self.record_coordinate(point, now)?,
                PointerEvent::Secondary(point) => self.begin_annotation(point, now)?,
            }
        }
        Ok(())
    }

    fn record_coordinate(&mut self, point: PixelPoint, now: Instant) -> Result<()> {
        let Some(frame) = self.current.as_ref() else {
            return Ok(());
        };
        let stamp = match self.stamps.read(frame) {
            Ok(stamp) => stamp,
            Err(e) => {
                // Recoverable: a row with made-up time text would corrupt the
                // researcher's data, so the click is dropped instead.
                warn!("Timestamp extraction failed; coordinate not recorded: {e:#}");
                return Ok(());
            }
        };

        let physical = self.coords.set_coordinate(point, now);
        let row = CoordinateRow {
            date: stamp.date,
            time: stamp.time,
            pixel: point,
            physical,
        };
        // Log before the coordinate ever shows on screen.
        self.log.append(&row)?;
        self.stats.coordinates_recorded += 1;

        // Echo to the console in case the log file is later corrupted.
        match physical {
            Some(physical) => info!("{} {} {} {}", row.date, row.time, point, physical),
            None => info!("{} {} {}", row.date, row.time, point),
        }
        Ok(())
    }

    fn begin_annotation(&mut self, point: PixelPoint, _now: Instant) -> Result<()> {
        let Some(frame) = self.current.as_ref() else {
            return Ok(());
        };
        let time_text = match self.stamps.read(frame) {
            Ok(stamp) => stamp.time,
            Err(e) => {
                // The image is the payload; a wall-clock name is good enough.
                warn!("Timestamp extraction failed; using wall clock for annotation name: {e:#}");
                Local::now().format("%H:%M:%S").to_string()
            }
        };

        self.frozen = Some(frame.try_clone()?);
        self.annotation
            .begin(point, &time_text, &self.annotation_target);
        // Typing owns the frame: the on-screen coordinate must not pop back
        // up over the annotation. The logged row is untouched.
        self.coords.suppress();
        Ok(())
    }

    fn handle_control_key(&mut self, key: i32, now: Instant) -> Result<()> {
        if self.keys.clear.matches(key) {
            if self.coords.active().is_some() {
                self.coords.clear_recorded(&mut self.log)?;
                self.stats.coordinates_cleared += 1;
                debug!("Coordinate cleared and last row retracted");
            }
        } else if self.keys.pause.matches(key) {
            self.paused = !self.paused;
            debug!("Playback {}", if self.paused { "paused" } else { "resumed" });
        } else if self.keys.screencap.matches(key) && self.screencap_ack_at.is_none() {
            self.save_screencap(now)?;
        }
        Ok(())
    }

    fn save_screencap(&mut self, now: Instant) -> Result<()> {
        let Some(frame) = self.current.as_ref() else {
            return Ok(());
        };
        let time_text = match self.stamps.read(frame) {
            Ok(stamp) => stamp.time,
            Err(e) => {
                warn!("Timestamp extraction failed; using wall clock for screencap name: {e:#}");
                Local::now().format("%H:%M:%S").to_string()
            }
        };
        let path = self
            .screencap_target
            .next_available(&format!("{}.jpg", time_text.replace(':', "-")));

        // The raw frame, never the composited one.
        save_image(&path, frame)?;
        self.screencap_ack_at = Some(now);
        self.stats.screencaps_saved += 1;
        info!("✓ Screencap saved: {}", path.display());
        Ok(())
    }

    fn persist_committed_annotation(&mut self, now: Instant) -> Result<()> {
        if let Some(write) = self.annotation.tick(now) {
            let frozen = self.frozen.take();
            let Some(base) = frozen.as_ref().or(self.current.as_ref()) else {
                return Ok(());
            };
            let image = self.overlay.render_annotation(base, &write.text, write.anchor)?;
            save_image(&write.path, &image)?;
            self.stats.annotations_saved += 1;
            info!("✓ Annotation saved: {}", write.path.display());
        } else if !self.annotation.is_typing() && !self.annotation.is_write_pending() {
            // Typing ended without a commit; the held frame is stale.
            self.frozen = None;
        }
        Ok(())
    }

    fn display(&mut self) -> Result<()> {
        let Some(base) = self.current.as_ref() else {
            return Ok(());
        };
        let frame = self.overlay.compose(
            base,
            self.coords.active(),
            self.annotation.overlay(),
            self.screencap_ack_at.is_some(),
        )?;
        self.window.show(&frame)?;
        self.stats.frames_displayed += 1;
        Ok(())
    }
}

fn save_image(path: &Path, image: &Mat) -> Result<()> {
    let path_str = path.to_str().context("output path is not valid UTF-8")?;
    if !imgcodecs::imwrite(path_str, image, &Vector::new())? {
        bail!("image writer refused {path_str}");
    }
    Ok(())
}
