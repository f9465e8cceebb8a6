// src/annotation.rs
//
// Modal free-text annotation. While the machine is Typing the outer loop
// stops advancing frames and routes every key here; the machine itself never
// touches the screen or the disk — it emits a one-shot write order that the
// session executes against the frame frozen at typing start.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::output::OutputTarget;
use crate::types::PixelPoint;

const KEY_ENTER: i32 = 13;
const KEY_ESC: i32 = 27;
const KEY_BACKSPACE: i32 = 8;
const KEY_DELETE: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationState {
    Idle,
    Typing,
}

/// Image write order, emitted exactly once per committed annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub path: PathBuf,
    pub text: String,
    pub anchor: PixelPoint,
}

pub struct AnnotationMachine {
    state: AnnotationState,
    anchor: PixelPoint,
    buffer: String,
    target: Option<PathBuf>,
    committed_at: Option<Instant>,
    write_pending: bool,
    show: bool,
    display_duration: Duration,
}

impl AnnotationMachine {
    pub fn new(display_duration: Duration) -> Self {
        Self {
            state: AnnotationState::Idle,
            anchor: PixelPoint::new(0, 0),
            buffer: String::new(),
            target: None,
            committed_at: None,
            write_pending: false,
            show: false,
            display_duration,
        }
    }

    pub fn state(&self) -> AnnotationState {
        self.state
    }

    pub fn is_typing(&self) -> bool {
        self.state == AnnotationState::Typing
    }

    pub fn is_write_pending(&self) -> bool {
        self.write_pending
    }

    /// Secondary-pointer-down: enter Typing anchored at the click, with an
    /// output path derived from the frame's time text and resolved against
    /// existing files so a same-second annotation never overwrites.
    pub fn begin(&mut self, anchor: PixelPoint, time_text: &str, target: &OutputTarget) {
        if self.state == AnnotationState::Typing {
            return;
        }
        let name = format!("{}.jpg", time_text.replace(':', "-"));
        let path = target.next_available(&name);
        debug!("Annotation started at {} -> {}", anchor, path.display());

        self.anchor = anchor;
        self.buffer.clear();
        self.target = Some(path);
        self.committed_at = None;
        self.write_pending = false;
        self.show = true;
        self.state = AnnotationState::Typing;
    }

    /// Key event while Typing. Unrecognized codes produce no transition and
    /// no error; exit/clear/pause bindings are plain text here by design.
    pub fn handle_key(&mut self, key: i32, now: Instant) {
        if self.state != AnnotationState::Typing {
            return;
        }
        match key {
            KEY_ENTER => {
                self.state = AnnotationState::Idle;
                self.write_pending = true;
                self.committed_at = Some(now);
            }
            KEY_ESC => {
                self.state = AnnotationState::Idle;
                self.show = false;
                self.buffer.clear();
                self.target = None;
            }
            KEY_BACKSPACE | KEY_DELETE => {
                // No-op on an empty buffer, not an error.
                self.buffer.pop();
            }
            k if is_printable(k) => {
                self.buffer.push(k as u8 as char);
                self.show = true;
            }
            _ => {}
        }
    }

    /// Frame tick while Idle: first emits the one-shot write order for a
    /// committed annotation, then decays the on-screen text once its
    /// display duration has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<PendingWrite> {
        if self.state == AnnotationState::Typing {
            return None;
        }

        if self.write_pending {
            self.write_pending = false;
            if let Some(path) = self.target.take() {
                return Some(PendingWrite {
                    path,
                    text: self.buffer.clone(),
                    anchor: self.anchor,
                });
            }
        }

        if self.show {
            if let Some(committed_at) = self.committed_at {
                if now.duration_since(committed_at) >= self.display_duration {
                    self.show = false;
                    self.buffer.clear();
                }
            }
        }
        None
    }

    /// Text and anchor to draw this frame, if any.
    pub fn overlay(&self) -> Option<(&str, PixelPoint)> {
        if self.show && !self.buffer.is_empty() {
            Some((self.buffer.as_str(), self.anchor))
        } else {
            None
        }
    }
}

fn is_printable(key: i32) -> bool {
    (0x20..=0x7e).contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn mk_target() -> OutputTarget {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "coopmap_anno_test_{}_{}",
            std::process::id(),
            seq
        ));
        OutputTarget::new(dir).unwrap()
    }

    fn mk_typing(machine: &mut AnnotationMachine, target: &OutputTarget) {
        machine.begin(PixelPoint::new(320, 240), "14:03:55", target);
    }

    fn type_text(machine: &mut AnnotationMachine, text: &str, now: Instant) {
        for c in text.chars() {
            machine.handle_key(c as i32, now);
        }
    }

    #[test]
    fn test_commit_emits_exactly_one_write() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        type_text(&mut machine, "Hi", now);
        machine.handle_key(13, now);
        assert_eq!(machine.state(), AnnotationState::Idle);

        let write = machine.tick(now).unwrap();
        assert_eq!(write.text, "Hi");
        assert_eq!(write.anchor, PixelPoint::new(320, 240));
        assert_eq!(write.path.file_name().unwrap(), "14-03-55.jpg");

        // The order is one-shot.
        assert!(machine.tick(now).is_none());
    }

    #[test]
    fn test_display_persists_then_decays() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        type_text(&mut machine, "Hi", now);
        machine.handle_key(13, now);
        machine.tick(now);

        assert_eq!(machine.overlay(), Some(("Hi", PixelPoint::new(320, 240))));
        machine.tick(now + Duration::from_secs(4));
        assert!(machine.overlay().is_some());

        machine.tick(now + Duration::from_secs(5));
        assert!(machine.overlay().is_none());
    }

    #[test]
    fn test_backspace_on_empty_buffer_is_noop() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        machine.handle_key('H' as i32, now);
        machine.handle_key(8, now);
        machine.handle_key(8, now);
        assert!(machine.is_typing());
        assert!(machine.overlay().is_none());
    }

    #[test]
    fn test_typing_round_trip_returns_to_empty() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        type_text(&mut machine, "peck order", now);
        for _ in 0.."peck order".len() {
            machine.handle_key(127, now);
        }
        assert!(machine.overlay().is_none());
        machine.handle_key(8, now);
        assert!(machine.is_typing());
    }

    #[test]
    fn test_cancel_suppresses_display_and_write() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        type_text(&mut machine, "oops", now);
        machine.handle_key(27, now);

        assert_eq!(machine.state(), AnnotationState::Idle);
        assert!(machine.overlay().is_none());
        assert!(machine.tick(now).is_none());
    }

    #[test]
    fn test_unrecognized_keys_are_ignored() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        for key in [-1, 0, 9, 10, 255, 0x52] {
            machine.handle_key(key, now);
        }
        // 0x52 ('R') is printable; everything else is dropped.
        assert_eq!(machine.overlay().unwrap().0, "R");
        assert!(machine.is_typing());
    }

    #[test]
    fn test_exit_key_is_text_while_typing() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        machine.handle_key('q' as i32, now);
        assert!(machine.is_typing());
        assert_eq!(machine.overlay().unwrap().0, "q");
    }

    #[test]
    fn test_same_second_annotations_get_distinct_paths() {
        let target = mk_target();
        let now = Instant::now();

        let mut first = AnnotationMachine::new(Duration::from_secs(5));
        mk_typing(&mut first, &target);
        first.handle_key(13, now);
        let write = first.tick(now).unwrap();
        std::fs::write(&write.path, b"jpg").unwrap();

        let mut second = AnnotationMachine::new(Duration::from_secs(5));
        mk_typing(&mut second, &target);
        second.handle_key(13, now);
        let write_2 = second.tick(now).unwrap();
        assert_eq!(write_2.path.file_name().unwrap(), "14-03-55_1.jpg");
    }

    #[test]
    fn test_commit_with_empty_buffer_still_writes_frame() {
        let target = mk_target();
        let mut machine = AnnotationMachine::new(Duration::from_secs(5));
        let now = Instant::now();

        mk_typing(&mut machine, &target);
        machine.handle_key(13, now);
        let write = machine.tick(now).unwrap();
        assert_eq!(write.text, "");
    }
}
