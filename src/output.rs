// src/output.rs
//
// Output targets and the persisted observation log. Targets are composed by
// value wherever files are produced; nothing inherits a path base class.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::types::{PhysicalPoint, PixelPoint};

/// A directory that receives output files, with collision-free naming.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    dir: PathBuf,
}

impl OutputTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name` if unused, otherwise `stem_1.ext`, `stem_2.ext`, ... until a
    /// path that will not overwrite an existing file.
    pub fn next_available(&self, name: &str) -> PathBuf {
        let candidate = self.dir.join(name);
        if !candidate.exists() {
            return candidate;
        }

        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let ext = Path::new(name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut num = 0;
        loop {
            num += 1;
            let candidate = self.dir.join(format!("{stem}_{num}{ext}"));
            if !candidate.exists() {
                return candidate;
            }
        }
    }
}

/// One recorded observation, as it appears in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateRow {
    pub date: String,
    pub time: String,
    pub pixel: PixelPoint,
    /// Present only when 3D mapping is enabled for the session.
    pub physical: Option<PhysicalPoint>,
}

/// The persisted coordinate history. Append-only except for the explicit
/// retraction of the most recent row.
pub trait ObservationSink {
    fn append(&mut self, row: &CoordinateRow) -> Result<()>;
    fn delete_last(&mut self) -> Result<()>;
}

/// CSV-backed observation log: one header row, one row per recorded
/// coordinate, flushed after every mutation so a crash loses at most the
/// row being written.
pub struct ObservationLog {
    path: PathBuf,
}

impl ObservationLog {
    pub fn create(target: &OutputTarget, stem: &str, three_d: bool) -> Result<Self> {
        let path = target.dir().join(format!("{stem}.csv"));
        let header = if three_d {
            "Date,Time,Coordinates,3D Coordinates"
        } else {
            "Date,Time,Coordinates"
        };
        let mut file = fs::File::create(&path)
            .with_context(|| format!("failed to create observation log {}", path.display()))?;
        writeln!(file, "{header}")?;
        file.flush()?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(row: &CoordinateRow) -> String {
        let mut fields = vec![
            csv_field(&row.date),
            csv_field(&row.time),
            csv_field(&row.pixel.to_string()),
        ];
        if let Some(physical) = &row.physical {
            fields.push(csv_field(&physical.to_string()));
        }
        fields.join(",")
    }
}

impl ObservationSink for ObservationLog {
    fn append(&mut self, row: &CoordinateRow) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open observation log {}", self.path.display()))?;
        writeln!(file, "{}", Self::render(row))?;
        file.flush()?;
        Ok(())
    }

    fn delete_last(&mut self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read observation log {}", self.path.display()))?;
        let mut lines: Vec<&str> = contents.lines().collect();

        // The header row is not data and must survive every retraction.
        if lines.len() <= 1 {
            warn!("delete-last requested on an empty observation log; nothing to remove");
            return Ok(());
        }
        lines.pop();

        // Rewrite through a sibling temp file so an I/O failure cannot
        // truncate rows that were already safely on disk.
        let tmp = self.path.with_extension("csv.tmp");
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to stage log rewrite {}", tmp.display()))?;
        for line in &lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        drop(file);
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace observation log {}", self.path.display()))?;
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
