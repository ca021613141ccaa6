// src/export.rs
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use csv::Writer;
use tracing::info;

use crate::error::{MirrorError, Result};
use crate::geometry::MirrorPoint;
use crate::pose::{Joint, Skeleton};

/// Column names: `frame`, `timestamp_ms`, then `<joint>_x/_y/_z` for every joint.
pub fn header() -> Vec<String> {
    let mut columns = vec!["frame".to_string(), "timestamp_ms".to_string()];
    for joint in Joint::ALL {
        for axis in ["x", "y", "z"] {
            columns.push(format!("{}_{axis}", joint.name()));
        }
    }
    columns
}

/// Streams mirror-space joint positions to CSV, one row per frame.
pub struct TrackExporter {
    path: PathBuf,
    writer: Writer<File>,
    rows: u64,
}

impl TrackExporter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| MirrorError::io(&path, e))?;
        let mut writer = Writer::from_writer(file);
        writer
            .write_record(header())
            .map_err(|e| MirrorError::io(&path, e.into()))?;
        info!(path = %path.display(), "exporting joint tracks");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Creates `tracks_YYYYmmdd_HHMMSS.csv` inside `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self> {
        let name = format!("tracks_{}.csv", Local::now().format("%Y%m%d_%H%M%S"));
        Self::create(dir.as_ref().join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Invalid joints, and every joint of an empty skeleton, get empty cells.
    pub fn write_frame(
        &mut self,
        sequence_index: u64,
        timestamp: Duration,
        skeleton: &Skeleton<MirrorPoint>,
    ) -> Result<()> {
        let mut record = Vec::with_capacity(2 + Joint::COUNT * 3);
        record.push(sequence_index.to_string());
        record.push(format!("{:.3}", timestamp.as_secs_f64() * 1000.0));
        for joint in Joint::ALL {
            match skeleton.get(joint).filter(|p| p.valid) {
                Some(p) => {
                    record.push(p.point.x.to_string());
                    record.push(p.point.y.to_string());
                    record.push(p.point.z.to_string());
                }
                None => record.extend(std::iter::repeat(String::new()).take(3)),
            }
        }
        self.writer
            .write_record(&record)
            .map_err(|e| MirrorError::io(&self.path, e.into()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| MirrorError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn read(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn header_covers_every_joint() {
        let columns = header();
        assert_eq!(columns.len(), 2 + Joint::COUNT * 3);
        assert_eq!(columns[2], "nose_x");
        assert_eq!(columns.last().unwrap(), "right_ankle_z");
    }

    #[test]
    fn writes_values_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tracks.csv");
        let mut exporter = TrackExporter::create(&path).unwrap();

        let skeleton = Skeleton::from_fn(|joint| MirrorPoint {
            joint,
            point: Point3::new(0.5, -0.25, 2.0),
            valid: joint != Joint::Nose,
        });
        exporter
            .write_frame(4, Duration::from_millis(133), &skeleton)
            .unwrap();
        exporter
            .write_frame(5, Duration::from_millis(166), &Skeleton::empty())
            .unwrap();
        exporter.flush().unwrap();
        assert_eq!(exporter.rows(), 2);

        let rows = read(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "4");
        assert_eq!(rows[1][1], "133.000");
        assert_eq!(&rows[1][2..5], &["", "", ""]);
        assert_eq!(&rows[1][5..8], &["0.5", "-0.25", "2"]);
        assert!(rows[2][2..].iter().all(String::is_empty));
    }

    #[test]
    fn create_in_uses_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = TrackExporter::create_in(dir.path()).unwrap();
        let name = exporter.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("tracks_") && name.ends_with(".csv"));
    }
}
