// src/calibration.rs - camera intrinsics and the camera-to-mirror transform
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MirrorError, Result};

const CALIBRATION_FILE_VERSION: u32 = 1;
const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

/// Pinhole intrinsics of the color camera the depth stream is aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Metres per raw depth unit.
    pub depth_scale: f64,
}

impl CameraIntrinsics {
    pub fn validate(&self) -> Result<()> {
        let values = [self.fx, self.fy, self.cx, self.cy, self.depth_scale];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MirrorError::config("intrinsics contain non-finite values"));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(MirrorError::config(format!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx, self.fy
            )));
        }
        if self.depth_scale <= 0.0 {
            return Err(MirrorError::config(format!(
                "depth_scale must be positive, got {}",
                self.depth_scale
            )));
        }
        Ok(())
    }
}

/// Rigid camera-space to mirror-space transform.
///
/// `valid == false` means no calibration has been performed; the rotation
/// and translation are identity in that case and must not be used for
/// overlay placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub valid: bool,
}

impl CalibrationTransform {
    /// Builds a valid transform, rejecting rotations that are not proper
    /// orthonormal matrices.
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Result<Self> {
        if rotation.iter().chain(translation.iter()).any(|v| !v.is_finite()) {
            return Err(MirrorError::geometry("transform contains non-finite values"));
        }
        let gram_error = (rotation.transpose() * rotation - Matrix3::identity()).norm();
        if gram_error > ORTHONORMAL_TOLERANCE {
            return Err(MirrorError::geometry(format!(
                "rotation is not orthonormal (|R^T R - I| = {gram_error:.3e})"
            )));
        }
        let det = rotation.determinant();
        if (det - 1.0).abs() > ORTHONORMAL_TOLERANCE {
            return Err(MirrorError::geometry(format!(
                "rotation determinant is {det:.6}, expected +1"
            )));
        }
        Ok(Self {
            rotation,
            translation,
            valid: true,
        })
    }

    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            valid: true,
        }
    }

    /// Identity placeholder used when no calibration exists yet.
    pub fn uncalibrated() -> Self {
        Self {
            valid: false,
            ..Self::identity()
        }
    }

    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords + self.translation)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    #[serde(default = "default_version")]
    version: u32,
    intrinsics: Option<CameraIntrinsics>,
    #[serde(default)]
    transform: Option<TransformRecord>,
}

fn default_version() -> u32 {
    CALIBRATION_FILE_VERSION
}

/// Row-major persisted form of a transform.
#[derive(Debug, Serialize, Deserialize)]
struct TransformRecord {
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

impl From<&CalibrationTransform> for TransformRecord {
    fn from(t: &CalibrationTransform) -> Self {
        let r = &t.rotation;
        Self {
            rotation: [
                [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
            ],
            translation: [t.translation.x, t.translation.y, t.translation.z],
        }
    }
}

impl TransformRecord {
    fn into_transform(self) -> Result<CalibrationTransform> {
        let r = self.rotation;
        let rotation = Matrix3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        );
        let translation = Vector3::from(self.translation);
        CalibrationTransform::new(rotation, translation)
            .map_err(|e| MirrorError::config(format!("persisted transform rejected: {e}")))
    }
}

/// Reads a calibration file, returning intrinsics and the (possibly
/// uncalibrated) transform.
///
/// Lens distortion is not modelled; a `distortion_coeffs` entry written by
/// other calibration tools is ignored and not written back by [`save`].
pub fn load(path: impl AsRef<Path>) -> Result<(CameraIntrinsics, CalibrationTransform)> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        MirrorError::config(format!("cannot read calibration {}: {e}", path.display()))
    })?;
    let file: CalibrationFile = serde_json::from_str(&content).map_err(|e| {
        MirrorError::config(format!("malformed calibration {}: {e}", path.display()))
    })?;

    if file.version != CALIBRATION_FILE_VERSION {
        return Err(MirrorError::config(format!(
            "unsupported calibration version {} (expected {})",
            file.version, CALIBRATION_FILE_VERSION
        )));
    }

    let intrinsics = file.intrinsics.ok_or_else(|| {
        MirrorError::config(format!("{} has no intrinsics", path.display()))
    })?;
    intrinsics.validate()?;

    let transform = match file.transform {
        Some(record) => record.into_transform()?,
        None => {
            warn!(
                path = %path.display(),
                "no camera-to-mirror transform stored; overlay disabled until calibrated"
            );
            CalibrationTransform::uncalibrated()
        }
    };

    Ok((intrinsics, transform))
}

/// Writes intrinsics and transform.
///
/// Any transform with `valid == false` is stored as absent, whatever its
/// rotation and translation hold, and loads back as
/// [`CalibrationTransform::uncalibrated`].
pub fn save(
    path: impl AsRef<Path>,
    intrinsics: &CameraIntrinsics,
    transform: &CalibrationTransform,
) -> Result<()> {
    let path = path.as_ref();
    let file = CalibrationFile {
        version: CALIBRATION_FILE_VERSION,
        intrinsics: Some(*intrinsics),
        transform: transform.valid.then(|| TransformRecord::from(transform)),
    };
    let json = serde_json::to_string_pretty(&file)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
    }
    fs::write(path, json).map_err(|e| MirrorError::io(path, e))?;
    Ok(())
}

/// Sole owner of the session's intrinsics and transform.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
    intrinsics: CameraIntrinsics,
    transform: CalibrationTransform,
}

impl CalibrationStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (intrinsics, transform) = load(&path)?;
        info!(
            path = %path.display(),
            fx = intrinsics.fx,
            fy = intrinsics.fy,
            calibrated = transform.valid,
            "calibration loaded"
        );
        Ok(Self {
            path,
            intrinsics,
            transform,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn transform(&self) -> &CalibrationTransform {
        &self.transform
    }

    /// Persists `transform` alongside the stored intrinsics.
    pub fn save(&self, path: impl AsRef<Path>, transform: &CalibrationTransform) -> Result<()> {
        save(path, &self.intrinsics, transform)
    }

    /// Swaps in a new transform. Callers must hold the pipeline paused.
    pub(crate) fn replace_transform(&mut self, transform: CalibrationTransform) {
        self.transform = transform;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;
    use std::f64::consts::FRAC_PI_3;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
            depth_scale: 0.001,
        }
    }

    #[test]
    fn round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let rotation = Rotation3::from_euler_angles(0.1, -0.7, FRAC_PI_3).into_inner();
        let transform =
            CalibrationTransform::new(rotation, Vector3::new(0.123456789, -1.5, 2.000000001))
                .unwrap();

        save(&path, &intrinsics(), &transform).unwrap();
        let (loaded_intrinsics, loaded_transform) = load(&path).unwrap();

        assert_eq!(loaded_intrinsics, intrinsics());
        assert_eq!(loaded_transform, transform);
    }

    #[test]
    fn missing_transform_is_uncalibrated_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        save(&path, &intrinsics(), &CalibrationTransform::uncalibrated()).unwrap();

        let (_, transform) = load(&path).unwrap();
        assert!(!transform.valid);
        assert_eq!(transform.rotation, Matrix3::identity());
        assert_eq!(transform.translation, Vector3::zeros());
    }

    #[test]
    fn invalid_transform_saves_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let rotation = Rotation3::from_euler_angles(0.0, 0.0, FRAC_PI_3).into_inner();
        let stale = CalibrationTransform {
            rotation,
            translation: Vector3::new(1.0, 2.0, 3.0),
            valid: false,
        };
        save(&path, &intrinsics(), &stale).unwrap();

        let (_, transform) = load(&path).unwrap();
        assert_eq!(transform, CalibrationTransform::uncalibrated());
    }

    #[test]
    fn distortion_coefficients_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "intrinsics": { "fx": 600.0, "fy": 600.0, "cx": 320.0, "cy": 240.0, "depth_scale": 0.001 },
                "distortion_coeffs": [0.1, -0.05, 0.0, 0.0, 0.0]
            }"#,
        )
        .unwrap();

        let (loaded, _) = load(&path).unwrap();
        assert_eq!(loaded, intrinsics());

        save(&path, &loaded, &CalibrationTransform::identity()).unwrap();
        assert!(!fs::read_to_string(&path).unwrap().contains("distortion_coeffs"));
    }

    #[test]
    fn missing_intrinsics_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, r#"{ "version": 1 }"#).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, MirrorError::ConfigurationError(_)));
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            MirrorError::ConfigurationError(_)
        ));
        assert!(matches!(
            load(dir.path().join("absent.json")).unwrap_err(),
            MirrorError::ConfigurationError(_)
        ));
    }

    #[test]
    fn non_orthonormal_persisted_rotation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "intrinsics": { "fx": 600.0, "fy": 600.0, "cx": 320.0, "cy": 240.0, "depth_scale": 0.001 },
                "transform": { "rotation": [[2,0,0],[0,1,0],[0,0,1]], "translation": [0,0,0] }
            }"#,
        )
        .unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            MirrorError::ConfigurationError(_)
        ));
    }

    #[test]
    fn reflection_is_not_a_rotation() {
        let reflection = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let err = CalibrationTransform::new(reflection, Vector3::zeros()).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidGeometry(_)));
    }

    #[test]
    fn rejects_non_positive_focal_length() {
        let bad = CameraIntrinsics {
            fx: 0.0,
            ..intrinsics()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn store_saves_with_its_intrinsics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        save(&path, &intrinsics(), &CalibrationTransform::uncalibrated()).unwrap();

        let store = CalibrationStore::load(&path).unwrap();
        let calibrated =
            CalibrationTransform::new(Matrix3::identity(), Vector3::new(0.0, 0.0, -1.0)).unwrap();
        let out = dir.path().join("nested").join("recalibrated.json");
        store.save(&out, &calibrated).unwrap();

        let (loaded_intrinsics, loaded_transform) = load(&out).unwrap();
        assert_eq!(loaded_intrinsics, *store.intrinsics());
        assert!(loaded_transform.valid);
        assert_eq!(loaded_transform.translation.z, -1.0);
    }
}
