//! Loading persisted camera calibration documents.
//!
//! Each camera has one document holding its intrinsic matrix under the
//! `cameraMatrix` key. Documents written by OpenCV's `FileStorage` are accepted
//! as is (YAML with the `%YAML:1.0` header and `!!opencv-matrix` nodes, or
//! JSON), as are hand-written files using a flat or nested list.
//!
//! ```yaml
//! %YAML:1.0
//! ---
//! cameraMatrix: !!opencv-matrix
//!    rows: 3
//!    cols: 3
//!    dt: d
//!    data: [ 540., 0., 320., 0., 540., 240., 0., 0., 1. ]
//! distCoeffs: !!opencv-matrix
//!    rows: 5
//!    cols: 1
//!    dt: d
//!    data: [ -0.1, 0.01, 0., 0., 0. ]
//! ```

use std::fs;
use std::path::Path;

use log::debug;
use nalgebra::Matrix3;
use serde_json::Value;
use yaml_rust::{Yaml, YamlLoader};

use crate::camera::Intrinsics;
use crate::error::ConfigError;

const CAMERA_MATRIX_KEY: &str = "cameraMatrix";
const DISTORTION_KEY: &str = "distCoeffs";

/// Contents of one calibration document.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFile {
    pub camera_matrix: Matrix3<f64>,
    pub intrinsics: Intrinsics,
    /// Distortion coefficients, kept for reporting; the tracker never applies them.
    pub distortion: Vec<f64>,
}

/// Reads a camera's intrinsic matrix from a calibration document.
///
/// # Errors
///
/// * [`ConfigError::Io`] if the file is missing or unreadable.
/// * [`ConfigError::Parse`] if the document is not valid YAML/JSON.
/// * [`ConfigError::MissingField`] if there is no `cameraMatrix`.
/// * [`ConfigError::InvalidMatrix`] / [`ConfigError::InvalidIntrinsics`] for
///   malformed or physically invalid matrices.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Intrinsics, ConfigError> {
    Ok(CalibrationFile::load(path)?.intrinsics)
}

impl CalibrationFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("couldn't open {display}: {e}")))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let document = match extension.as_deref() {
            Some("yaml") | Some("yml") => parse_yaml(&contents, &display)?,
            Some("json") => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                message: e.to_string(),
            })?,
            other => {
                return Err(ConfigError::UnsupportedFormat(format!(
                    "{display} (extension {other:?})"
                )))
            }
        };

        let calibration = Self::from_document(&document, &display)?;
        debug!(
            "Loaded intrinsics from {}: fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
            display,
            calibration.intrinsics.fx,
            calibration.intrinsics.fy,
            calibration.intrinsics.cx,
            calibration.intrinsics.cy
        );
        Ok(calibration)
    }

    fn from_document(document: &Value, path: &str) -> Result<Self, ConfigError> {
        let node = document
            .get(CAMERA_MATRIX_KEY)
            .filter(|v| !v.is_null())
            .ok_or_else(|| ConfigError::MissingField {
                path: path.to_string(),
                field: CAMERA_MATRIX_KEY.to_string(),
            })?;

        let (rows, cols, data) = matrix_entries(node)?;
        if rows != 3 || cols != 3 {
            return Err(ConfigError::InvalidMatrix(format!(
                "{CAMERA_MATRIX_KEY} must be 3x3, got {rows}x{cols}"
            )));
        }
        let camera_matrix = Matrix3::from_row_slice(&data);
        let intrinsics = Intrinsics::from_matrix(&camera_matrix)?;

        let distortion = match document.get(DISTORTION_KEY).filter(|v| !v.is_null()) {
            Some(node) => matrix_entries(node)?.2,
            None => Vec::new(),
        };

        Ok(CalibrationFile {
            camera_matrix,
            intrinsics,
            distortion,
        })
    }
}

/// Parses YAML, tolerating OpenCV's non-standard `%YAML:1.0` directive.
fn parse_yaml(contents: &str, path: &str) -> Result<Value, ConfigError> {
    let cleaned: String = contents
        .lines()
        .filter(|line| !line.trim_start().starts_with("%YAML"))
        .collect::<Vec<_>>()
        .join("\n");
    let docs = YamlLoader::load_from_str(&cleaned).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let doc = docs.into_iter().next().ok_or_else(|| ConfigError::Parse {
        path: path.to_string(),
        message: "empty document".to_string(),
    })?;
    Ok(yaml_to_json(&doc))
}

fn yaml_to_json(yaml: &Yaml) -> Value {
    match yaml {
        Yaml::Real(_) => yaml.as_f64().map(Value::from).unwrap_or(Value::Null),
        Yaml::Integer(i) => Value::from(*i),
        Yaml::String(s) => Value::from(s.as_str()),
        Yaml::Boolean(b) => Value::from(*b),
        Yaml::Array(items) => Value::Array(items.iter().map(yaml_to_json).collect()),
        Yaml::Hash(map) => Value::Object(
            map.iter()
                .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), yaml_to_json(v))))
                .collect(),
        ),
        Yaml::Alias(_) | Yaml::Null | Yaml::BadValue => Value::Null,
    }
}

/// Extracts `(rows, cols, row-major data)` from any supported matrix encoding.
fn matrix_entries(node: &Value) -> Result<(usize, usize, Vec<f64>), ConfigError> {
    match node {
        Value::Object(map) => {
            let dim = |key: &str| {
                let value = map.get(key).and_then(Value::as_u64).ok_or_else(|| {
                    ConfigError::InvalidMatrix(format!("matrix node missing '{key}'"))
                })?;
                usize::try_from(value).map_err(|_| {
                    ConfigError::InvalidMatrix(format!("'{key}' is out of range: {value}"))
                })
            };
            let rows = dim("rows")?;
            let cols = dim("cols")?;
            let entries = rows.checked_mul(cols).ok_or_else(|| {
                ConfigError::InvalidMatrix(format!("{rows}x{cols} matrix is too large"))
            })?;
            let data = map
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| ConfigError::InvalidMatrix("matrix node missing 'data'".into()))?;
            let data = numbers(data)?;
            if data.len() != entries {
                return Err(ConfigError::InvalidMatrix(format!(
                    "{rows}x{cols} matrix has {} entries",
                    data.len()
                )));
            }
            Ok((rows, cols, data))
        }
        Value::Array(items) if items.iter().all(Value::is_array) => {
            let rows = items.len();
            let mut data = Vec::with_capacity(rows * 3);
            let mut cols = None;
            for row in items.iter().filter_map(Value::as_array) {
                let row = numbers(row)?;
                if *cols.get_or_insert(row.len()) != row.len() {
                    return Err(ConfigError::InvalidMatrix("ragged nested matrix".into()));
                }
                data.extend(row);
            }
            Ok((rows, cols.unwrap_or(0), data))
        }
        Value::Array(items) => {
            let data = numbers(items)?;
            // A flat list of nine entries is read as a row-major 3x3 matrix.
            match data.len() {
                9 => Ok((3, 3, data)),
                n => Ok((n, 1, data)),
            }
        }
        other => Err(ConfigError::InvalidMatrix(format!(
            "unsupported matrix encoding: {other}"
        ))),
    }
}

fn numbers(values: &[Value]) -> Result<Vec<f64>, ConfigError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| ConfigError::InvalidMatrix(format!("not a number: {v}")))
        })
        .collect()
}
