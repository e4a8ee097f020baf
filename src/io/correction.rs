//! Loader for externally supplied correction matrices.
//!
//! Calibration tooling hands over the depth-to-secondary-camera offset as a
//! text file of four comma-separated rows of four floats, row-major.

use std::path::Path;

use csv::ReaderBuilder;
use thiserror::Error;

use crate::geometry::RigidTransform;

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("correction file unreadable: {0}")]
    Read(#[from] csv::Error),
    #[error("correction file ends after {0} rows, expected 4")]
    MissingRow(usize),
    #[error("row {row} has {found} fields, expected 4")]
    FieldCount { row: usize, found: usize },
    #[error("row {row}, field {column} is not a number: {value:?}")]
    BadField {
        row: usize,
        column: usize,
        value: String,
    },
}

/// Read a 4x4 row-major matrix from `path`.
///
/// Exactly the first four rows and first four fields of each row are used;
/// anything beyond them is ignored. Fewer rows or fields, or a field that
/// does not parse as a float, is an error and leaves the caller's
/// correction state untouched.
pub fn load_correction_matrix(path: &Path) -> Result<RigidTransform, CorrectionError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut values = [0.0f32; 16];
    let mut rows = 0usize;

    for record in reader.records() {
        if rows == 4 {
            break;
        }
        let record = record?;
        if record.len() < 4 {
            return Err(CorrectionError::FieldCount {
                row: rows + 1,
                found: record.len(),
            });
        }
        for column in 0..4 {
            let raw = record[column].trim();
            values[rows * 4 + column] = raw.parse().map_err(|_| CorrectionError::BadField {
                row: rows + 1,
                column: column + 1,
                value: raw.to_string(),
            })?;
        }
        rows += 1;
    }

    if rows < 4 {
        return Err(CorrectionError::MissingRow(rows));
    }

    Ok(RigidTransform::from_row_major(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_loads_well_formed_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "correction.txt",
            "1,0,0,0.1\n0,1,0,0.2\n0,0,1,0.3\n0,0,0,1\n",
        );

        let matrix = load_correction_matrix(&path).unwrap();
        assert_eq!(matrix.translation(), Vector3::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_extra_rows_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "correction.txt",
            "1,0,0,0\n0,1,0,0\n0,0,1,0\n0,0,0,1\nthis,row,is,junk\n",
        );

        assert!(load_correction_matrix(&path).is_ok());
    }

    #[test]
    fn test_short_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "correction.txt", "1,0,0,0\n0,1,0\n0,0,1,0\n0,0,0,1\n");

        match load_correction_matrix(&path) {
            Err(CorrectionError::FieldCount { row: 2, found: 3 }) => {}
            other => panic!("expected field-count error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "correction.txt", "1,0,0,0\n0,1,0,0\n");

        match load_correction_matrix(&path) {
            Err(CorrectionError::MissingRow(2)) => {}
            other => panic!("expected missing-row error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_field_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "correction.txt",
            "1,0,0,0\n0,abc,0,0\n0,0,1,0\n0,0,0,1\n",
        );

        match load_correction_matrix(&path) {
            Err(CorrectionError::BadField { row: 2, column: 2, .. }) => {}
            other => panic!("expected bad-field error, got {other:?}"),
        }
    }
}
