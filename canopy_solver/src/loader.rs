// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Loading point matrices from files.

use std::fs;
use std::path::{Path, PathBuf};

use canopy_index::PointSet;

use crate::error::{Result, SolverError};

/// Something that turns a file into a point set.
pub trait MatrixLoader {
    /// Read every point in `path`.
    fn load(&self, path: &Path) -> Result<PointSet>;
}

/// Delimited text, one point per line.
///
/// Blank lines and lines starting with `#` are skipped. Every remaining
/// line must have the same number of numeric fields.
#[derive(Clone, Debug)]
pub struct CsvLoader {
    delimiter: char,
    has_header: bool,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: false,
        }
    }
}

impl CsvLoader {
    /// Comma separated, no header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another field delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Skip the first non-comment line.
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Parse already-read text; `path` is only used in errors.
    pub fn parse(&self, path: &Path, text: &str) -> Result<PointSet> {
        let fail = |line: usize, reason: String| SolverError::Load {
            path: PathBuf::from(path),
            line,
            reason,
        };
        let mut dim = None;
        let mut data = Vec::new();
        let mut header_pending = self.has_header;
        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if header_pending {
                header_pending = false;
                continue;
            }
            let before = data.len();
            for field in line.split(self.delimiter) {
                let field = field.trim();
                let value: f64 = field
                    .parse()
                    .map_err(|_| fail(n + 1, format!("{field:?} is not a number")))?;
                data.push(value);
            }
            let width = data.len() - before;
            match dim {
                None => dim = Some(width),
                Some(d) if d != width => {
                    return Err(fail(n + 1, format!("{width} fields, expected {d}")));
                }
                Some(_) => {}
            }
        }
        let Some(dim) = dim else {
            return Err(canopy_index::Error::EmptyDataset.into());
        };
        Ok(PointSet::from_columns(dim, data)?)
    }
}

impl MatrixLoader for CsvLoader {
    fn load(&self, path: &Path) -> Result<PointSet> {
        let text = fs::read_to_string(path)?;
        let points = self.parse(path, &text)?;
        tracing::info!(
            path = %path.display(),
            points = points.len(),
            dim = points.dim(),
            "matrix loaded"
        );
        Ok(points)
    }
}
