//! Multi-scan SPEC text files.
//!
//! A `#L` line names the columns of the rows that follow it and starts a new
//! scan. Other `#` lines are comments. Numeric rows seen before any `#L`
//! line form an unnamed scan whose columns are `dataset_0`, `dataset_1`, ...
//! SRS files (first line starting with `&`) are not SPEC files.

use crate::{Error, Result};
use nxstack_core::Dataset;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One scan: a name and one float32 column per label.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecScan {
    name: Option<String>,
    labels: Vec<String>,
    rows: Vec<Vec<f32>>,
}

impl SpecScan {
    /// `Scan N` for scans opened by a `#L` line, `None` for headerless data.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The column `label` as a 1-D dataset.
    #[must_use]
    pub fn column(&self, label: &str) -> Option<Dataset> {
        let index = self.labels.iter().position(|l| l == label)?;
        let values = self.rows.iter().map(|row| row[index]).collect::<Vec<f32>>();
        Some(Dataset::from_vec(label, values))
    }

    /// Every column as a 1-D dataset, in label order.
    #[must_use]
    pub fn columns(&self) -> Vec<Dataset> {
        self.labels
            .iter()
            .filter_map(|label| self.column(label))
            .collect()
    }
}

/// Parsed SPEC file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecFile {
    scans: Vec<SpecScan>,
}

impl SpecFile {
    /// Reads and parses a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a SPEC file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(BufReader::new(File::open(path)?))
    }

    /// Parses SPEC text.
    ///
    /// # Errors
    /// Returns `InvalidFormat` for SRS input or for rows whose column count
    /// differs from their scan's labels.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut parser = Parser::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if index == 0 && line.trim_start().starts_with('&') {
                return Err(Error::InvalidFormat(
                    "SRS files are not SPEC files".to_string(),
                ));
            }
            parser.line(index + 1, line.trim())?;
        }
        Ok(parser.finish())
    }

    #[must_use]
    pub fn scans(&self) -> &[SpecScan] {
        &self.scans
    }

    #[must_use]
    pub fn scan(&self, name: &str) -> Option<&SpecScan> {
        self.scans.iter().find(|s| s.name() == Some(name))
    }

    /// The unnamed scan of headerless data, if any.
    #[must_use]
    pub fn unnamed_scan(&self) -> Option<&SpecScan> {
        self.scans.iter().find(|s| s.name.is_none())
    }
}

#[derive(Default)]
struct Parser {
    scans: Vec<SpecScan>,
    current: Option<SpecScan>,
    header: Option<String>,
    named: usize,
}

impl Parser {
    fn line(&mut self, number: usize, line: &str) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        if line.starts_with('#') {
            self.header = Some(line.to_string());
            return Ok(());
        }
        let Some(values) = parse_row(line) else {
            return Ok(());
        };

        if let Some(labels) = self.header.take().as_deref().and_then(label_line) {
            self.named += 1;
            self.start(Some(format!("Scan {}", self.named)), split_labels(labels, values.len()));
        } else if self.current.is_none() {
            let labels = (0..values.len()).map(|i| format!("dataset_{i}")).collect();
            self.start(None, labels);
        }

        let Some(scan) = self.current.as_mut() else {
            return Ok(());
        };
        if values.len() != scan.labels.len() {
            return Err(Error::InvalidFormat(format!(
                "line {number}: {} values for {} columns",
                values.len(),
                scan.labels.len()
            )));
        }
        scan.rows.push(values);
        Ok(())
    }

    fn start(&mut self, name: Option<String>, labels: Vec<String>) {
        if let Some(done) = self.current.take() {
            self.scans.push(done);
        }
        self.current = Some(SpecScan {
            name,
            labels,
            rows: Vec::new(),
        });
    }

    fn finish(mut self) -> SpecFile {
        if let Some(done) = self.current.take() {
            self.scans.push(done);
        }
        SpecFile { scans: self.scans }
    }
}

fn label_line(line: &str) -> Option<&str> {
    line.strip_prefix("#L").map(str::trim)
}

// Labels may contain single spaces, so they are separated by two or more.
fn split_labels(labels: &str, expected: usize) -> Vec<String> {
    let wide: Vec<String> = labels
        .split(['\t', '\n'])
        .flat_map(|part| part.split("  "))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if wide.len() == expected {
        return wide;
    }
    labels.split_whitespace().map(str::to_string).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn parse_row(line: &str) -> Option<Vec<f32>> {
    line.split_whitespace()
        .map(|token| token.parse::<f64>().ok().map(|v| v as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TWO_SCANS: &str = "\
#F example.spec
#S 1 ascan energy 7.0 7.1 2
#L Energy  I0  Photon Counts
7.0 100 12
7.05 101 13
7.1 102 14

#S 2 ascan energy 7.0 7.1 1
#C a comment
#L Energy  I0  Photon Counts
7.0 90 10
7.1 91 11
";

    #[test]
    fn test_two_scans() {
        let file = SpecFile::parse(TWO_SCANS.as_bytes()).unwrap();
        assert_eq!(file.scans().len(), 2);

        let first = file.scan("Scan 1").unwrap();
        assert_eq!(first.labels(), ["Energy", "I0", "Photon Counts"]);
        assert_eq!(first.row_count(), 3);
        let energy = first.column("Energy").unwrap();
        assert_eq!(energy.shape(), &[3]);
        assert_relative_eq!(energy.to_f64_vec().unwrap()[1], 7.05, epsilon = 1e-6);

        let second = file.scan("Scan 2").unwrap();
        assert_eq!(second.row_count(), 2);
        assert_eq!(
            second.column("Photon Counts").unwrap().to_f64_vec().unwrap(),
            vec![10.0, 11.0]
        );
        assert!(file.unnamed_scan().is_none());
    }

    #[test]
    fn test_headerless_columns() {
        let file = SpecFile::parse("1 2\n3 4\n5 6\n".as_bytes()).unwrap();
        let scan = file.unnamed_scan().unwrap();
        assert_eq!(scan.labels(), ["dataset_0", "dataset_1"]);
        let columns = scan.columns();
        assert_eq!(columns[1].to_f64_vec().unwrap(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_single_spaced_labels() {
        let file = SpecFile::parse("#L x y\n1 2\n".as_bytes()).unwrap();
        assert_eq!(file.scans()[0].labels(), ["x", "y"]);
    }

    #[test]
    fn test_rejects_srs_and_ragged_rows() {
        let err = SpecFile::parse("&SRS\n 1 2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
        let err = SpecFile::parse("#L a  b\n1 2\n3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
