use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::COLUMNS;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    pub age: f64,
    pub workclass: String,
    pub education: String,
    pub race: String,
    pub sex: String,
    pub maritalstatus: String,
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("{path}: header is missing column `{column}`")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("{path}: malformed record at line {line}: {source}")]
    Malformed {
        path: PathBuf,
        line: u64,
        source: csv::Error,
    },
    #[error("{path}: age `{value}` at line {line} is not a finite number")]
    InvalidAge { path: PathBuf, line: u64, value: f64 },
    #[error("{path}: file contains no records")]
    Empty { path: PathBuf },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },
}

pub fn read_data(path: &Path) -> Result<Vec<Record>, DataError> {
    let file = File::open(path).map_err(|source| DataError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_records(file, path)
}

/// Reads census records from any reader; `path` is only used in error messages.
pub fn read_records<R: io::Read>(reader: R, path: &Path) -> Result<Vec<Record>, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().map_err(|source| DataError::Malformed {
        path: path.to_path_buf(),
        line: 1,
        source,
    })?;
    for &column in COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(DataError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }

    let mut records = Vec::<Record>::new();
    for (index, result) in rdr.deserialize().enumerate() {
        // header occupies line 1
        let line = index as u64 + 2;
        let record: Record = result.map_err(|source| DataError::Malformed {
            path: path.to_path_buf(),
            line,
            source,
        })?;
        if !record.age.is_finite() {
            return Err(DataError::InvalidAge {
                path: path.to_path_buf(),
                line,
                value: record.age,
            });
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }
    tracing::info!(rows = records.len(), path = %path.display(), "loaded census records");
    Ok(records)
}

pub fn write_data(path: &Path, records: &[Record]) -> Result<(), DataError> {
    let to_error = |source| DataError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut wtr = csv::Writer::from_path(path).map_err(to_error)?;
    for record in records {
        wtr.serialize(record).map_err(to_error)?;
    }
    wtr.flush().map_err(|err| to_error(err.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "age,workclass,education,race,sex,maritalstatus";

    #[test]
    fn reads_well_formed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "39,State-gov,Bachelors,White,Male,Never-married").unwrap();
        writeln!(file, "50, Self-emp ,Bachelors,White,Male,Married").unwrap();

        let records = read_data(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].workclass, "Self-emp");
        assert_eq!(records[0].age, 39.0);
    }

    #[test]
    fn non_numeric_age_reports_line() {
        let data = format!("{HEADER}\n39,Private,HS-grad,White,Male,Married\nold,Private,HS-grad,White,Male,Married\n");
        let err = read_records(data.as_bytes(), Path::new("bad.csv")).unwrap_err();
        match err {
            DataError::Malformed { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_column_is_rejected() {
        let data = "age,workclass,education,race,sex\n39,Private,HS-grad,White,Male\n";
        let err = read_records(data.as_bytes(), Path::new("short.csv")).unwrap_err();
        assert!(matches!(
            err,
            DataError::MissingColumn {
                column: "maritalstatus",
                ..
            }
        ));
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let data = format!("{HEADER}\n39,Private,HS-grad,White,Male\n");
        let err = read_records(data.as_bytes(), Path::new("ragged.csv")).unwrap_err();
        assert!(matches!(err, DataError::Malformed { line: 2, .. }));
    }

    #[test]
    fn empty_file_is_rejected() {
        let data = format!("{HEADER}\n");
        let err = read_records(data.as_bytes(), Path::new("empty.csv")).unwrap_err();
        assert!(matches!(err, DataError::Empty { .. }));
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let records = vec![Record {
            age: 30.0,
            workclass: "Private".into(),
            education: "Bachelors".into(),
            race: "White".into(),
            sex: "Female".into(),
            maritalstatus: "Never-married".into(),
        }];
        write_data(&path, &records).unwrap();
        assert_eq!(read_data(&path).unwrap(), records);
    }
}
