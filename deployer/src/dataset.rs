use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dataset '{path}' does not exist")]
    NotFound { path: String },

    #[error("Failed to read dataset '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Column '{column}' not found in dataset '{path}'")]
    MissingColumn { column: String, path: String },
}

pub fn ensure_exists(path: &Path) -> Result<(), DatasetError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DatasetError::NotFound {
            path: path.display().to_string(),
        })
    }
}

/// The first `rows` records of a headed CSV file with `drop_column` removed.
///
/// Field text is kept verbatim.
pub fn sample_rows(
    path: &Path,
    rows: usize,
    drop_column: &str,
) -> Result<Vec<Vec<String>>, DatasetError> {
    let csv_error = |source| DatasetError::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error)?;

    let headers = reader.headers().map_err(csv_error)?.clone();
    let target = headers
        .iter()
        .position(|header| header.trim() == drop_column)
        .ok_or_else(|| DatasetError::MissingColumn {
            column: drop_column.to_string(),
            path: path.display().to_string(),
        })?;

    let mut sample = Vec::with_capacity(rows);
    for record in reader.records().take(rows) {
        let record = record.map_err(csv_error)?;
        sample.push(
            record
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != target)
                .map(|(_, field)| field.to_string())
                .collect(),
        );
    }

    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_sample_drops_target_column() {
        let file = fixture("a,target,b\n1,10,2\n3,30,4\n5,50,6\n");
        let rows = sample_rows(file.path(), 2, "target").unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["1".to_string(), "2".to_string()],
                vec!["3".to_string(), "4".to_string()],
            ]
        );
    }

    #[test]
    fn test_sample_short_dataset() {
        let file = fixture("a,y\n1,2\n");
        let rows = sample_rows(file.path(), 5, "y").unwrap();
        assert_eq!(rows, vec![vec!["1".to_string()]]);
    }

    #[test]
    fn test_missing_column() {
        let file = fixture("a,b\n1,2\n");
        let result = sample_rows(file.path(), 5, "medv");
        assert!(matches!(result, Err(DatasetError::MissingColumn { .. })));
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/nonexistent/housing.csv");
        assert!(matches!(
            ensure_exists(path),
            Err(DatasetError::NotFound { .. })
        ));
        assert!(matches!(
            sample_rows(path, 5, "medv"),
            Err(DatasetError::Csv { .. })
        ));
    }

    #[test]
    fn test_ragged_row_is_an_error() {
        let file = fixture("a,b\n1,2\n3\n");
        assert!(matches!(
            sample_rows(file.path(), 5, "b"),
            Err(DatasetError::Csv { .. })
        ));
    }
}
