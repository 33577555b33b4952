//! Request and response encodings for endpoint invocation.

use crate::provider::PlatformResult;
use crate::types::CSV_CONTENT_TYPE;

pub trait Serializer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn serialize(&self, rows: &[Vec<String>]) -> PlatformResult<String>;
}

pub trait Deserializer: Send + Sync {
    fn accept(&self) -> &'static str;

    fn deserialize(&self, body: &[u8]) -> PlatformResult<Vec<Vec<String>>>;
}

/// Rows as comma-separated lines, no header, `\n` terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSerializer;

impl Serializer for CsvSerializer {
    fn content_type(&self) -> &'static str {
        CSV_CONTENT_TYPE
    }

    fn serialize(&self, rows: &[Vec<String>]) -> PlatformResult<String> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        for row in rows {
            writer.write_record(row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvDeserializer;

impl Deserializer for CsvDeserializer {
    fn accept(&self) -> &'static str {
        CSV_CONTENT_TYPE
    }

    fn deserialize(&self, body: &[u8]) -> PlatformResult<Vec<Vec<String>>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_serialize_rows() {
        let rows = vec![row(&["0.00632", "18.0", "2.31"]), row(&["0.02731", "0.0", "7.07"])];
        let body = CsvSerializer.serialize(&rows).unwrap();
        assert_eq!(body, "0.00632,18.0,2.31\n0.02731,0.0,7.07\n");
    }

    #[test]
    fn test_serialize_quotes_separators() {
        let rows = vec![row(&["a,b", "plain"])];
        let body = CsvSerializer.serialize(&rows).unwrap();
        assert_eq!(body, "\"a,b\",plain\n");
    }

    #[test]
    fn test_serialize_empty() {
        assert_eq!(CsvSerializer.serialize(&[]).unwrap(), "");
    }

    #[test]
    fn test_deserialize_response() {
        let rows = CsvDeserializer.deserialize(b"24.1\n21.6\n34.7").unwrap();
        assert_eq!(rows, vec![row(&["24.1"]), row(&["21.6"]), row(&["34.7"])]);

        let rows = CsvDeserializer.deserialize(b"1,2\n3\n").unwrap();
        assert_eq!(rows, vec![row(&["1", "2"]), row(&["3"])]);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(CsvSerializer.content_type(), "text/csv");
        assert_eq!(CsvDeserializer.accept(), "text/csv");
    }
}
