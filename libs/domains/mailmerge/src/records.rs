//! CSV record source.
//!
//! The first row is the header; the column titled `email` (any case) holds
//! the recipient address. Every column, the address included, becomes a
//! placeholder value keyed by its header.

use crate::error::{MailMergeError, MailMergeResult};
use crate::models::RecipientRecord;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const ADDRESS_COLUMN: &str = "email";

/// Read all recipient records from a CSV file.
pub fn parse_records(path: impl AsRef<Path>) -> MailMergeResult<Vec<RecipientRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        MailMergeError::Configuration(format!(
            "could not open data file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let records = parse_records_from_reader(file)?;
    debug!(path = %path.display(), count = records.len(), "Parsed recipient records");
    Ok(records)
}

/// Read all recipient records from any CSV byte source.
pub fn parse_records_from_reader<R: Read>(reader: R) -> MailMergeResult<Vec<RecipientRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let address_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(ADDRESS_COLUMN))
        .ok_or_else(|| {
            if headers.is_empty() {
                MailMergeError::Configuration(
                    "data file must have at least two rows: header and data".to_string(),
                )
            } else {
                MailMergeError::Configuration("no email column found in header".to_string())
            }
        })?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let address = row.get(address_index).ok_or_else(|| {
            MailMergeError::Configuration(format!(
                "email column index out of range for row {:?}",
                row.position().map(|p| p.line())
            ))
        })?;

        let fields: HashMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(header, value)| (header.to_string(), value.to_string()))
            .collect();

        records.push(RecipientRecord::new(address, fields));
    }

    if records.is_empty() {
        return Err(MailMergeError::Configuration(
            "data file must have at least two rows: header and data".to_string(),
        ));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_valid_csv() {
        let csv = "Email,Name,Age\nrene@example.com,Renê Cardozo,25\njorge@example.com,Jorge,67\n";
        let records = parse_records_from_reader(csv.as_bytes()).unwrap();

        assert_eq!(
            records,
            vec![
                RecipientRecord::new(
                    "rene@example.com",
                    fields(&[("Email", "rene@example.com"), ("Name", "Renê Cardozo"), ("Age", "25")]),
                ),
                RecipientRecord::new(
                    "jorge@example.com",
                    fields(&[("Email", "jorge@example.com"), ("Name", "Jorge"), ("Age", "67")]),
                ),
            ]
        );
    }

    #[test]
    fn test_values_and_headers_are_trimmed() {
        let csv = " Name , EMAIL \n  Ana  ,  ana@example.com \n";
        let records = parse_records_from_reader(csv.as_bytes()).unwrap();

        assert_eq!(records[0].address, "ana@example.com");
        assert_eq!(records[0].fields["Name"], "Ana");
        assert_eq!(records[0].fields["EMAIL"], "ana@example.com");
    }

    #[test]
    fn test_missing_address_is_kept() {
        let csv = "Email,Name,Age\n,No Email,40\n";
        let records = parse_records_from_reader(csv.as_bytes()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, "");
        assert_eq!(records[0].fields["Name"], "No Email");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = parse_records_from_reader("".as_bytes()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("at least two rows"));
    }

    #[test]
    fn test_header_only_is_rejected() {
        let err = parse_records_from_reader("Email,Name,Age\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("at least two rows"));
    }

    #[test]
    fn test_missing_email_column_is_rejected() {
        let err = parse_records_from_reader("Name,Age\nAna,30\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no email column"));
    }

    #[test]
    fn test_ragged_row_is_rejected() {
        let csv = "Email,Name\nana@example.com,Ana,extra\n";
        let err = parse_records_from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, MailMergeError::Configuration(_)));
    }

    #[test]
    fn test_parse_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Email,Name").unwrap();
        writeln!(file, "a@x.com,Alice").unwrap();

        let records = parse_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["Name"], "Alice");
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = parse_records("non_existent_file.csv").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("non_existent_file.csv"));
    }
}
