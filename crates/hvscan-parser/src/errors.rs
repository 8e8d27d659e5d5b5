use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("line {line_index}: expected {expected} comma-separated fields, found {found}")]
    FieldCount {
        line_index: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line_index}: invalid timestamp '{value}': {message}")]
    Timestamp {
        line_index: usize,
        value: String,
        message: String,
    },

    #[error("line {line_index}: failed to parse column '{column}' as float: {message}")]
    Numeric {
        line_index: usize,
        column: String,
        message: String,
    },

    #[error("line {line_index}: CSV error: {source}")]
    Csv {
        line_index: usize,
        #[source]
        source: csv::Error,
    },

    #[error("log contained no measurement records")]
    EmptyData,
}
