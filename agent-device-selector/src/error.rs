/// Errors surfaced while parsing a selector chain. The daemon converts all
/// of these into `INVALID_ARGS` responses.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector expression is empty")]
    EmptyInput,

    #[error("selector segment is empty")]
    EmptySegment,

    #[error("unknown selector key: {0}")]
    UnknownKey(String),

    #[error("unclosed quote in selector expression")]
    UnclosedQuote,

    #[error("missing value for key: {0}")]
    MissingValue(String),

    #[error("unparseable boolean value: {0}")]
    UnparseableBoolean(String),
}
