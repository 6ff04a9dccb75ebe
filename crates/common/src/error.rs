use thiserror::Error;

/// Canonical Opal error taxonomy used across crates.
///
/// Classification guidance:
/// - parse/config/io variants cover the ambient plumbing around a statement
/// - everything else is a planning failure with a stable, user-visible kind
///   (see [`Error::code`]); the builder fails the whole statement on the
///   first one and discards any partially constructed plan
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Statement text could not be parsed into an AST.
    #[error("parse error: {0}")]
    Parse(String),

    /// Transparent std IO failures (catalog file loading).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A table-source or statement node kind the builder does not model.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A column reference matched more than one candidate at equal
    /// specificity.
    #[error("column '{0}' in {1} is ambiguous")]
    AmbiguousColumn(String, String),

    /// A column reference matched nothing in any reachable scope.
    #[error("unknown column '{0}' in {1}")]
    UnknownColumn(String, String),

    /// `*` used anywhere other than as the first select field.
    #[error("invalid usage of '*'")]
    InvalidWildCard,

    /// Malformed argument to a clause that takes literal values.
    #[error("incorrect arguments to {0}")]
    WrongArguments(String),

    /// An UPDATE assignment targets a generated column.
    #[error("column '{0}' of table '{1}' is a generated column")]
    BadGeneratedColumn(String, String),

    /// Merge-join and index-nested-loop-join hints name the same join.
    #[error("optimizer hints are in conflict")]
    ConflictingHints,

    /// UNION branches produce different column counts.
    #[error("the used SELECT statements have a different number of columns")]
    UnionArityMismatch,

    /// An ON condition referenced a column of an enclosing query.
    #[error("ON condition does not support correlated columns")]
    CorrelatedOnCondition,

    /// Catalog lookup miss.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Valid SQL shape the builder intentionally does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Stable kind string, suitable for mapping to a SQL state by the
    /// protocol layer.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::Parse(_) => "Parse",
            Error::Io(_) => "Io",
            Error::UnsupportedType(_) => "UnsupportedType",
            Error::AmbiguousColumn(..) => "AmbiguousColumn",
            Error::UnknownColumn(..) => "UnknownColumn",
            Error::InvalidWildCard => "InvalidWildCard",
            Error::WrongArguments(_) => "WrongArguments",
            Error::BadGeneratedColumn(..) => "BadGeneratedColumn",
            Error::ConflictingHints => "ConflictingHints",
            Error::UnionArityMismatch => "UnionArityMismatch",
            Error::CorrelatedOnCondition => "CorrelatedOnCondition",
            Error::UnknownTable(_) => "UnknownTable",
            Error::Unsupported(_) => "Unsupported",
        }
    }
}

/// Standard Opal result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::AmbiguousColumn("a".into(), "field list".into()).code(),
            "AmbiguousColumn"
        );
        assert_eq!(Error::ConflictingHints.code(), "ConflictingHints");
        assert_eq!(Error::UnionArityMismatch.code(), "UnionArityMismatch");
    }

    #[test]
    fn messages_carry_payload() {
        let err = Error::UnknownColumn("b".into(), "from clause".into());
        assert_eq!(format!("{err}"), "unknown column 'b' in from clause");
    }
}
