#![forbid(unsafe_code)]

pub mod config;
pub mod gsid;
pub mod record;
pub mod value;

pub mod ids {
    //! Validated identifier newtypes shared by the resolver and the ledger.

    const MAX_SOURCE_ID_LEN: usize = 64;
    const MAX_IDENTIFIER_TYPE_LEN: usize = 32;
    const MAX_BATCH_ID_LEN: usize = 128;

    /// Contributing source/center identifier, e.g. `"1"` or `"center-north"`.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct SourceId(String);

    impl SourceId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_token(&value, MAX_SOURCE_ID_LEN)?;
            Ok(Self(value))
        }
    }

    /// Kind of a source-local identifier (`mrn`, `ssn`, `study`, ...).
    /// Lowercased on construction so lookups are case-stable.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct IdentifierType(String);

    impl IdentifierType {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into().trim().to_ascii_lowercase();
            validate_token(&value, MAX_IDENTIFIER_TYPE_LEN)?;
            Ok(Self(value))
        }
    }

    /// Caller-chosen identifier for one ingest batch; ledger entries carry it.
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct BatchId(String);

    impl BatchId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_token(&value, MAX_BATCH_ID_LEN)?;
            Ok(Self(value))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IdError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for IdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "identifier must not be empty"),
                Self::TooLong => write!(f, "identifier is too long"),
                Self::InvalidFirstChar => {
                    write!(f, "identifier must start with an ascii alphanumeric character")
                }
                Self::InvalidChar { ch, index } => {
                    write!(f, "identifier contains invalid character {ch:?} at index {index}")
                }
            }
        }
    }

    impl std::error::Error for IdError {}

    fn validate_token(value: &str, max_len: usize) -> Result<(), IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > max_len {
            return Err(IdError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(IdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(IdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate() {
            if index == 0 {
                continue;
            }
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | ':') {
                continue;
            }
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn source_id_accepts_numeric_and_slugged_values() {
            assert_eq!(SourceId::try_new("1").expect("source id").as_str(), "1");
            assert_eq!(
                SourceId::try_new("center-north.2").expect("source id").as_str(),
                "center-north.2"
            );
        }

        #[test]
        fn identifier_type_is_lowercased() {
            let id_type = IdentifierType::try_new("MRN").expect("identifier type");
            assert_eq!(id_type.as_str(), "mrn");
        }

        #[test]
        fn rejects_empty_and_bad_characters() {
            assert_eq!(SourceId::try_new(""), Err(IdError::Empty));
            assert_eq!(SourceId::try_new("-lead"), Err(IdError::InvalidFirstChar));
            assert_eq!(
                BatchId::try_new("batch one"),
                Err(IdError::InvalidChar { ch: ' ', index: 5 })
            );
        }
    }
}
