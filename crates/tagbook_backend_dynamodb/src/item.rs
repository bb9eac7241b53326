//! Layout of a metadata record as a DynamoDB item.
//!
//! Every logical table maps to one DynamoDB table keyed by the string attribute `Key`. The record
//! bytes live in the binary attribute `Value` and the numeric attribute `Version` is bumped on
//! every write, so that read-modify-write cycles can be made conditional on the version they
//! read.
use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;

use super::errors::{Error, Result};

pub(crate) const KEY: &str = "Key";
pub(crate) const VALUE: &str = "Value";
pub(crate) const VERSION: &str = "Version";

pub(crate) type Item = HashMap<String, AttributeValue>;

/// Record as read back from DynamoDB.
#[derive(Debug, PartialEq)]
pub(crate) struct StoredRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub version: u64,
}

impl StoredRecord {
    pub(crate) fn from_item(table: &str, item: &Item) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedItem {
            table: table.to_string(),
            reason,
        };

        let key = match item.get(KEY) {
            Some(AttributeValue::S(s)) => s.clone(),
            other => return Err(malformed(format!("{KEY} attribute is {other:?}"))),
        };
        let value = match item.get(VALUE) {
            Some(AttributeValue::B(b)) => b.as_ref().to_vec(),
            other => return Err(malformed(format!("{VALUE} of {key:?} is {other:?}"))),
        };
        let version = match item.get(VERSION) {
            Some(AttributeValue::N(n)) => n
                .parse()
                .map_err(|_| malformed(format!("{VERSION} of {key:?} is {n:?}")))?,
            None => 0,
            other => return Err(malformed(format!("{VERSION} of {key:?} is {other:?}"))),
        };

        Ok(Self {
            key,
            value,
            version,
        })
    }
}

pub(crate) fn key_attribute(key: &str) -> AttributeValue {
    AttributeValue::S(key.to_string())
}

pub(crate) fn value_attribute(value: Vec<u8>) -> AttributeValue {
    AttributeValue::B(Blob::new(value))
}

/// Precondition of a conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteCondition {
    /// The key must not exist yet.
    Absent,
    /// The stored item must still carry this version.
    AtVersion(u64),
}

impl WriteCondition {
    pub(crate) fn after_read(read: Option<&StoredRecord>) -> Self {
        match read {
            Some(record) => Self::AtVersion(record.version),
            None => Self::Absent,
        }
    }

    pub(crate) fn expression(&self) -> &'static str {
        match self {
            Self::Absent => "attribute_not_exists(#key)",
            Self::AtVersion(_) => "#version = :expected",
        }
    }

    pub(crate) fn expected_version(&self) -> Option<AttributeValue> {
        match self {
            Self::Absent => None,
            Self::AtVersion(v) => Some(AttributeValue::N(v.to_string())),
        }
    }
}

/// Update expression storing `:value` and bumping the version.
pub(crate) const WRITE_EXPRESSION: &str = "SET #value = :value ADD #version :one";

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    fn item(attrs: &[(&str, AttributeValue)]) -> Item {
        attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn reads_well_formed_items() {
        let stored = StoredRecord::from_item(
            "RepoMetadataTable",
            &item(&[
                (KEY, key_attribute("repo1")),
                (VALUE, value_attribute(b"{}".to_vec())),
                (VERSION, AttributeValue::N(String::from("7"))),
            ]),
        )
        .unwrap();
        assert_eq!(
            stored,
            StoredRecord {
                key: String::from("repo1"),
                value: b"{}".to_vec(),
                version: 7,
            }
        );
    }

    #[test]
    fn missing_version_reads_as_zero() {
        let stored = StoredRecord::from_item(
            "t",
            &item(&[
                (KEY, key_attribute("k")),
                (VALUE, value_attribute(Vec::new())),
            ]),
        )
        .unwrap();
        assert_eq!(stored.version, 0);
    }

    #[rstest]
    #[case::missing_key(&[(VALUE, AttributeValue::B(Blob::new(Vec::new())))])]
    #[case::numeric_key(&[(KEY, AttributeValue::N(String::from("1"))), (VALUE, AttributeValue::B(Blob::new(Vec::new())))])]
    #[case::string_value(&[(KEY, AttributeValue::S(String::from("k"))), (VALUE, AttributeValue::S(String::from("v")))])]
    #[case::bad_version(&[(KEY, AttributeValue::S(String::from("k"))), (VALUE, AttributeValue::B(Blob::new(Vec::new()))), (VERSION, AttributeValue::N(String::from("x")))])]
    fn rejects_malformed_items(#[case] attrs: &[(&str, AttributeValue)]) {
        assert!(matches!(
            StoredRecord::from_item("t", &item(attrs)),
            Err(Error::MalformedItem { .. })
        ));
    }

    #[test]
    fn write_condition_follows_read() {
        let record = StoredRecord {
            key: String::from("k"),
            value: Vec::new(),
            version: 3,
        };
        let cond = WriteCondition::after_read(Some(&record));
        assert_eq!(cond, WriteCondition::AtVersion(3));
        assert_eq!(cond.expression(), "#version = :expected");
        assert_eq!(
            cond.expected_version(),
            Some(AttributeValue::N(String::from("3")))
        );

        let cond = WriteCondition::after_read(None);
        assert_eq!(cond.expression(), "attribute_not_exists(#key)");
        assert_eq!(cond.expected_version(), None);
    }
}
