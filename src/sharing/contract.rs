//! Versioned data contracts.
//!
//! A contract id has the form `<name>.v<major>`, e.g. `todo.progress.v1`.
//! The name identifies the payload; the major version changes whenever the
//! payload schema changes incompatibly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectError;

/// Parsed contract identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractId {
    name: String,
    major: u32,
}

impl ContractId {
    pub fn parse(raw: &str) -> Result<Self, ConnectError> {
        let invalid = || ConnectError::InvalidContractId {
            contract_id: raw.to_string(),
        };

        let (name, version) = raw.rsplit_once('.').ok_or_else(invalid)?;
        let major = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        let valid_name = !name.is_empty()
            && name
                .split('.')
                .all(|segment| {
                    !segment.is_empty()
                        && segment
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                });
        if !valid_name {
            return Err(invalid());
        }

        Ok(Self {
            name: name.to_string(),
            major,
        })
    }

    /// Contract name without the version suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    /// Check that a provider's contract satisfies what a consumer expects.
    pub fn check_offered(&self, offered: &ContractId) -> Result<(), ConnectError> {
        if self.name != offered.name {
            return Err(ConnectError::InvalidContractId {
                contract_id: offered.to_string(),
            });
        }
        if self.major != offered.major {
            return Err(ConnectError::VersionMismatch {
                contract_id: self.to_string(),
                expected: self.major,
                found: offered.major,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}", self.name, self.major)
    }
}

impl FromStr for ContractId {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A published payload schema. Never edited once consumers exist; a new
/// schema gets a new contract id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContract {
    pub contract_id: String,
    #[serde(default)]
    pub payload_schema: Value,
}

impl DataContract {
    pub fn new(contract_id: impl Into<String>, payload_schema: Value) -> Self {
        Self {
            contract_id: contract_id.into(),
            payload_schema,
        }
    }

    pub fn id(&self) -> Result<ContractId, ConnectError> {
        ContractId::parse(&self.contract_id)
    }
}

/// How many providers a consumer may read one contract from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionMode {
    /// At most one provider; connecting another replaces it.
    #[default]
    Single,
    /// Any number of providers, aggregated by the consumer.
    Multi,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_contract_id() {
        let id = ContractId::parse("todo.progress.v2").unwrap();
        assert_eq!(id.name(), "todo.progress");
        assert_eq!(id.major(), 2);
        assert_eq!(id.to_string(), "todo.progress.v2");
    }

    #[test_case("todo" ; "no version")]
    #[test_case("todo.progress.2" ; "missing v prefix")]
    #[test_case(".v1" ; "empty name")]
    #[test_case("todo..progress.v1" ; "empty segment")]
    #[test_case("todo progress.v1" ; "whitespace")]
    fn test_invalid_contract_ids(raw: &str) {
        assert!(ContractId::parse(raw).is_err());
    }

    #[test]
    fn test_major_mismatch() {
        let expected: ContractId = "todo.progress.v1".parse().unwrap();
        let offered: ContractId = "todo.progress.v2".parse().unwrap();

        assert_eq!(
            expected.check_offered(&offered),
            Err(ConnectError::VersionMismatch {
                contract_id: "todo.progress.v1".to_string(),
                expected: 1,
                found: 2,
            })
        );
        assert!(expected.check_offered(&expected.clone()).is_ok());
    }
}
