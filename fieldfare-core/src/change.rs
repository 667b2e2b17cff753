//! Reified collection mutations.
//!
//! A [`Change`] names a mutation and carries its parameters. It only touches a
//! collection through [`Change::execute`]; its [`ChangeDescriptor`] is what
//! version statements record and what remote hosts replay.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::chunk::HostId;
use crate::collection::Collection;
use crate::element::ElementDescriptor;
use crate::error::{CollectionResult, VersionError, VersionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeMethod {
    CreateElement,
    DeleteElement,
    UpdateElement,
}

impl ChangeMethod {
    pub const ALL: [ChangeMethod; 3] = [
        ChangeMethod::CreateElement,
        ChangeMethod::DeleteElement,
        ChangeMethod::UpdateElement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeMethod::CreateElement => "createElement",
            ChangeMethod::DeleteElement => "deleteElement",
            ChangeMethod::UpdateElement => "updateElement",
        }
    }
}

impl fmt::Display for ChangeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeMethod {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| VersionError::UnknownChange(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateElement {
        name: String,
        descriptor: ElementDescriptor,
    },
    DeleteElement {
        name: String,
    },
    UpdateElement {
        name: String,
        descriptor: ElementDescriptor,
    },
}

/// Wire form of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub method: String,
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<HostId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub mutation: Mutation,
    pub issuer: Option<HostId>,
}

impl Change {
    fn from_mutation(mutation: Mutation) -> Self {
        Change {
            mutation,
            issuer: None,
        }
    }

    pub fn create_element(name: impl Into<String>, descriptor: ElementDescriptor) -> Self {
        Self::from_mutation(Mutation::CreateElement {
            name: name.into(),
            descriptor,
        })
    }

    pub fn delete_element(name: impl Into<String>) -> Self {
        Self::from_mutation(Mutation::DeleteElement { name: name.into() })
    }

    pub fn update_element(name: impl Into<String>, descriptor: ElementDescriptor) -> Self {
        Self::from_mutation(Mutation::UpdateElement {
            name: name.into(),
            descriptor,
        })
    }

    pub fn method(&self) -> ChangeMethod {
        match self.mutation {
            Mutation::CreateElement { .. } => ChangeMethod::CreateElement,
            Mutation::DeleteElement { .. } => ChangeMethod::DeleteElement,
            Mutation::UpdateElement { .. } => ChangeMethod::UpdateElement,
        }
    }

    pub fn set_issuer(&mut self, issuer: HostId) -> &mut Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn descriptor(&self) -> VersionResult<ChangeDescriptor> {
        let params = match &self.mutation {
            Mutation::CreateElement { name, descriptor } | Mutation::UpdateElement { name, descriptor } => {
                vec![Value::String(name.clone()), serde_json::to_value(descriptor)?]
            }
            Mutation::DeleteElement { name } => vec![Value::String(name.clone())],
        };
        Ok(ChangeDescriptor {
            method: self.method().as_str().to_string(),
            params,
            issuer: self.issuer.clone(),
        })
    }

    /// Rebuild a change from its wire form.
    pub fn from_descriptor(descriptor: &ChangeDescriptor) -> VersionResult<Self> {
        let method: ChangeMethod = descriptor.method.parse()?;
        let malformed = |reason: &str| VersionError::MalformedChange {
            method: descriptor.method.clone(),
            reason: reason.to_string(),
        };

        let expected = match method {
            ChangeMethod::DeleteElement => 1,
            ChangeMethod::CreateElement | ChangeMethod::UpdateElement => 2,
        };
        if descriptor.params.len() != expected {
            return Err(malformed(&format!(
                "expected {} parameters, got {}",
                expected,
                descriptor.params.len()
            )));
        }

        let name = descriptor.params[0]
            .as_str()
            .ok_or_else(|| malformed("element name must be a string"))?
            .to_string();
        let element = |index: usize| -> VersionResult<ElementDescriptor> {
            serde_json::from_value(descriptor.params[index].clone())
                .map_err(|e| malformed(&e.to_string()))
        };

        let mutation = match method {
            ChangeMethod::CreateElement => Mutation::CreateElement {
                name,
                descriptor: element(1)?,
            },
            ChangeMethod::DeleteElement => Mutation::DeleteElement { name },
            ChangeMethod::UpdateElement => Mutation::UpdateElement {
                name,
                descriptor: element(1)?,
            },
        };
        Ok(Change {
            mutation,
            issuer: descriptor.issuer.clone(),
        })
    }

    /// Whether a replayed change would still have an effect on `collection`.
    pub fn merge_policy(&self, collection: &Collection) -> CollectionResult<bool> {
        match &self.mutation {
            Mutation::CreateElement { name, .. } => {
                if collection.has_element(name)? {
                    info!(name = %name, "createElement merge policy: element already exists, skipping");
                    return Ok(false);
                }
            }
            Mutation::DeleteElement { name } => {
                if !collection.has_element(name)? {
                    info!(name = %name, "deleteElement merge policy: element does not exist, skipping");
                    return Ok(false);
                }
            }
            Mutation::UpdateElement { name, descriptor } => match collection.get_descriptor(name)? {
                None => {
                    info!(name = %name, "updateElement merge policy: element does not exist, skipping");
                    return Ok(false);
                }
                Some(current) if current == *descriptor => {
                    info!(name = %name, "updateElement merge policy: element already up to date, skipping");
                    return Ok(false);
                }
                Some(_) => {}
            },
        }
        Ok(true)
    }

    /// Apply the change. In merge mode the merge policy may skip it.
    ///
    /// Returns whether the collection was mutated.
    pub fn execute(&self, collection: &mut Collection, merge: bool) -> CollectionResult<bool> {
        if merge && !self.merge_policy(collection)? {
            return Ok(false);
        }
        match &self.mutation {
            Mutation::CreateElement { name, descriptor } => collection.create_element(name, descriptor)?,
            Mutation::DeleteElement { name } => collection.delete_element(name)?,
            Mutation::UpdateElement { name, descriptor } => collection.update_element(name, descriptor)?,
        }
        Ok(true)
    }
}
