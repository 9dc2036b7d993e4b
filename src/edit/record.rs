use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ObjectId;

//------------ Operation -----------------------------------------------------

/// A single kind of mutation to a configuration object.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create { parent: Option<ObjectId> },
    Delete,
    SetProperty { name: String, value: String },
    Enable { enabled: bool },
    AddMember { member: String },
    RemoveMember { member: String },
}

impl Operation {
    pub fn set_property(name: impl Into<String>, value: impl Into<String>) -> Self {
        Operation::SetProperty {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn enable(enabled: bool) -> Self {
        Operation::Enable { enabled }
    }

    pub fn add_member(member: impl Into<String>) -> Self {
        Operation::AddMember { member: member.into() }
    }

    pub fn remove_member(member: impl Into<String>) -> Self {
        Operation::RemoveMember { member: member.into() }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Operation::Create { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Create { parent: None } => write!(f, "create"),
            Operation::Create { parent: Some(parent) } => write!(f, "create under {parent}"),
            Operation::Delete => write!(f, "delete"),
            Operation::SetProperty { name, value } => write!(f, "set '{name}' to '{value}'"),
            Operation::Enable { enabled: true } => write!(f, "enable"),
            Operation::Enable { enabled: false } => write!(f, "disable"),
            Operation::AddMember { member } => write!(f, "add member '{member}'"),
            Operation::RemoveMember { member } => write!(f, "remove member '{member}'"),
        }
    }
}

//------------ ActionRecord --------------------------------------------------

/// A staged mutation: an operation on the object with the given identity.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionRecord {
    target: ObjectId,
    #[serde(flatten)]
    operation: Operation,
}

impl ActionRecord {
    pub fn new(target: ObjectId, operation: Operation) -> Self {
        ActionRecord { target, operation }
    }

    pub fn target(&self) -> &ObjectId {
        &self.target
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.operation)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_json_shape() {
        let record = ActionRecord::new(ObjectId::binding("oracle"), Operation::set_property("url", "jdbc:x"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            serde_json::json!({
                "target": { "kind": "connector_binding", "name": "oracle" },
                "op": "set_property",
                "name": "url",
                "value": "jdbc:x"
            }),
            json
        );
        let back: ActionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn record_display() {
        let record = ActionRecord::new(ObjectId::host("alpha"), Operation::enable(false));
        assert_eq!("host/alpha: disable", record.to_string());
    }
}
