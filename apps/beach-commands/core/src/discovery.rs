use serde::{Deserialize, Serialize};

/// One command as listed by the owning entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredCommand {
    pub owner: String,
    pub node: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

/// Features and identity reported for a single command node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node: String,
    pub features: Vec<String>,
    pub identity: Identity,
}

impl NodeInfo {
    pub fn for_command(node: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            features: vec![
                crate::NAMESPACE.to_string(),
                crate::DATA_FORMS_NAMESPACE.to_string(),
            ],
            identity: Identity {
                category: "automation".into(),
                kind: "command-node".into(),
                name: name.into(),
            },
        }
    }
}
