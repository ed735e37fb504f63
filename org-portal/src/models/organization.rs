use serde::{Deserialize, Serialize};

/// Row of the `organizations` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub creator: String,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub logo_url: Option<String>,
    pub meta: Option<String>,
}

/// Editable organization fields. Serialized as the PATCH body for an update,
/// and, with `creator` set, as the insert body.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationChanges {
    pub name: String,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub meta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
}
