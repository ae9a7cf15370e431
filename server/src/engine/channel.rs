use serde::{Deserialize, Serialize};

use crate::db::models::ChannelRow;

/// A chat channel as exposed to clients and cached by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_default: bool,
}

impl From<ChannelRow> for ChannelInfo {
    fn from(row: ChannelRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            category: row.category,
            is_default: row.is_default != 0,
        }
    }
}

/// The channel a join without a channel ID lands in: the one marked default, else
/// the first listed.
pub fn pick_default(channels: &[ChannelInfo]) -> Option<&ChannelInfo> {
    channels
        .iter()
        .find(|c| c.is_default)
        .or_else(|| channels.first())
}
