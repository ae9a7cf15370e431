use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// One live session as seen by the presence aggregator.
#[derive(Debug, Clone, Copy)]
pub struct PresenceEntry<'a> {
    pub user_id: &'a str,
    pub username: &'a str,
    pub channel_id: &'a str,
}

/// Who is online, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Distinct users with at least one live connection.
    pub online_count: usize,
    /// Channel ID -> distinct usernames currently on that channel, sorted.
    pub channel_users: BTreeMap<String, Vec<String>>,
}

impl PresenceSnapshot {
    pub fn users_in(&self, channel_id: &str) -> &[String] {
        self.channel_users
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Derive a presence snapshot from every live session. Always computed from
/// scratch; there is no incremental state to drift.
pub fn aggregate<'a>(entries: impl IntoIterator<Item = PresenceEntry<'a>>) -> PresenceSnapshot {
    let mut users: HashSet<&str> = HashSet::new();
    let mut channels: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for entry in entries {
        users.insert(entry.user_id);
        channels
            .entry(entry.channel_id)
            .or_default()
            .insert(entry.username);
    }

    PresenceSnapshot {
        online_count: users.len(),
        channel_users: channels
            .into_iter()
            .map(|(channel, names)| {
                (
                    channel.to_string(),
                    names.into_iter().map(str::to_string).collect(),
                )
            })
            .collect(),
    }
}
