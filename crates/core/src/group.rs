use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::data::GroupMeta;

/// In-memory group roster, guarded by its own mutex independent of the
/// connection pool's. Persisted group/member rows are owned by the store;
/// this service is the authoritative in-process view used for fan-out and
/// relay routing.
pub struct GroupChatService {
    groups: Mutex<HashMap<String, GroupMeta>>,
}

impl GroupChatService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            groups: Mutex::new(HashMap::new()),
        })
    }

    /// Additive on members (dedup, skip empty, preserve order). Sets the
    /// owner only if unset; a re-register naming a different owner than
    /// the one already on file is ignored with a warning.
    pub fn register_group(&self, group_id: String, members: Vec<String>, owner_id: Option<String>) {
        let mut groups = self.groups.lock();
        let group = groups.entry(group_id.clone()).or_insert_with(|| GroupMeta {
            group_id: group_id.clone(),
            owner_id: None,
            members: Vec::new(),
        });
        for member in members {
            group.add_member(member);
        }
        match (&group.owner_id, owner_id) {
            (None, Some(new_owner)) => group.owner_id = Some(new_owner),
            (Some(existing), Some(new_owner)) if *existing != new_owner => {
                warn!(group_id, existing, new_owner, "ignoring owner mismatch on group re-register");
            }
            _ => {}
        }
    }

    pub fn add_member(&self, group_id: &str, member: String) {
        if let Some(group) = self.groups.lock().get_mut(group_id) {
            group.add_member(member);
        }
    }

    pub fn remove_member(&self, group_id: &str, member: &str) {
        if let Some(group) = self.groups.lock().get_mut(group_id) {
            group.members.retain(|m| m != member);
        }
    }

    pub fn remove_group(&self, group_id: &str) {
        self.groups.lock().remove(group_id);
    }

    pub fn has_group(&self, group_id: &str) -> bool {
        self.groups.lock().contains_key(group_id)
    }

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .lock()
            .get(group_id)
            .is_some_and(|g| g.members.iter().any(|m| m == user_id))
    }

    pub fn get_group_members(&self, group_id: &str) -> Vec<String> {
        self.groups
            .lock()
            .get(group_id)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    pub fn get_group_owner(&self, group_id: &str) -> Option<String> {
        self.groups.lock().get(group_id).and_then(|g| g.owner_id.clone())
    }

    /// Targets for `local_user_id` sending into a group: with no owner, or
    /// with local as owner, every other member; as a plain member, the
    /// owner alone (if one is set and listed as a member). `exclude` is an
    /// additional caller-supplied id to drop (e.g. the original sender).
    pub fn get_message_targets(&self, group_id: &str, local_user_id: &str, exclude: Option<&str>) -> Vec<String> {
        let groups = self.groups.lock();
        let Some(group) = groups.get(group_id) else {
            return Vec::new();
        };
        let targets = match &group.owner_id {
            None => group.members.clone(),
            Some(owner) if owner == local_user_id => group.members.clone(),
            Some(owner) if group.members.iter().any(|m| m == owner) => vec![owner.clone()],
            Some(_) => Vec::new(),
        };
        targets
            .into_iter()
            .filter(|m| m != local_user_id && Some(m.as_str()) != exclude)
            .collect()
    }

    /// Targets for `local_user_id` (must be the group's owner) relaying a
    /// message received from `from` addressed to `to`: empty unless local
    /// is owner, otherwise every member except local, `from`, and `to`.
    pub fn get_relay_targets(&self, group_id: &str, local_user_id: &str, from: &str, to: &str) -> Vec<String> {
        let groups = self.groups.lock();
        let Some(group) = groups.get(group_id) else {
            return Vec::new();
        };
        if group.owner_id.as_deref() != Some(local_user_id) {
            return Vec::new();
        }
        group
            .members
            .iter()
            .filter(|m| m.as_str() != local_user_id && m.as_str() != from && m.as_str() != to)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_excludes_sender_owner_and_recipient() {
        let service = GroupChatService::new();
        service.register_group(
            "g1".into(),
            vec!["B".into(), "C".into(), "D".into()],
            Some("A".into()),
        );
        let targets = service.get_relay_targets("g1", "A", "B", "A");
        assert_eq!(targets, vec!["C".to_string(), "D".to_string()]);
    }

    #[test]
    fn non_owner_gets_no_relay_targets() {
        let service = GroupChatService::new();
        service.register_group("g1".into(), vec!["A".into(), "C".into()], Some("A".into()));
        assert!(service.get_relay_targets("g1", "B", "A", "B").is_empty());
    }

    #[test]
    fn register_group_is_additive_and_dedups() {
        let service = GroupChatService::new();
        service.register_group("g1".into(), vec!["B".into()], Some("A".into()));
        service.register_group("g1".into(), vec!["B".into(), "C".into(), "".into()], None);
        assert_eq!(service.get_group_members("g1"), vec!["B".to_string(), "C".to_string()]);
        assert_eq!(service.get_group_owner("g1"), Some("A".to_string()));
    }

    #[test]
    fn owner_mismatch_on_reregister_is_ignored() {
        let service = GroupChatService::new();
        service.register_group("g1".into(), vec!["B".into()], Some("A".into()));
        service.register_group("g1".into(), vec![], Some("Z".into()));
        assert_eq!(service.get_group_owner("g1"), Some("A".to_string()));
    }

    #[test]
    fn message_targets_member_sees_owner_only() {
        let service = GroupChatService::new();
        service.register_group("g1".into(), vec!["A".into(), "B".into(), "C".into()], Some("A".into()));
        assert_eq!(service.get_message_targets("g1", "B", None), vec!["A".to_string()]);
        assert_eq!(
            service.get_message_targets("g1", "A", None),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
                .into_iter()
                .filter(|m| m != "A")
                .collect::<Vec<_>>()
        );
    }
}
