//! Group Commands

use super::{CommandReply, CoreState};
use crate::session::UserSession;
use crate::store::types::{Group, GroupId, GroupSummary};
use crate::store::{BatchReport, MembershipChange};

pub fn get_groups(state: &CoreState, session: &UserSession) -> CommandReply<Vec<GroupSummary>> {
    CommandReply::from_result("get_groups", state.groups().get_groups(session.user))
}

pub fn new_group(state: &CoreState, session: &UserSession, name: &str) -> CommandReply<Group> {
    CommandReply::from_result("new_group", state.groups().new_group(session.user, name))
}

pub fn edit_group(
    state: &CoreState,
    session: &UserSession,
    id: GroupId,
    name: &str,
) -> CommandReply<Group> {
    CommandReply::from_result(
        "edit_group",
        state.groups().edit_group(id, session.user, name),
    )
}

pub fn delete_group(state: &CoreState, session: &UserSession, id: GroupId) -> CommandReply<()> {
    CommandReply::from_result("delete_group", state.groups().delete_group(id, session.user))
}

/// Apply membership changes. The reply is an error only when the group
/// itself is unusable; per-item failures are in the report.
pub fn save_group_connections(
    state: &CoreState,
    session: &UserSession,
    id: GroupId,
    changes: &[MembershipChange],
) -> CommandReply<BatchReport> {
    let reply = CommandReply::from_result(
        "save_group_connections",
        state
            .groups()
            .save_group_connections(id, session.user, changes),
    );

    let failed = reply.data.as_ref().map_or(0, |r| r.failed().count());
    if failed > 0 {
        reply.with_message(format!("{} of {} changes failed.", failed, changes.len()))
    } else {
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::connections::save_connection;
    use crate::config::CoreSettings;
    use crate::store::types::{ConnectionId, ConnectionInput, Technology, UserId};
    use crate::vault::UserKey;

    fn setup() -> (CoreState, UserSession, ConnectionId) {
        let state = CoreState::in_memory(CoreSettings::default());
        state.login(UserId(1), UserKey::generate());

        let mut input = ConnectionInput::new(Technology::Mysql);
        input.host = "db1".into();
        let (session, reply) = save_connection(&state, UserSession::new(UserId(1)), &input);
        (state, session, reply.data.unwrap().id)
    }

    #[test]
    fn test_empty_group_name_rejected() {
        let (state, session, _) = setup();
        let reply = new_group(&state, &session, "   ");
        assert!(reply.is_error);
        assert_eq!(reply.message, "Group name can not be empty.");
    }

    #[test]
    fn test_group_membership_round() {
        let (state, session, id) = setup();
        let group = new_group(&state, &session, "prod").data.unwrap();

        let reply = save_group_connections(
            &state,
            &session,
            group.id,
            &[
                MembershipChange {
                    connection_id: id,
                    selected: true,
                },
                MembershipChange {
                    connection_id: ConnectionId(999),
                    selected: true,
                },
            ],
        );
        assert!(!reply.is_error);
        assert_eq!(reply.message, "1 of 2 changes failed.");
        assert_eq!(reply.data.unwrap().succeeded(), 1);

        let groups = get_groups(&state, &session).data.unwrap();
        assert_eq!(groups[0].connections, vec![id]);

        let other = UserSession::new(UserId(2));
        let reply = edit_group(&state, &other, group.id, "mine now");
        assert_eq!(reply.message, "This group does not belong to you.");

        assert!(!delete_group(&state, &session, group.id).is_error);
        assert!(get_groups(&state, &session).data.unwrap().is_empty());
    }
}
