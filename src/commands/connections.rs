//! Connection Commands
//!
//! List, save, delete and test stored connections.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::{CommandReply, CoreState};
use crate::error::CoreError;
use crate::probe::{DriverParams, ProbeRequest};
use crate::session::{HandleBundle, UserSession};
use crate::store::types::{
    ConnectionDescriptor, ConnectionId, ConnectionInput, ConnectionSummary, Technology, UserId,
};
use crate::store::{DescriptorStore, ResolvedSecrets};

/// Answer of [`get_connections`]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionList {
    pub connections: Vec<ConnectionSummary>,
    pub technologies: Vec<Technology>,
}

/// Connections visible to the session user. `open_ids` are the ones the
/// client currently has open in a tab.
pub fn get_connections(
    state: &CoreState,
    session: &UserSession,
    open_ids: &[ConnectionId],
) -> CommandReply<ConnectionList> {
    let result = state
        .descriptors()
        .list(session.user, open_ids)
        .map(|connections| ConnectionList {
            connections,
            technologies: Technology::ALL.to_vec(),
        });
    CommandReply::from_result("get_connections", result)
}

/// Create or update a connection and (re)register it in the session
pub fn save_connection(
    state: &CoreState,
    mut session: UserSession,
    input: &ConnectionInput,
) -> (UserSession, CommandReply<ConnectionSummary>) {
    match persist(state, session.user, input) {
        Ok((descriptor, bundle)) => {
            session.connections = session.connections.add_or_replace(descriptor.id, bundle);
            let summary = ConnectionSummary::from_descriptor(&descriptor, session.user, &[]);
            (session, CommandReply::ok(summary))
        }
        Err(e) => (session, CommandReply::from_result("save_connection", Err(e))),
    }
}

/// Save, then build the registry bundle from the freshly stored descriptor
fn persist(
    state: &CoreState,
    user: UserId,
    input: &ConnectionInput,
) -> Result<(ConnectionDescriptor, HandleBundle), CoreError> {
    let key = state.keys().require(user)?;
    let descriptor = state.descriptors().save(user, input, &key)?;
    let secrets = DescriptorStore::decrypt_secrets(&descriptor, &key)?;

    let source = state
        .driver()
        .instantiate(driver_params(&descriptor, &secrets))?;
    let bundle = HandleBundle::new(&descriptor, Arc::from(source), &secrets);
    debug!("Built handle bundle for connection {}", descriptor.id);
    Ok((descriptor, bundle))
}

/// Delete a connection and drop it from the session registry
pub fn delete_connection(
    state: &CoreState,
    mut session: UserSession,
    id: ConnectionId,
) -> (UserSession, CommandReply<()>) {
    match state.descriptors().delete(id, session.user) {
        Ok(()) => {
            session.connections = session.connections.remove(id);
            (session, CommandReply::ok(()))
        }
        Err(e) => (session, CommandReply::from_result("delete_connection", Err(e))),
    }
}

/// Dry-run a connection. Nothing is saved and the registry is not touched.
///
/// When the request names one of the caller's saved connections, its stored
/// secrets fill in any left empty.
pub async fn test_connection(
    state: &CoreState,
    session: &UserSession,
    request: &ProbeRequest,
) -> CommandReply<()> {
    let stored = match request.connection.id.existing() {
        Some(id) => match state.descriptors().find(id) {
            Ok(found) => found.filter(|d| d.owner == session.user),
            Err(e) => return CommandReply::from_result("test_connection", Err(e)),
        },
        None => None,
    };
    let key = state.keys().get(session.user);

    let outcome = state
        .prober()
        .probe(request, stored.as_ref(), key.as_deref())
        .await;
    info!(
        "Connection test for user {} ({}): {}",
        session.user,
        request.connection.technology,
        if outcome.is_error { "failed" } else { "ok" }
    );

    CommandReply {
        data: None,
        message: outcome.message,
        is_error: outcome.is_error,
    }
}

fn driver_params(descriptor: &ConnectionDescriptor, secrets: &ResolvedSecrets) -> DriverParams {
    DriverParams {
        technology: descriptor.technology,
        host: descriptor.host.clone(),
        port: descriptor.port,
        database: descriptor.database.clone(),
        user: descriptor.username.clone(),
        password: secrets.password.clone().unwrap_or_default(),
        connection_id: Some(descriptor.id),
        alias: descriptor.alias.clone(),
        conn_string: descriptor.conn_string.clone(),
    }
}
