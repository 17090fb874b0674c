use crate::protocol::{ConnId, UserProfile};
use crate::registry::Registry;

/// Profile with a display name derived from the user id.
pub fn profile(user_id: &str) -> UserProfile {
    UserProfile::new(user_id).with_display_name(format!("{user_id} (test)"))
}

/// Connect and identify a new connection, discarding the deliveries.
pub fn identified(registry: &mut Registry, user_id: &str) -> ConnId {
    let (conn, _) = registry.connect();
    registry
        .identify(conn, profile(user_id))
        .expect("identify test connection");
    conn
}
