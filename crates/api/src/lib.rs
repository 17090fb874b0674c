//! Shared API types for the huddle relay.
//!
//! The server and any Rust client import the status endpoint types from
//! here. WebSocket event types live in `huddle-core` and are re-exported so
//! callers only need this crate. With the `ts` feature, every HTTP response
//! type and the room types it embeds derive TypeScript bindings for the
//! browser client. WebSocket events are not exported.

use serde::{Deserialize, Serialize};

pub use huddle_core::protocol::{
    ClientEvent, ConnId, ErrorCode, Participant, RoomId, RoomKind, ServerEvent, UserProfile,
};
use huddle_core::{RegistryStats, RoomSnapshot};

// ─── Health ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// Snapshot of the relay's in-memory maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct StatsResponse {
    pub connections: usize,
    pub active_users: usize,
    pub chat_rooms: usize,
    pub video_rooms: usize,
    pub uptime_secs: u64,
}

impl StatsResponse {
    pub fn new(stats: RegistryStats, uptime_secs: u64) -> Self {
        Self {
            connections: stats.connections,
            active_users: stats.active_users,
            chat_rooms: stats.chat_rooms,
            video_rooms: stats.video_rooms,
            uptime_secs,
        }
    }
}

// ─── Rooms ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RoomSummary {
    pub room_id: String,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RoomListResponse {
    pub kind: RoomKind,
    pub rooms: Vec<RoomSummary>,
}

impl RoomListResponse {
    pub fn new(kind: RoomKind, snapshots: Vec<RoomSnapshot>) -> Self {
        let rooms = snapshots
            .into_iter()
            .map(|snapshot| RoomSummary {
                room_id: snapshot.room_id.to_string(),
                member_count: snapshot.members.len(),
            })
            .collect();
        Self { kind, rooms }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RoomResponse {
    pub kind: RoomKind,
    pub room_id: RoomId,
    pub members: Vec<Participant>,
}

impl From<RoomSnapshot> for RoomResponse {
    fn from(snapshot: RoomSnapshot) -> Self {
        Self {
            kind: snapshot.kind,
            room_id: snapshot.room_id,
            members: snapshot.members,
        }
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ErrorResponse {
    pub error: String,
}
