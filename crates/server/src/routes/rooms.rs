use axum::{
    extract::{Path, State},
    Json,
};
use huddle_api::{RoomId, RoomKind, RoomListResponse, RoomResponse};

use crate::error::ApiErr;
use crate::relay::Relay;

/// GET /api/rooms/{kind}: every live room of one kind.
pub async fn list_rooms(
    State(relay): State<Relay>,
    Path(kind): Path<String>,
) -> Result<Json<RoomListResponse>, ApiErr> {
    let kind: RoomKind = kind.parse()?;
    Ok(Json(RoomListResponse::new(kind, relay.list_rooms(kind))))
}

/// GET /api/rooms/{kind}/{id}: members of a single room.
pub async fn get_room(
    State(relay): State<Relay>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<RoomResponse>, ApiErr> {
    let kind: RoomKind = kind.parse()?;
    let room = RoomId::parse(&id)?;
    relay
        .room(kind, &room)
        .map(|snapshot| Json(snapshot.into()))
        .ok_or_else(|| ApiErr::not_found(format!("no {kind} room {room}")))
}
