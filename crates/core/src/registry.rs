//! In-memory room registry.
//!
//! Holds the three maps the relay needs (active users, chat rooms, video
//! rooms) plus a per-connection index of memberships so a disconnect never
//! scans every room. Operations mutate state and return the [`Delivery`]
//! list the caller must dispatch; nothing here performs I/O.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::protocol::{
    ClientEvent, ConnId, ErrorCode, Participant, RoomId, RoomKind, ServerEvent, SignalKind,
    UserProfile,
};

/// One outbound event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnId,
    pub event: ServerEvent,
}

impl Delivery {
    pub fn new(to: ConnId, event: ServerEvent) -> Self {
        Self { to, event }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_video_participants: usize,
    pub max_rooms_per_connection: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_video_participants: 8,
            max_rooms_per_connection: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnId),
    #[error("identify before joining rooms")]
    NotIdentified,
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    #[error("not a member of {kind} room {room}")]
    NotInRoom { kind: RoomKind, room: RoomId },
    #[error("video room {room} is full ({limit} participants)")]
    RoomFull { room: RoomId, limit: usize },
    #[error("peer {0} is not in a shared video room")]
    PeerNotFound(ConnId),
    #[error("room limit of {0} per connection reached")]
    TooManyRooms(usize),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownConnection(_) | Self::InvalidProfile(_) => ErrorCode::BadRequest,
            Self::NotIdentified => ErrorCode::NotIdentified,
            Self::NotInRoom { .. } => ErrorCode::NotInRoom,
            Self::RoomFull { .. } => ErrorCode::RoomFull,
            Self::PeerNotFound(_) => ErrorCode::PeerNotFound,
            Self::TooManyRooms(_) => ErrorCode::TooManyRooms,
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub connections: usize,
    pub active_users: usize,
    pub chat_rooms: usize,
    pub video_rooms: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub kind: RoomKind,
    pub room_id: RoomId,
    pub members: Vec<Participant>,
}

#[derive(Debug, Default)]
struct Memberships {
    chat: BTreeSet<RoomId>,
    video: BTreeSet<RoomId>,
}

impl Memberships {
    fn rooms(&self, kind: RoomKind) -> &BTreeSet<RoomId> {
        match kind {
            RoomKind::Chat => &self.chat,
            RoomKind::Video => &self.video,
        }
    }

    fn rooms_mut(&mut self, kind: RoomKind) -> &mut BTreeSet<RoomId> {
        match kind {
            RoomKind::Chat => &mut self.chat,
            RoomKind::Video => &mut self.video,
        }
    }

    fn total(&self) -> usize {
        self.chat.len() + self.video.len()
    }
}

type Rooms = BTreeMap<RoomId, BTreeSet<ConnId>>;

#[derive(Debug, Default)]
pub struct Registry {
    limits: RegistryLimits,
    next_id: u64,
    connections: BTreeMap<ConnId, Memberships>,
    active_users: BTreeMap<ConnId, UserProfile>,
    chat_rooms: Rooms,
    video_rooms: Rooms,
}

impl Registry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn connect(&mut self) -> (ConnId, Vec<Delivery>) {
        self.next_id += 1;
        let conn = ConnId::new(self.next_id);
        self.connections.insert(conn, Memberships::default());
        (
            conn,
            vec![Delivery::new(conn, ServerEvent::Welcome { conn_id: conn })],
        )
    }

    pub fn is_connected(&self, conn: ConnId) -> bool {
        self.connections.contains_key(&conn)
    }

    /// Dispatch a client event. Failures are reported back to the sender as
    /// an `error` event.
    pub fn handle(&mut self, conn: ConnId, event: ClientEvent) -> Vec<Delivery> {
        let result = match event {
            ClientEvent::Identify(profile) => self.identify(conn, profile),
            ClientEvent::JoinRoom { room_id } => self.join_chat(conn, room_id),
            ClientEvent::LeaveRoom { room_id } => self.leave_chat(conn, &room_id),
            ClientEvent::SendMessage { room_id, message } => {
                self.send_message(conn, &room_id, message)
            }
            ClientEvent::Typing { room_id, is_typing } => self.typing(conn, &room_id, is_typing),
            ClientEvent::JoinVideo { room_id } => self.join_video(conn, room_id),
            ClientEvent::Offer { target, sdp } => self.signal(conn, target, SignalKind::Offer, sdp),
            ClientEvent::Answer { target, sdp } => {
                self.signal(conn, target, SignalKind::Answer, sdp)
            }
            ClientEvent::IceCandidate { target, candidate } => {
                self.signal(conn, target, SignalKind::IceCandidate, candidate)
            }
            ClientEvent::LeaveVideo { room_id } => self.leave_video(conn, &room_id),
        };
        result.unwrap_or_else(|e| vec![Delivery::new(conn, e.to_event())])
    }

    pub fn identify(
        &mut self,
        conn: ConnId,
        profile: UserProfile,
    ) -> Result<Vec<Delivery>, RelayError> {
        self.memberships(conn)?;
        if profile.user_id.trim().is_empty() {
            return Err(RelayError::InvalidProfile("user_id is empty".into()));
        }
        self.active_users.insert(conn, profile);
        Ok(self.broadcast_active_users())
    }

    pub fn join_chat(&mut self, conn: ConnId, room: RoomId) -> Result<Vec<Delivery>, RelayError> {
        let joiner = self.join(conn, RoomKind::Chat, &room)?;
        let members = self.participants(self.chat_rooms.get(&room));
        let mut out = vec![Delivery::new(
            conn,
            ServerEvent::RoomMembers {
                room_id: room.clone(),
                members,
            },
        )];
        if let Some(joiner) = joiner {
            out.extend(self.fan_out(
                RoomKind::Chat,
                &room,
                Some(conn),
                ServerEvent::UserJoined {
                    room_id: room.clone(),
                    participant: joiner,
                },
            ));
        }
        Ok(out)
    }

    pub fn leave_chat(&mut self, conn: ConnId, room: &RoomId) -> Result<Vec<Delivery>, RelayError> {
        self.leave(conn, RoomKind::Chat, room)
    }

    pub fn send_message(
        &mut self,
        conn: ConnId,
        room: &RoomId,
        message: Value,
    ) -> Result<Vec<Delivery>, RelayError> {
        let from = self.member_participant(conn, RoomKind::Chat, room)?;
        let event = ServerEvent::ReceiveMessage {
            room_id: room.clone(),
            message_id: Uuid::new_v4(),
            from,
            message,
            sent_at: Utc::now(),
        };
        Ok(self.fan_out(RoomKind::Chat, room, None, event))
    }

    pub fn typing(
        &mut self,
        conn: ConnId,
        room: &RoomId,
        is_typing: bool,
    ) -> Result<Vec<Delivery>, RelayError> {
        let from = self.member_participant(conn, RoomKind::Chat, room)?;
        let event = ServerEvent::Typing {
            room_id: room.clone(),
            from,
            is_typing,
        };
        Ok(self.fan_out(RoomKind::Chat, room, Some(conn), event))
    }

    pub fn join_video(&mut self, conn: ConnId, room: RoomId) -> Result<Vec<Delivery>, RelayError> {
        let already_in = self.memberships(conn)?.video.contains(&room);
        if self.participant(conn).is_none() {
            return Err(RelayError::NotIdentified);
        }
        if !already_in {
            let occupants = self.video_rooms.get(&room).map_or(0, BTreeSet::len);
            if occupants >= self.limits.max_video_participants {
                return Err(RelayError::RoomFull {
                    room,
                    limit: self.limits.max_video_participants,
                });
            }
        }

        let joiner = self.join(conn, RoomKind::Video, &room)?;
        let peers: Vec<Participant> = self
            .video_rooms
            .get(&room)
            .map(|members| {
                members
                    .iter()
                    .filter(|&&id| id != conn)
                    .filter_map(|&id| self.participant(id))
                    .collect()
            })
            .unwrap_or_default();
        let mut out = vec![Delivery::new(
            conn,
            ServerEvent::VideoParticipants {
                room_id: room.clone(),
                participants: peers,
            },
        )];
        if let Some(joiner) = joiner {
            out.extend(self.fan_out(
                RoomKind::Video,
                &room,
                Some(conn),
                ServerEvent::VideoUserJoined {
                    room_id: room.clone(),
                    participant: joiner,
                },
            ));
        }
        Ok(out)
    }

    /// Forward a WebRTC signaling payload to a peer sharing a video room.
    pub fn signal(
        &mut self,
        conn: ConnId,
        target: ConnId,
        kind: SignalKind,
        payload: Value,
    ) -> Result<Vec<Delivery>, RelayError> {
        let sender_rooms = &self.memberships(conn)?.video;
        let shares_room = target != conn
            && self
                .connections
                .get(&target)
                .is_some_and(|peer| !peer.video.is_disjoint(sender_rooms));
        if !shares_room {
            return Err(RelayError::PeerNotFound(target));
        }
        let from = self.participant(conn).ok_or(RelayError::NotIdentified)?;

        let event = match kind {
            SignalKind::Offer => ServerEvent::Offer { from, sdp: payload },
            SignalKind::Answer => ServerEvent::Answer { from, sdp: payload },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                from,
                candidate: payload,
            },
        };
        Ok(vec![Delivery::new(target, event)])
    }

    pub fn leave_video(
        &mut self,
        conn: ConnId,
        room: &RoomId,
    ) -> Result<Vec<Delivery>, RelayError> {
        self.leave(conn, RoomKind::Video, room)
    }

    /// Drop a connection from every room and from the active users.
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<Delivery> {
        let Some(memberships) = self.connections.get(&conn) else {
            return Vec::new();
        };
        let chat: Vec<RoomId> = memberships.chat.iter().cloned().collect();
        let video: Vec<RoomId> = memberships.video.iter().cloned().collect();

        let mut out = Vec::new();
        for room in &chat {
            out.extend(self.leave(conn, RoomKind::Chat, room).unwrap_or_default());
        }
        for room in &video {
            out.extend(self.leave(conn, RoomKind::Video, room).unwrap_or_default());
        }

        self.connections.remove(&conn);
        if self.active_users.remove(&conn).is_some() {
            out.extend(self.broadcast_active_users());
        }
        out
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            active_users: self.active_users.len(),
            chat_rooms: self.chat_rooms.len(),
            video_rooms: self.video_rooms.len(),
        }
    }

    pub fn room(&self, kind: RoomKind, room: &RoomId) -> Option<RoomSnapshot> {
        self.rooms(kind).get(room).map(|members| RoomSnapshot {
            kind,
            room_id: room.clone(),
            members: self.participants(Some(members)),
        })
    }

    pub fn list_rooms(&self, kind: RoomKind) -> Vec<RoomSnapshot> {
        self.rooms(kind)
            .iter()
            .map(|(room, members)| RoomSnapshot {
                kind,
                room_id: room.clone(),
                members: self.participants(Some(members)),
            })
            .collect()
    }

    pub fn active_users(&self) -> Vec<Participant> {
        self.active_users
            .iter()
            .map(|(&conn_id, user)| Participant {
                conn_id,
                user: user.clone(),
            })
            .collect()
    }

    // ── internals ───────────────────────────────────────────────────────

    fn memberships(&self, conn: ConnId) -> Result<&Memberships, RelayError> {
        self.connections
            .get(&conn)
            .ok_or(RelayError::UnknownConnection(conn))
    }

    fn rooms(&self, kind: RoomKind) -> &Rooms {
        match kind {
            RoomKind::Chat => &self.chat_rooms,
            RoomKind::Video => &self.video_rooms,
        }
    }

    fn rooms_mut(&mut self, kind: RoomKind) -> &mut Rooms {
        match kind {
            RoomKind::Chat => &mut self.chat_rooms,
            RoomKind::Video => &mut self.video_rooms,
        }
    }

    fn participant(&self, conn: ConnId) -> Option<Participant> {
        self.active_users.get(&conn).map(|user| Participant {
            conn_id: conn,
            user: user.clone(),
        })
    }

    fn participants(&self, members: Option<&BTreeSet<ConnId>>) -> Vec<Participant> {
        members
            .into_iter()
            .flatten()
            .filter_map(|&id| self.participant(id))
            .collect()
    }

    /// Add `conn` to a room. Returns the joiner when this is a new
    /// membership, `None` on a repeat join.
    fn join(
        &mut self,
        conn: ConnId,
        kind: RoomKind,
        room: &RoomId,
    ) -> Result<Option<Participant>, RelayError> {
        let memberships = self.memberships(conn)?;
        let participant = self.participant(conn).ok_or(RelayError::NotIdentified)?;
        if memberships.rooms(kind).contains(room) {
            return Ok(None);
        }
        if memberships.total() >= self.limits.max_rooms_per_connection {
            return Err(RelayError::TooManyRooms(
                self.limits.max_rooms_per_connection,
            ));
        }

        if let Some(memberships) = self.connections.get_mut(&conn) {
            memberships.rooms_mut(kind).insert(room.clone());
        }
        self.rooms_mut(kind)
            .entry(room.clone())
            .or_default()
            .insert(conn);
        Ok(Some(participant))
    }

    fn leave(
        &mut self,
        conn: ConnId,
        kind: RoomKind,
        room: &RoomId,
    ) -> Result<Vec<Delivery>, RelayError> {
        let removed = self
            .connections
            .get_mut(&conn)
            .ok_or(RelayError::UnknownConnection(conn))?
            .rooms_mut(kind)
            .remove(room);
        if !removed {
            return Err(RelayError::NotInRoom {
                kind,
                room: room.clone(),
            });
        }

        let rooms = self.rooms_mut(kind);
        let remaining = match rooms.get_mut(room) {
            Some(members) => {
                members.remove(&conn);
                members.clone()
            }
            None => BTreeSet::new(),
        };
        if remaining.is_empty() {
            rooms.remove(room);
        }

        let user_id = self
            .active_users
            .get(&conn)
            .map(|user| user.user_id.clone())
            .unwrap_or_default();
        Ok(remaining
            .into_iter()
            .map(|to| {
                let event = match kind {
                    RoomKind::Chat => ServerEvent::UserLeft {
                        room_id: room.clone(),
                        conn_id: conn,
                        user_id: user_id.clone(),
                    },
                    RoomKind::Video => ServerEvent::VideoUserLeft {
                        room_id: room.clone(),
                        conn_id: conn,
                    },
                };
                Delivery::new(to, event)
            })
            .collect())
    }

    fn member_participant(
        &self,
        conn: ConnId,
        kind: RoomKind,
        room: &RoomId,
    ) -> Result<Participant, RelayError> {
        if !self.memberships(conn)?.rooms(kind).contains(room) {
            return Err(RelayError::NotInRoom {
                kind,
                room: room.clone(),
            });
        }
        self.participant(conn).ok_or(RelayError::NotIdentified)
    }

    fn fan_out(
        &self,
        kind: RoomKind,
        room: &RoomId,
        skip: Option<ConnId>,
        event: ServerEvent,
    ) -> Vec<Delivery> {
        self.rooms(kind)
            .get(room)
            .into_iter()
            .flatten()
            .filter(|&&id| Some(id) != skip)
            .map(|&id| Delivery::new(id, event.clone()))
            .collect()
    }

    fn broadcast_active_users(&self) -> Vec<Delivery> {
        let users = self.active_users();
        self.connections
            .keys()
            .map(|&to| {
                Delivery::new(
                    to,
                    ServerEvent::ActiveUsers {
                        users: users.clone(),
                    },
                )
            })
            .collect()
    }
}
