mod matrix;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use matrix_sdk::ruma::{OwnedMxcUri, OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde::Deserialize;
use url::Url;

pub use matrix::{forward_events, MatrixClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

impl Membership {
    pub fn is_visible(self) -> bool {
        matches!(self, Membership::Join | Membership::Invite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub room_id: OwnedRoomId,
    pub user_id: OwnedUserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<OwnedMxcUri>,
    pub power_level: i64,
    pub membership: Membership,
}

impl RoomMember {
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.user_id.as_str())
    }
}

/// Missing fields take the Matrix protocol defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PowerLevelContent {
    #[serde(default = "default_moderator_level")]
    pub ban: i64,
    #[serde(default = "default_moderator_level")]
    pub kick: i64,
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
    #[serde(default)]
    pub events_default: i64,
    #[serde(default = "default_moderator_level")]
    pub state_default: i64,
    #[serde(default)]
    pub users: BTreeMap<OwnedUserId, i64>,
    #[serde(default)]
    pub users_default: i64,
}

fn default_moderator_level() -> i64 {
    50
}

impl Default for PowerLevelContent {
    fn default() -> Self {
        PowerLevelContent {
            ban: default_moderator_level(),
            kick: default_moderator_level(),
            events: BTreeMap::new(),
            events_default: 0,
            state_default: default_moderator_level(),
            users: BTreeMap::new(),
            users_default: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: OwnedRoomId,
    pub avatar_url: Option<OwnedMxcUri>,
    pub members: Vec<RoomMember>,
    /// `None` when the room has no power level event.
    pub power_levels: Option<PowerLevelContent>,
}

impl RoomSnapshot {
    pub fn member(&self, user_id: &UserId) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn joined_members(&self) -> impl Iterator<Item = &RoomMember> {
        self.members
            .iter()
            .filter(|m| m.membership == Membership::Join)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoom {
    pub invite: Vec<OwnedUserId>,
    pub private_chat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Room { room_id: OwnedRoomId },
    RoomStateMember {
        room_id: OwnedRoomId,
        user_id: OwnedUserId,
    },
    RoomPowerLevels { room_id: OwnedRoomId },
    Presence { user_id: OwnedUserId },
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    fn user_id(&self) -> &UserId;

    fn homeserver_url(&self) -> &Url;

    async fn room(&self, room_id: &RoomId) -> anyhow::Result<Option<RoomSnapshot>>;

    async fn rooms(&self) -> anyhow::Result<Vec<RoomSnapshot>>;

    async fn kick(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()>;

    async fn ban(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()>;

    async fn invite(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()>;

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
        current: &PowerLevelContent,
    ) -> anyhow::Result<()>;

    async fn create_room(&self, options: CreateRoom) -> anyhow::Result<OwnedRoomId>;

    async fn leave(&self, room_id: &RoomId) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: ChatClient + ?Sized> ChatClient for Arc<T> {
    fn user_id(&self) -> &UserId {
        (**self).user_id()
    }

    fn homeserver_url(&self) -> &Url {
        (**self).homeserver_url()
    }

    async fn room(&self, room_id: &RoomId) -> anyhow::Result<Option<RoomSnapshot>> {
        (**self).room(room_id).await
    }

    async fn rooms(&self) -> anyhow::Result<Vec<RoomSnapshot>> {
        (**self).rooms().await
    }

    async fn kick(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        (**self).kick(room_id, user_id).await
    }

    async fn ban(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        (**self).ban(room_id, user_id).await
    }

    async fn invite(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        (**self).invite(room_id, user_id).await
    }

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
        current: &PowerLevelContent,
    ) -> anyhow::Result<()> {
        (**self)
            .set_power_level(room_id, user_id, level, current)
            .await
    }

    async fn create_room(&self, options: CreateRoom) -> anyhow::Result<OwnedRoomId> {
        (**self).create_room(options).await
    }

    async fn leave(&self, room_id: &RoomId) -> anyhow::Result<()> {
        (**self).leave(room_id).await
    }
}
