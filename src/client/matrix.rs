use anyhow::{anyhow, Context};
use async_trait::async_trait;
use matrix_sdk::deserialized_responses::RawSyncOrStrippedState;
use matrix_sdk::media::{MediaFormat, MediaRequest, MediaThumbnailSize};
use matrix_sdk::ruma::api::client::media::get_content_thumbnail::v3::Method;
use matrix_sdk::ruma::api::client::room::create_room::v3::{
    Request as CreateRoomRequest, RoomPreset,
};
use matrix_sdk::ruma::events::presence::PresenceEvent;
use matrix_sdk::ruma::events::room::member::{
    MembershipState, StrippedRoomMemberEvent, SyncRoomMemberEvent,
};
use matrix_sdk::ruma::events::room::power_levels::{
    RoomPowerLevelsEventContent, SyncRoomPowerLevelsEvent,
};
use matrix_sdk::ruma::events::room::MediaSource;
use matrix_sdk::ruma::{Int, MxcUri, OwnedRoomId, OwnedUserId, RoomId, UInt, UserId};
use matrix_sdk::{Client, Room, RoomMemberships};
use tokio::sync::broadcast;
use url::Url;

use crate::avatar::{ThumbnailMethod, ThumbnailSpec};

use super::{
    ChatClient, ClientEvent, CreateRoom, Membership, PowerLevelContent, RoomMember, RoomSnapshot,
};

#[derive(Clone)]
pub struct MatrixClient {
    inner: Client,
    user_id: OwnedUserId,
    homeserver: Url,
}

impl MatrixClient {
    pub fn new(inner: Client, homeserver: Url) -> anyhow::Result<Self> {
        let user_id = inner
            .user_id()
            .ok_or_else(|| anyhow!("Client is not logged in"))?
            .to_owned();
        Ok(MatrixClient {
            inner,
            user_id,
            homeserver,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub async fn load_thumbnail(
        &self,
        mxc: &MxcUri,
        spec: &ThumbnailSpec,
    ) -> anyhow::Result<Vec<u8>> {
        let method = match spec.method {
            ThumbnailMethod::Crop => Method::Crop,
            ThumbnailMethod::Scale => Method::Scale,
        };
        let request = MediaRequest {
            source: MediaSource::Plain(mxc.to_owned()),
            format: MediaFormat::Thumbnail(MediaThumbnailSize {
                method,
                width: UInt::from(spec.width),
                height: UInt::from(spec.height),
            }),
        };
        self.inner
            .media()
            .get_media_content(&request, true)
            .await
            .with_context(|| anyhow!("Error loading thumbnail of {mxc}"))
    }

    fn get_room(&self, room_id: &RoomId) -> anyhow::Result<Room> {
        self.inner
            .get_room(room_id)
            .ok_or_else(|| anyhow!("Unknown room {room_id}"))
    }

    async fn snapshot(&self, room: &Room) -> anyhow::Result<RoomSnapshot> {
        let room_id = room.room_id().to_owned();
        let members = room
            .members(RoomMemberships::empty())
            .await
            .with_context(|| anyhow!("Error getting members of {room_id}"))?
            .into_iter()
            .map(|member| RoomMember {
                room_id: room_id.clone(),
                user_id: member.user_id().to_owned(),
                display_name: member.display_name().map(ToOwned::to_owned),
                avatar_url: member.avatar_url().map(ToOwned::to_owned),
                power_level: member.power_level(),
                membership: membership(member.membership()),
            })
            .collect();
        let power_levels: Option<PowerLevelContent> = match room
            .get_state_event_static::<RoomPowerLevelsEventContent>()
            .await
            .with_context(|| anyhow!("Error getting power levels of {room_id}"))?
        {
            Some(RawSyncOrStrippedState::Sync(raw)) => raw.get_field("content")?,
            Some(RawSyncOrStrippedState::Stripped(raw)) => raw.get_field("content")?,
            None => None,
        };
        Ok(RoomSnapshot {
            avatar_url: room.avatar_url(),
            room_id,
            members,
            power_levels,
        })
    }
}

fn membership(state: &MembershipState) -> Membership {
    match state {
        MembershipState::Join => Membership::Join,
        MembershipState::Invite => Membership::Invite,
        MembershipState::Ban => Membership::Ban,
        MembershipState::Knock => Membership::Knock,
        _ => Membership::Leave,
    }
}

#[async_trait]
impl ChatClient for MatrixClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn homeserver_url(&self) -> &Url {
        &self.homeserver
    }

    async fn room(&self, room_id: &RoomId) -> anyhow::Result<Option<RoomSnapshot>> {
        match self.inner.get_room(room_id) {
            Some(room) => Ok(Some(self.snapshot(&room).await?)),
            None => Ok(None),
        }
    }

    async fn rooms(&self) -> anyhow::Result<Vec<RoomSnapshot>> {
        let mut snapshots = Vec::new();
        for room in self.inner.rooms() {
            match self.snapshot(&room).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::warn!("Skipping room {}: {e:#}", room.room_id()),
            }
        }
        Ok(snapshots)
    }

    async fn kick(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        self.get_room(room_id)?.kick_user(user_id, None).await?;
        Ok(())
    }

    async fn ban(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        self.get_room(room_id)?.ban_user(user_id, None).await?;
        Ok(())
    }

    async fn invite(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        self.get_room(room_id)?.invite_user_by_id(user_id).await?;
        Ok(())
    }

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
        _current: &PowerLevelContent,
    ) -> anyhow::Result<()> {
        let level = Int::new(level).ok_or_else(|| anyhow!("Power level {level} out of range"))?;
        self.get_room(room_id)?
            .update_power_levels(vec![(user_id, level)])
            .await?;
        Ok(())
    }

    async fn create_room(&self, options: CreateRoom) -> anyhow::Result<OwnedRoomId> {
        let mut request = CreateRoomRequest::new();
        request.invite = options.invite;
        if options.private_chat {
            request.preset = Some(RoomPreset::PrivateChat);
        }
        let room = self.inner.create_room(request).await?;
        Ok(room.room_id().to_owned())
    }

    async fn leave(&self, room_id: &RoomId) -> anyhow::Result<()> {
        self.get_room(room_id)?.leave().await?;
        Ok(())
    }
}

pub fn forward_events(client: &Client, sender: broadcast::Sender<ClientEvent>) {
    let own_user = client.user_id().map(ToOwned::to_owned);
    let tx = sender.clone();
    client.add_event_handler(move |ev: SyncRoomMemberEvent, room: Room| {
        let tx = tx.clone();
        let own_user = own_user.clone();
        async move {
            let room_id = room.room_id().to_owned();
            let user_id = ev.state_key().to_owned();
            if Some(&user_id) == own_user.as_ref()
                && *ev.membership() == MembershipState::Join
            {
                let _ = tx.send(ClientEvent::Room {
                    room_id: room_id.clone(),
                });
            }
            let _ = tx.send(ClientEvent::RoomStateMember { room_id, user_id });
        }
    });
    let tx = sender.clone();
    client.add_event_handler(move |_: StrippedRoomMemberEvent, room: Room| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(ClientEvent::Room {
                room_id: room.room_id().to_owned(),
            });
        }
    });
    let tx = sender.clone();
    client.add_event_handler(move |_: SyncRoomPowerLevelsEvent, room: Room| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(ClientEvent::RoomPowerLevels {
                room_id: room.room_id().to_owned(),
            });
        }
    });
    client.add_event_handler(move |ev: PresenceEvent| {
        let tx = sender.clone();
        async move {
            tracing::trace!("Presence update for {}", ev.sender);
            let _ = tx.send(ClientEvent::Presence { user_id: ev.sender });
        }
    });
}
