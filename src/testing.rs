use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use url::Url;

use crate::client::{
    ChatClient, CreateRoom, Membership, PowerLevelContent, RoomMember, RoomSnapshot,
};
use crate::dialogs::{Dialogs, ErrorDialog};

pub const ROOM: &str = "!room:example.org";
pub const ME: &str = "@me:example.org";

pub fn member(user_id: &str, power_level: i64, membership: Membership) -> RoomMember {
    RoomMember {
        room_id: OwnedRoomId::try_from(ROOM).unwrap(),
        user_id: OwnedUserId::try_from(user_id).unwrap(),
        display_name: None,
        avatar_url: None,
        power_level,
        membership,
    }
}

pub fn room(room_id: &str, members: Vec<RoomMember>, power_levels: Option<PowerLevelContent>) -> RoomSnapshot {
    let room_id = OwnedRoomId::try_from(room_id).unwrap();
    RoomSnapshot {
        members: members
            .into_iter()
            .map(|m| RoomMember {
                room_id: room_id.clone(),
                ..m
            })
            .collect(),
        room_id,
        avatar_url: None,
        power_levels,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Kick(OwnedRoomId, OwnedUserId),
    Ban(OwnedRoomId, OwnedUserId),
    Invite(OwnedRoomId, OwnedUserId),
    SetPowerLevel(OwnedRoomId, OwnedUserId, i64),
    CreateRoom(CreateRoom),
    Leave(OwnedRoomId),
}

pub struct FakeClient {
    user_id: OwnedUserId,
    homeserver: Url,
    pub rooms: Mutex<Vec<RoomSnapshot>>,
    pub calls: Mutex<Vec<Call>>,
    pub failure: Mutex<Option<String>>,
    pub created_room: OwnedRoomId,
}

impl FakeClient {
    pub fn new(rooms: Vec<RoomSnapshot>) -> Self {
        FakeClient {
            user_id: OwnedUserId::try_from(ME).unwrap(),
            homeserver: Url::parse("https://matrix.example.org").unwrap(),
            rooms: Mutex::new(rooms),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            created_room: OwnedRoomId::try_from("!new:example.org").unwrap(),
        }
    }

    pub fn failing(self, message: &str) -> Self {
        *self.failure.lock().unwrap() = Some(message.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_rooms(&self, rooms: Vec<RoomSnapshot>) {
        *self.rooms.lock().unwrap() = rooms;
    }

    fn record(&self, call: Call) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatClient for FakeClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn homeserver_url(&self) -> &Url {
        &self.homeserver
    }

    async fn room(&self, room_id: &RoomId) -> anyhow::Result<Option<RoomSnapshot>> {
        Ok(self
            .rooms
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.room_id == room_id)
            .cloned())
    }

    async fn rooms(&self) -> anyhow::Result<Vec<RoomSnapshot>> {
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn kick(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        self.record(Call::Kick(room_id.to_owned(), user_id.to_owned()))
    }

    async fn ban(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        self.record(Call::Ban(room_id.to_owned(), user_id.to_owned()))
    }

    async fn invite(&self, room_id: &RoomId, user_id: &UserId) -> anyhow::Result<()> {
        self.record(Call::Invite(room_id.to_owned(), user_id.to_owned()))
    }

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
        _current: &PowerLevelContent,
    ) -> anyhow::Result<()> {
        self.record(Call::SetPowerLevel(
            room_id.to_owned(),
            user_id.to_owned(),
            level,
        ))
    }

    async fn create_room(&self, options: CreateRoom) -> anyhow::Result<OwnedRoomId> {
        self.record(Call::CreateRoom(options))?;
        Ok(self.created_room.clone())
    }

    async fn leave(&self, room_id: &RoomId) -> anyhow::Result<()> {
        self.record(Call::Leave(room_id.to_owned()))
    }
}

#[derive(Default)]
pub struct RecordingDialogs {
    pub answer: bool,
    pub errors: Mutex<Vec<ErrorDialog>>,
    pub questions: Mutex<Vec<(String, String)>>,
    /// `true` for each open, `false` for each close.
    pub loader_events: Mutex<Vec<bool>>,
}

impl RecordingDialogs {
    pub fn answering(answer: bool) -> Self {
        RecordingDialogs {
            answer,
            ..Default::default()
        }
    }

    pub fn errors(&self) -> Vec<ErrorDialog> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialogs for RecordingDialogs {
    type Loader = ();

    async fn error(&self, dialog: ErrorDialog) {
        self.errors.lock().unwrap().push(dialog);
    }

    async fn question(&self, title: &str, description: &str) -> bool {
        self.questions
            .lock()
            .unwrap()
            .push((title.to_owned(), description.to_owned()));
        self.answer
    }

    async fn open_loader(&self) -> Self::Loader {
        self.loader_events.lock().unwrap().push(true);
    }

    async fn close_loader(&self, _loader: Self::Loader) {
        self.loader_events.lock().unwrap().push(false);
    }
}
