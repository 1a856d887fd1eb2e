use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId, UserId};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::client::{ChatClient, ClientEvent, RoomMember};
use crate::dialogs::{Dialogs, ErrorDialog};

pub const INITIAL_LOAD_NUM_MEMBERS: usize = 50;
pub const FULL_LOAD_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MemberListOptions {
    #[serde(default = "default_initial_load")]
    pub initial_load: usize,
    #[serde(default = "default_full_load_delay_ms")]
    pub full_load_delay_ms: u64,
}

fn default_initial_load() -> usize {
    INITIAL_LOAD_NUM_MEMBERS
}

fn default_full_load_delay_ms() -> u64 {
    FULL_LOAD_DELAY_MS
}

impl Default for MemberListOptions {
    fn default() -> Self {
        MemberListOptions {
            initial_load: INITIAL_LOAD_NUM_MEMBERS,
            full_load_delay_ms: FULL_LOAD_DELAY_MS,
        }
    }
}

impl MemberListOptions {
    pub fn full_load_delay(&self) -> Duration {
        Duration::from_millis(self.full_load_delay_ms)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("Malformed user ID. Should look like '@localpart:domain'")]
    MalformedUserId,
}

pub fn parse_invitee(input: &str) -> Result<OwnedUserId, InviteError> {
    let input = input.trim();
    if !input.starts_with('@') || !input.contains(':') {
        return Err(InviteError::MalformedUserId);
    }
    UserId::parse(input).map_err(|_| InviteError::MalformedUserId)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRow {
    pub member: RoomMember,
    pub last_presence: Option<Instant>,
}

pub type MemberSort = Box<dyn Fn(&RoomMember, &RoomMember) -> Ordering + Send + Sync>;

pub fn by_power_level(a: &RoomMember, b: &RoomMember) -> Ordering {
    b.power_level
        .cmp(&a.power_level)
        .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

pub struct MemberList<C, D> {
    client: C,
    dialogs: D,
    room_id: Option<OwnedRoomId>,
    options: MemberListOptions,
    sort: Option<MemberSort>,
    member_dict: Vec<RoomMember>,
    last_presence: HashMap<OwnedUserId, Instant>,
    members: Vec<OwnedUserId>,
}

impl<C, D> MemberList<C, D>
where
    C: ChatClient,
    D: Dialogs,
{
    pub fn new(
        client: C,
        dialogs: D,
        room_id: Option<OwnedRoomId>,
        options: MemberListOptions,
    ) -> Self {
        MemberList {
            client,
            dialogs,
            room_id,
            options,
            sort: None,
            member_dict: Vec::new(),
            last_presence: HashMap::new(),
            members: Vec::new(),
        }
    }

    pub fn with_sort(
        mut self,
        sort: impl Fn(&RoomMember, &RoomMember) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.sort = Some(Box::new(sort));
        self
    }

    pub fn members(&self) -> &[OwnedUserId] {
        &self.members
    }

    pub fn member(&self, user_id: &UserId) -> Option<&RoomMember> {
        self.member_dict.iter().find(|m| m.user_id == user_id)
    }

    pub fn rows(&self) -> Vec<MemberRow> {
        self.members()
            .iter()
            .filter_map(|user_id| {
                let member = self.member(user_id)?;
                Some(MemberRow {
                    member: member.clone(),
                    last_presence: self.last_presence.get(user_id).copied(),
                })
            })
            .collect()
    }

    pub async fn load_initial(&mut self) {
        self.member_dict = self.fetch_member_dict().await;
        self.members = self.room_members(Some(self.options.initial_load));
    }

    pub fn load_all(&mut self) {
        self.members = self.room_members(None);
    }

    pub async fn update_list(&mut self) {
        self.member_dict = self.fetch_member_dict().await;
        self.members = self.room_members(None);
    }

    /// Returns whether the visible list was rebuilt.
    pub async fn handle_event(&mut self, event: &ClientEvent) -> bool {
        match event {
            // Accepting an invite only fills in the room's state some time
            // later, so wait for the room itself before refreshing.
            ClientEvent::Room { room_id } => {
                if self.room_id.as_ref() != Some(room_id) {
                    return false;
                }
            }
            ClientEvent::RoomStateMember { .. } => {}
            ClientEvent::Presence { user_id } => {
                if self.member(user_id).is_none() {
                    return false;
                }
                self.last_presence.insert(user_id.clone(), Instant::now());
                if !self.members.contains(user_id) {
                    return false;
                }
            }
            ClientEvent::RoomPowerLevels { .. } => return false,
        }
        self.update_list().await;
        true
    }

    pub fn room_members(&self, limit: Option<usize>) -> Vec<OwnedUserId> {
        let mut all_members: Vec<&RoomMember> = self.member_dict.iter().collect();
        if let Some(sort) = &self.sort {
            all_members.sort_by(|a, b| sort(a, b));
        }
        all_members
            .into_iter()
            .filter(|m| m.membership.is_visible())
            .take(limit.unwrap_or(usize::MAX))
            .map(|m| m.user_id.clone())
            .collect()
    }

    pub async fn invite(&mut self, input: &str) {
        let user_id = match parse_invitee(input) {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::error!("Bad user ID to invite: {}", input.trim());
                self.dialogs
                    .error(ErrorDialog::new("Invite Error", e.to_string()))
                    .await;
                return;
            }
        };
        let Some(room_id) = self.room_id.clone() else {
            return;
        };
        tracing::info!("Invite {user_id} to {room_id}");
        match self.client.invite(&room_id, &user_id).await {
            Ok(()) => tracing::info!("Invited {user_id}"),
            Err(e) => {
                tracing::error!("Failed to invite: {e:#}");
                self.dialogs
                    .error(ErrorDialog::new(
                        "Server error whilst inviting",
                        format!("{e:#}"),
                    ))
                    .await;
            }
        }
    }

    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<ClientEvent>,
        output: watch::Sender<Vec<MemberRow>>,
    ) {
        self.load_initial().await;
        if output.send(self.rows()).is_err() {
            return;
        }
        let full_load = tokio::time::sleep(self.options.full_load_delay());
        tokio::pin!(full_load);
        let mut fully_loaded = false;
        loop {
            let changed = tokio::select! {
                _ = &mut full_load, if !fully_loaded => {
                    fully_loaded = true;
                    self.load_all();
                    true
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Member list missed {missed} events, reloading");
                        self.update_list().await;
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if changed && output.send(self.rows()).is_err() {
                break;
            }
        }
        tracing::debug!("Member list for {:?} stopped", self.room_id);
    }

    async fn fetch_member_dict(&mut self) -> Vec<RoomMember> {
        let members = self.fetch_members().await;
        {
            let present: HashSet<&OwnedUserId> = members.iter().map(|m| &m.user_id).collect();
            self.last_presence
                .retain(|user_id, _| present.contains(user_id));
        }
        let now = Instant::now();
        for member in &members {
            self.last_presence
                .entry(member.user_id.clone())
                .or_insert(now);
        }
        members
    }

    async fn fetch_members(&self) -> Vec<RoomMember> {
        let Some(room_id) = self.room_id.as_ref() else {
            return Vec::new();
        };
        match self.client.room(room_id).await {
            Ok(Some(room)) => room.members,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Error getting room {room_id}: {e:#}");
                Vec::new()
            }
        }
    }
}
