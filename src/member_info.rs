use matrix_sdk::ruma::OwnedRoomId;
use tokio::sync::{broadcast, watch};

use crate::client::{ChatClient, ClientEvent, CreateRoom, RoomMember, RoomSnapshot};
use crate::dialogs::{Action, Dialogs, Dispatcher, ErrorDialog};
use crate::power_levels::{self, Capabilities};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfoState {
    pub can: Capabilities,
    pub muted: bool,
    pub is_target_mod: bool,
    pub creating_room: bool,
}

pub struct MemberInfo<'a, C: ?Sized, D> {
    client: &'a C,
    dialogs: &'a D,
    dispatcher: Dispatcher,
    member: RoomMember,
    state: MemberInfoState,
}

impl<'a, C, D> MemberInfo<'a, C, D>
where
    C: ChatClient + ?Sized,
    D: Dialogs,
{
    pub async fn new(
        client: &'a C,
        dialogs: &'a D,
        dispatcher: Dispatcher,
        member: RoomMember,
    ) -> MemberInfo<'a, C, D> {
        let mut info = MemberInfo {
            client,
            dialogs,
            dispatcher,
            member,
            state: MemberInfoState::default(),
        };
        info.refresh().await;
        info
    }

    pub fn state(&self) -> &MemberInfoState {
        &self.state
    }

    pub fn member(&self) -> &RoomMember {
        &self.member
    }

    /// Returns whether the member or the state changed.
    pub async fn handle_event(&mut self, event: &ClientEvent) -> bool {
        match event {
            ClientEvent::RoomStateMember { room_id, .. } | ClientEvent::RoomPowerLevels { room_id }
                if *room_id == self.member.room_id =>
            {
                let before = (self.member.clone(), self.state);
                self.refresh().await;
                before != (self.member.clone(), self.state)
            }
            _ => false,
        }
    }

    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<ClientEvent>,
        output: watch::Sender<(RoomMember, MemberInfoState)>,
    ) {
        if output.send((self.member.clone(), self.state)).is_err() {
            return;
        }
        loop {
            let changed = match events.recv().await {
                Ok(event) => self.handle_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Member info missed {missed} events, refreshing");
                    self.refresh().await;
                    true
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if changed && output.send((self.member.clone(), self.state)).is_err() {
                break;
            }
        }
        tracing::debug!(
            "Member info for {} in {} stopped",
            self.member.user_id,
            self.member.room_id
        );
    }

    pub async fn refresh(&mut self) {
        let creating_room = self.state.creating_room;
        self.state = MemberInfoState {
            creating_room,
            ..Default::default()
        };
        let Some(room) = self.room().await else {
            return;
        };
        if let Some(target) = room.member(&self.member.user_id) {
            self.member = target.clone();
        }
        let Some(content) = room.power_levels.as_ref() else {
            return;
        };
        let me = room
            .member(self.client.user_id())
            .map_or(0, |me| me.power_level);
        let them = self.member.power_level;
        self.state.can = power_levels::calculate_can_permissions(me, them, content);
        self.state.muted = power_levels::is_muted(them, content);
        self.state.is_target_mod = power_levels::is_moderator(them, content);
    }

    pub async fn kick(&self) {
        let res = self
            .client
            .kick(&self.member.room_id, &self.member.user_id)
            .await;
        self.report("Kick", "Kick error", res).await;
    }

    pub async fn ban(&self) {
        let res = self
            .client
            .ban(&self.member.room_id, &self.member.user_id)
            .await;
        self.report("Ban", "Ban error", res).await;
    }

    pub async fn toggle_mute(&self) {
        let Some(room) = self.room().await else {
            return;
        };
        let Some(content) = room.power_levels.as_ref() else {
            return;
        };
        let level_to_send = power_levels::level_to_send(content);
        let level = if self.state.muted {
            level_to_send
        } else {
            level_to_send - 1
        };
        let res = self
            .client
            .set_power_level(&self.member.room_id, &self.member.user_id, level, content)
            .await;
        self.report("Mute toggle", "Mute error", res).await;
    }

    pub async fn toggle_mod(&self) {
        let Some(room) = self.room().await else {
            return;
        };
        let Some(content) = room.power_levels.as_ref() else {
            return;
        };
        let Some(me) = room.member(self.client.user_id()) else {
            return;
        };
        let level = if self.state.is_target_mod {
            content.users_default
        } else {
            me.power_level - 1
        };
        let res = self
            .client
            .set_power_level(&self.member.room_id, &self.member.user_id, level, content)
            .await;
        self.report("Mod toggle", "Mod error", res).await;
    }

    pub async fn start_chat(&mut self) {
        if let Some(room_id) = self.find_direct_room().await {
            self.dispatcher.dispatch(Action::ViewRoom { room_id });
            return;
        }
        self.state.creating_room = true;
        let res = self
            .client
            .create_room(CreateRoom {
                invite: vec![self.member.user_id.clone()],
                private_chat: true,
            })
            .await;
        self.state.creating_room = false;
        match res {
            Ok(room_id) => self.dispatcher.dispatch(Action::ViewRoom { room_id }),
            Err(e) => tracing::error!("Failed to create room: {e:#}"),
        }
    }

    pub async fn leave(&self) {
        if !self
            .dialogs
            .question("Leave room", "Are you sure you want to leave the room?")
            .await
        {
            return;
        }
        let loader = self.dialogs.open_loader().await;
        let res = self.client.leave(&self.member.room_id).await;
        self.dialogs.close_loader(loader).await;
        match res {
            Ok(()) => self.dispatcher.dispatch(Action::ViewNextRoom),
            Err(e) => {
                self.dialogs
                    .error(ErrorDialog::new("Failed to leave room", format!("{e:#}")))
                    .await
            }
        }
    }

    async fn find_direct_room(&self) -> Option<OwnedRoomId> {
        let me = self.client.user_id();
        let target = &self.member.user_id;
        let rooms = match self.client.rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::warn!("Error listing rooms: {e:#}");
                return None;
            }
        };
        rooms
            .into_iter()
            .find(|room| {
                let joined: Vec<_> = room.joined_members().collect();
                joined.len() == 2
                    && joined
                        .iter()
                        .all(|m| m.user_id == *target || m.user_id == me)
            })
            .map(|room| room.room_id)
    }

    async fn room(&self) -> Option<RoomSnapshot> {
        match self.client.room(&self.member.room_id).await {
            Ok(room) => room,
            Err(e) => {
                tracing::warn!("Error getting room {}: {e:#}", self.member.room_id);
                None
            }
        }
    }

    async fn report(&self, what: &str, title: &str, res: anyhow::Result<()>) {
        match res {
            Ok(()) => tracing::info!(
                "{what} success for {} in {}",
                self.member.user_id,
                self.member.room_id
            ),
            Err(e) => {
                tracing::error!("{what} failed: {e:#}");
                self.dialogs
                    .error(ErrorDialog::new(title, format!("{e:#}")))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use matrix_sdk::ruma::{room_id, user_id};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::client::{Membership, PowerLevelContent};
    use crate::testing::{member, room, Call, FakeClient, RecordingDialogs, ME, ROOM};

    fn levels() -> PowerLevelContent {
        PowerLevelContent {
            kick: 50,
            ban: 50,
            events_default: 0,
            state_default: 50,
            ..Default::default()
        }
    }

    fn client(me: i64, them: i64, content: Option<PowerLevelContent>) -> FakeClient {
        FakeClient::new(vec![room(
            ROOM,
            vec![
                member(ME, me, Membership::Join),
                member("@them:example.org", them, Membership::Join),
            ],
            content,
        )])
    }

    fn target(power_level: i64) -> RoomMember {
        member("@them:example.org", power_level, Membership::Join)
    }

    #[tokio::test]
    async fn computes_capabilities_on_creation() {
        let client = client(50, 30, Some(levels()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(30)).await;
        assert_eq!(
            info.state().can,
            Capabilities {
                kick: true,
                ban: true,
                mute: true,
                modify_level: true,
            }
        );
        assert!(!info.state().muted);
        assert!(info.state().is_target_mod);
    }

    #[tokio::test]
    async fn weaker_user_gets_nothing() {
        let client = client(30, 50, Some(levels()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(50)).await;
        assert_eq!(info.state().can, Capabilities::default());
    }

    #[tokio::test]
    async fn missing_room_or_power_levels_gives_default_state() {
        let client = client(100, 0, None);
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher.clone(), target(0)).await;
        assert_eq!(*info.state(), MemberInfoState::default());

        let mut elsewhere = target(0);
        elsewhere.room_id = room_id!("!gone:example.org").to_owned();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, elsewhere).await;
        assert_eq!(*info.state(), MemberInfoState::default());
    }

    #[tokio::test]
    async fn kick_failure_shows_dialog() {
        let client = client(50, 0, Some(levels())).failing("Forbidden");
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.kick().await;
        info.ban().await;
        assert_eq!(
            dialogs.errors(),
            vec![
                ErrorDialog::new("Kick error", "Forbidden"),
                ErrorDialog::new("Ban error", "Forbidden"),
            ]
        );
    }

    #[tokio::test]
    async fn kick_success_leaves_state_alone() {
        let client = client(50, 0, Some(levels()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        let before = *info.state();
        info.kick().await;
        assert_eq!(*info.state(), before);
        assert!(dialogs.errors().is_empty());
        assert_eq!(
            client.calls(),
            vec![Call::Kick(
                room_id!("!room:example.org").to_owned(),
                user_id!("@them:example.org").to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn mute_drops_below_message_level_and_unmute_restores_it() {
        let mut content = levels();
        content.events.insert("m.room.message".to_owned(), 10);
        let client = client(50, 10, Some(content.clone()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let mut info = MemberInfo::new(&client, &dialogs, dispatcher, target(10)).await;
        assert!(!info.state().muted);
        info.toggle_mute().await;

        client.set_rooms(vec![room(
            ROOM,
            vec![
                member(ME, 50, Membership::Join),
                member("@them:example.org", 9, Membership::Join),
            ],
            Some(content),
        )]);
        info.handle_event(&ClientEvent::RoomPowerLevels {
            room_id: room_id!("!room:example.org").to_owned(),
        })
        .await;
        assert!(info.state().muted);
        info.toggle_mute().await;

        let levels: Vec<_> = client
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetPowerLevel(_, _, level) => Some(level),
                _ => None,
            })
            .collect();
        assert_eq!(levels, vec![9, 10]);
    }

    #[tokio::test]
    async fn mute_without_power_levels_is_a_no_op() {
        let client = client(50, 0, None);
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.toggle_mute().await;
        info.toggle_mod().await;
        assert!(client.calls().is_empty());
        assert!(dialogs.errors().is_empty());
    }

    #[tokio::test]
    async fn mod_toggle_promotes_below_me_and_demotes_to_default() {
        let mut content = levels();
        content.users_default = 5;
        let client = client(80, 5, Some(content.clone()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let mut info = MemberInfo::new(&client, &dialogs, dispatcher, target(5)).await;
        assert!(!info.state().is_target_mod);
        info.toggle_mod().await;

        client.set_rooms(vec![room(
            ROOM,
            vec![
                member(ME, 80, Membership::Join),
                member("@them:example.org", 79, Membership::Join),
            ],
            Some(content),
        )]);
        info.handle_event(&ClientEvent::RoomStateMember {
            room_id: room_id!("!room:example.org").to_owned(),
            user_id: user_id!("@them:example.org").to_owned(),
        })
        .await;
        assert!(info.state().is_target_mod);
        assert_eq!(info.member().power_level, 79);
        info.toggle_mod().await;

        let levels: Vec<_> = client
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetPowerLevel(_, _, level) => Some(level),
                _ => None,
            })
            .collect();
        assert_eq!(levels, vec![79, 5]);
    }

    #[tokio::test]
    async fn mod_toggle_failure_shows_dialog() {
        let client = client(80, 0, Some(levels())).failing("nope");
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.toggle_mod().await;
        assert_eq!(dialogs.errors(), vec![ErrorDialog::new("Mod error", "nope")]);
    }

    #[tokio::test]
    async fn events_for_other_rooms_are_ignored() {
        let client = client(50, 30, Some(levels()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let mut info = MemberInfo::new(&client, &dialogs, dispatcher, target(30)).await;
        client.set_rooms(Vec::new());
        assert!(
            !info
                .handle_event(&ClientEvent::RoomPowerLevels {
                    room_id: room_id!("!other:example.org").to_owned(),
                })
                .await
        );
        assert!(info.state().can.kick);
    }

    #[tokio::test]
    async fn run_publishes_changes_until_events_stop() {
        let client = client(50, 30, Some(levels()));
        let dialogs = RecordingDialogs::default();
        let (dispatcher, _rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(30)).await;
        let (events_tx, events_rx) = broadcast::channel(16);
        let (output_tx, mut output_rx) = watch::channel((target(0), MemberInfoState::default()));
        let fake = &client;
        let driver = async move {
            output_rx.changed().await.unwrap();
            assert!(output_rx.borrow_and_update().1.can.kick);

            events_tx
                .send(ClientEvent::RoomPowerLevels {
                    room_id: room_id!("!other:example.org").to_owned(),
                })
                .unwrap();
            fake.set_rooms(vec![room(
                ROOM,
                vec![
                    member(ME, 50, Membership::Join),
                    member("@them:example.org", 60, Membership::Join),
                ],
                Some(levels()),
            )]);
            events_tx
                .send(ClientEvent::RoomPowerLevels {
                    room_id: room_id!("!room:example.org").to_owned(),
                })
                .unwrap();
            output_rx.changed().await.unwrap();
            let (member, state) = output_rx.borrow_and_update().clone();
            assert_eq!(member.power_level, 60);
            assert!(!state.can.kick);
            drop(events_tx);
        };
        tokio::join!(info.run(events_rx, output_tx), driver);
    }

    #[tokio::test]
    async fn start_chat_reuses_existing_direct_room() {
        let client = FakeClient::new(vec![
            room(
                ROOM,
                vec![
                    member(ME, 50, Membership::Join),
                    member("@them:example.org", 0, Membership::Join),
                    member("@third:example.org", 0, Membership::Join),
                ],
                Some(levels()),
            ),
            room(
                "!dm:example.org",
                vec![
                    member("@them:example.org", 0, Membership::Join),
                    member(ME, 0, Membership::Join),
                    member("@gone:example.org", 0, Membership::Leave),
                ],
                None,
            ),
        ]);
        let dialogs = RecordingDialogs::default();
        let (dispatcher, mut rx) = Dispatcher::new();
        let mut info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.start_chat().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            Action::ViewRoom {
                room_id: room_id!("!dm:example.org").to_owned()
            }
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn start_chat_creates_private_room() {
        let client = FakeClient::new(vec![room(
            ROOM,
            vec![
                member(ME, 50, Membership::Join),
                member("@them:example.org", 0, Membership::Join),
                member("@third:example.org", 0, Membership::Join),
            ],
            Some(levels()),
        )]);
        let dialogs = RecordingDialogs::default();
        let (dispatcher, mut rx) = Dispatcher::new();
        let mut info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.start_chat().await;
        assert!(!info.state().creating_room);
        assert_eq!(
            client.calls(),
            vec![Call::CreateRoom(CreateRoom {
                invite: vec![user_id!("@them:example.org").to_owned()],
                private_chat: true,
            })]
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Action::ViewRoom {
                room_id: room_id!("!new:example.org").to_owned()
            }
        );
    }

    #[tokio::test]
    async fn failed_room_creation_is_only_logged() {
        let client = FakeClient::new(Vec::new()).failing("server down");
        let dialogs = RecordingDialogs::default();
        let (dispatcher, mut rx) = Dispatcher::new();
        let mut info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.start_chat().await;
        assert!(!info.state().creating_room);
        assert!(rx.try_recv().is_err());
        assert!(dialogs.errors().is_empty());
    }

    #[tokio::test]
    async fn leave_asks_first() {
        let client = client(50, 0, Some(levels()));
        let dialogs = RecordingDialogs::answering(false);
        let (dispatcher, mut rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.leave().await;
        assert!(client.calls().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(dialogs.questions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirmed_leave_views_next_room() {
        let client = client(50, 0, Some(levels()));
        let dialogs = RecordingDialogs::answering(true);
        let (dispatcher, mut rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.leave().await;
        assert_eq!(
            client.calls(),
            vec![Call::Leave(room_id!("!room:example.org").to_owned())]
        );
        assert_eq!(*dialogs.loader_events.lock().unwrap(), vec![true, false]);
        assert_eq!(rx.try_recv().unwrap(), Action::ViewNextRoom);
    }

    #[tokio::test]
    async fn failed_leave_closes_loader_and_shows_dialog() {
        let client = client(50, 0, Some(levels())).failing("not joined");
        let dialogs = RecordingDialogs::answering(true);
        let (dispatcher, mut rx) = Dispatcher::new();
        let info = MemberInfo::new(&client, &dialogs, dispatcher, target(0)).await;
        info.leave().await;
        assert_eq!(*dialogs.loader_events.lock().unwrap(), vec![true, false]);
        assert_eq!(
            dialogs.errors(),
            vec![ErrorDialog::new("Failed to leave room", "not joined")]
        );
        assert!(rx.try_recv().is_err());
    }
}
