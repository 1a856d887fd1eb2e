use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use matrix_sdk::ruma::events::reaction::ReactionEventContent;
use matrix_sdk::ruma::events::relation::Annotation;
use matrix_sdk::ruma::events::room::message::RoomMessageEventContent;
use matrix_sdk::ruma::OwnedEventId;
use matrix_sdk::Room;
use tokio::sync::mpsc;

use crate::dialogs::{Action, Dialogs, ErrorDialog};

/// At most one ⏳ per command, however many loaders get opened for it.
#[derive(Clone, Default)]
struct PendingReaction(Arc<AtomicBool>);

impl PendingReaction {
    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct RoomDialogs {
    room: Room,
    cmd_event_id: OwnedEventId,
    confirmed: bool,
    failed: Arc<AtomicBool>,
    pending: PendingReaction,
}

impl RoomDialogs {
    pub fn new(room: Room, cmd_event_id: OwnedEventId) -> Self {
        RoomDialogs {
            room,
            cmd_event_id,
            confirmed: false,
            failed: Arc::new(AtomicBool::new(false)),
            pending: PendingReaction::default(),
        }
    }

    pub fn confirmed(&self, confirmed: bool) -> Self {
        RoomDialogs {
            confirmed,
            ..self.clone()
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub async fn react(&self, key: &str) {
        let content =
            ReactionEventContent::new(Annotation::new(self.cmd_event_id.clone(), key.to_owned()));
        if let Err(e) = self.room.send(content).await {
            tracing::error!("Error sending {key} reaction: {e}");
        }
    }

    pub async fn notice(&self, markdown: String) {
        let content = RoomMessageEventContent::notice_markdown(markdown);
        if let Err(e) = self.room.send(content).await {
            tracing::error!("Error sending notice: {e}");
        }
    }

    pub async fn report_actions(&self, actions: &mut mpsc::UnboundedReceiver<Action>) -> usize {
        let mut count = 0;
        while let Ok(action) = actions.try_recv() {
            count += 1;
            let msg = match action {
                Action::ViewRoom { room_id } => {
                    format!("Your room: https://matrix.to/#/{room_id}")
                }
                Action::ViewNextRoom => "Left the room".to_owned(),
            };
            self.notice(msg).await;
        }
        count
    }
}

#[async_trait]
impl Dialogs for RoomDialogs {
    type Loader = Option<OwnedEventId>;

    async fn error(&self, dialog: ErrorDialog) {
        self.failed.store(true, Ordering::SeqCst);
        self.notice(format!("**{}**\n\n{}", dialog.title, dialog.description))
            .await;
    }

    async fn question(&self, title: &str, description: &str) -> bool {
        if self.confirmed {
            return true;
        }
        self.notice(format!(
            "**{title}**\n\n{description}\n\nRepeat the command with `confirm` at the end to go ahead."
        ))
        .await;
        false
    }

    async fn open_loader(&self) -> Self::Loader {
        if !self.pending.claim() {
            return None;
        }
        let content =
            ReactionEventContent::new(Annotation::new(self.cmd_event_id.clone(), "⏳".to_owned()));
        match self.room.send(content).await {
            Ok(resp) => Some(resp.event_id),
            Err(e) => {
                tracing::warn!("Error setting pending reaction: {e:?}");
                self.pending.release();
                None
            }
        }
    }

    async fn close_loader(&self, loader: Self::Loader) {
        if let Some(reaction_event_id) = loader {
            if let Err(e) = self.room.redact(&reaction_event_id, None, None).await {
                tracing::warn!("Error redacting pending reaction: {e:?}");
            }
            self.pending.release();
        }
    }
}
