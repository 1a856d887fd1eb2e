use std::sync::Arc;

use async_trait::async_trait;
use matrix_sdk::ruma::OwnedRoomId;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDialog {
    pub title: String,
    pub description: String,
}

impl ErrorDialog {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        ErrorDialog {
            title: title.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait Dialogs: Send + Sync {
    type Loader: Send;

    async fn error(&self, dialog: ErrorDialog);

    /// Returns whether the user agreed.
    async fn question(&self, title: &str, description: &str) -> bool;

    async fn open_loader(&self) -> Self::Loader;

    async fn close_loader(&self, loader: Self::Loader);
}

#[async_trait]
impl<T: Dialogs> Dialogs for Arc<T> {
    type Loader = T::Loader;

    async fn error(&self, dialog: ErrorDialog) {
        (**self).error(dialog).await
    }

    async fn question(&self, title: &str, description: &str) -> bool {
        (**self).question(title, description).await
    }

    async fn open_loader(&self) -> Self::Loader {
        (**self).open_loader().await
    }

    async fn close_loader(&self, loader: Self::Loader) {
        (**self).close_loader(loader).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ViewRoom { room_id: OwnedRoomId },
    ViewNextRoom,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Action>,
}

impl Dispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher { tx }, rx)
    }

    pub fn dispatch(&self, action: Action) {
        tracing::debug!("Dispatching {action:?}");
        if self.tx.send(action).is_err() {
            tracing::warn!("Dispatched action with nobody listening");
        }
    }
}
