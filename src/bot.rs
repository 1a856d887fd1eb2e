mod commands;
mod dialogs;
mod parser;
mod watches;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context};
use matrix_sdk::config::SyncSettings;
use matrix_sdk::matrix_auth::MatrixSession;
use matrix_sdk::ruma::events::room::member::StrippedRoomMemberEvent;
use matrix_sdk::{Client, Room, RoomState};
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::client::{forward_events, ClientEvent, MatrixClient};
use crate::config::CONFIG;
use watches::Watches;

pub static STARTED: AtomicBool = AtomicBool::new(false);

const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct BotContext {
    pub client: MatrixClient,
    pub events: broadcast::Sender<ClientEvent>,
    pub watches: Watches,
}

#[tokio::main]
pub async fn run() -> anyhow::Result<()> {
    let client = create_client().await?;
    init(client).await
}

pub async fn create_client() -> anyhow::Result<Client> {
    async fn client() -> anyhow::Result<Client> {
        Client::builder()
            .homeserver_url(CONFIG.bot.homeserver_url()?)
            .sqlite_store(&CONFIG.bot.state_store, None)
            .build()
            .await
            .context("Error setting up client")
    }

    let session_file_path = CONFIG.bot.session_file_path();
    if session_file_path.exists() {
        let session_json = tokio::fs::read(&session_file_path).await.with_context(|| {
            anyhow!("Error reading session file {}", session_file_path.display())
        })?;
        let session: MatrixSession = serde_json::from_slice(&session_json).with_context(|| {
            anyhow!(
                "Session file {} is not a valid session object",
                session_file_path.display()
            )
        })?;
        let client = client().await?;
        client
            .restore_session(session)
            .await
            .context("Error logging in")?;
        Ok(client)
    } else {
        tracing::info!(
            "Session file {} does not exist, prompting for password...",
            session_file_path.display()
        );
        let pass = rpassword::prompt_password(format!(
            "Please enter the password of {}: ",
            CONFIG.bot.user
        ))
        .context("Error reading password")?;
        let client = client().await?;
        let response = client
            .matrix_auth()
            .login_username(CONFIG.bot.user.as_str(), &pass)
            .initial_device_display_name("Room Controls")
            .send()
            .await
            .context("Error logging in")?;
        let session = MatrixSession::from(&response);
        let session_json =
            serde_json::to_vec(&session).context("Error serializing session data")?;
        tokio::fs::write(&session_file_path, session_json)
            .await
            .with_context(|| {
                anyhow!(
                    "Error writing session data to {}",
                    session_file_path.display()
                )
            })?;
        Ok(client)
    }
}

pub async fn init(client: Client) -> anyhow::Result<()> {
    // An initial sync to set up state and so our bot doesn't respond to old
    // messages. If the `StateStore` finds saved state in the location given the
    // initial sync will be skipped in favor of loading state from the store
    let response = client
        .sync_once(SyncSettings::default())
        .await
        .context("Initial sync failed")?;

    let (events, _) = broadcast::channel(EVENT_BUFFER);
    forward_events(&client, events.clone());
    let homeserver = CONFIG.bot.homeserver_url()?;
    client.add_event_handler_context(BotContext {
        client: MatrixClient::new(client.clone(), homeserver)?,
        events,
        watches: Watches::default(),
    });
    client.add_event_handler(commands::dm_handler);
    client.add_event_handler(
        |room_member: StrippedRoomMemberEvent, client: Client, room: Room| async move {
            if Some(&*room_member.state_key) != client.user_id() {
                return;
            }
            if room.state() != RoomState::Invited {
                return;
            }
            if !CONFIG.bot.is_operator(&room_member.sender) {
                tracing::info!(
                    "Ignoring invite to {} from {}",
                    room.room_id(),
                    room_member.sender
                );
                return;
            }
            tokio::spawn(async move {
                tracing::info!("Autojoining room {}", room.room_id());
                let mut delay = 2;

                while let Err(err) = room.join().await {
                    // retry autojoin due to synapse sending invites, before the
                    // invited user can join for more information see
                    // https://github.com/matrix-org/synapse/issues/4345
                    tracing::warn!(
                        "Failed to join room {} ({err:?}), retrying in {delay}s",
                        room.room_id()
                    );

                    sleep(Duration::from_secs(delay)).await;
                    delay *= 2;

                    if delay > 3600 {
                        tracing::error!("Can't join room {} ({err:?})", room.room_id());
                        return;
                    }
                }
                tracing::info!("Successfully joined room {}", room.room_id());
            });
        },
    );
    tracing::info!("Initial sync done");
    STARTED.store(true, Ordering::SeqCst);
    let settings = SyncSettings::default().token(response.next_batch);
    client.sync(settings).await?;

    Ok(())
}
