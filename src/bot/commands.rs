mod avatar;
mod members;
mod moderation;

use std::future::Future;

use anyhow::anyhow;
use matrix_sdk::event_handler::Ctx;
use matrix_sdk::room::Receipts;
use matrix_sdk::ruma::events::room::message::{
    MessageType, OriginalSyncRoomMessageEvent, RoomMessageEventContent,
};
use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId};
use matrix_sdk::{Room, RoomState};

use crate::bot::dialogs::RoomDialogs;
use crate::bot::parser::{Cmd, CmdPart};
use crate::bot::BotContext;
use crate::client::{ChatClient, RoomMember};
use crate::config::CONFIG;
use crate::dialogs::Dialogs;

pub type ErrList = Vec<anyhow::Error>;

const HELP: &str = "
# Room Controls Help

Rooms can be given as an id (`!abc:example.org`), an alias (`#room:example.org`) or a pill.

## Members

- `!members <room>`: List the joined and invited members of a room, highest power level first.
- `!watch <room>`: Keep posting the member list of a room here whenever it changes.
- `!unwatch <room> [user]`: Stop watching a room, or a member of it.
- `!invite <room> <user>`: Invite a user to a room.

## Moderation

- `!member <room> <user> [watch]`: Show a member and what I'm allowed to do to them. With `watch`, post it again whenever it changes.
- `!kick <room> <user>`: Kick a member.
- `!ban <room> <user>`: Ban a member.
- `!mute <room> <user>`: Mute or unmute a member.
- `!mod <room> <user>`: Make a member a moderator, or take it away.
- `!chat <room> <user>`: Find or create a private chat with a member.
- `!leave <room> [confirm]`: Leave a room.

## Other

- `!avatar <room>`: Show the avatar of a room.
- `!help`: Show this message.
";

pub async fn dm_handler(
    event: OriginalSyncRoomMessageEvent,
    room: Room,
    Ctx(ctx): Ctx<BotContext>,
) -> anyhow::Result<()> {
    if &*event.sender == ctx.client.user_id() {
        return Ok(());
    }
    if room.state() != RoomState::Joined {
        return Ok(());
    }
    // Only respond to DMs
    tracing::debug!("Processing event {}", event.event_id);
    if !room.is_direct().await? {
        return Ok(());
    }
    if !CONFIG.bot.is_operator(&event.sender) {
        tracing::debug!("Ignoring message from non-operator {}", event.sender);
        return Ok(());
    }
    tokio::spawn({
        let room = room.clone();
        let event_id = event.event_id.clone();
        async move {
            let new_receipts = Receipts::new().public_read_receipt(event_id);
            if let Err(e) = room.send_multiple_receipts(new_receipts).await {
                tracing::error!("Error sending receipt for message: {e:#}",);
            }
        }
    });
    let handler = Handler {
        dialogs: RoomDialogs::new(room.clone(), event.event_id.clone()),
    };
    let MessageType::Text(message_content) = &event.content.msgtype else {
        return Ok(());
    };
    let mut cmd = Cmd::parse(message_content)?;
    tracing::debug!("{cmd:?}");
    let Some(CmdPart::Word(word)) = cmd.pop() else {
        return Ok(());
    };
    if !word.starts_with('!') {
        return Ok(());
    }
    let dialogs = handler.dialogs.clone();
    match word.as_str() {
        "!members" => handler.run(members::list(cmd, &ctx, &dialogs)).await,
        "!watch" => handler.run(members::watch(cmd, &ctx, &dialogs)).await,
        "!unwatch" => handler.run(members::unwatch(cmd, &ctx, &dialogs)).await,
        "!invite" => handler.run(members::invite(cmd, &ctx, &dialogs)).await,
        "!member" => handler.run(moderation::show(cmd, &ctx, &dialogs)).await,
        "!kick" => {
            let f = moderation::act(moderation::Act::Kick, cmd, &ctx, &dialogs);
            handler.run(f).await
        }
        "!ban" => {
            let f = moderation::act(moderation::Act::Ban, cmd, &ctx, &dialogs);
            handler.run(f).await
        }
        "!mute" => {
            let f = moderation::act(moderation::Act::Mute, cmd, &ctx, &dialogs);
            handler.run(f).await
        }
        "!mod" => {
            let f = moderation::act(moderation::Act::Mod, cmd, &ctx, &dialogs);
            handler.run(f).await
        }
        "!chat" => handler.run(moderation::chat(cmd, &ctx, &dialogs)).await,
        "!leave" => handler.run(moderation::leave(cmd, &ctx, &dialogs)).await,
        "!avatar" => handler.run(avatar::exec(cmd, &ctx, &dialogs)).await,
        "!help" => handler.run_no_feedback(help(&dialogs)).await,
        _ => {
            let content = RoomMessageEventContent::notice_markdown(
                "Unknown command. Type `!help` for a list of commands and what they do.",
            );
            room.send(content).await?;
        }
    }
    Ok(())
}

struct Handler {
    dialogs: RoomDialogs,
}

impl Handler {
    /// Runs a command between a pending reaction and a ✅ or ❌ one. Errors
    /// the command returns are posted as notices; errors it already showed
    /// through its dialogs only flip the reaction.
    async fn run(self, f: impl Future<Output = anyhow::Result<ErrList>>) {
        let loader = self.dialogs.open_loader().await;
        let res = f.await;
        self.dialogs.close_loader(loader).await;
        let errors = match res {
            Ok(errors) => errors,
            Err(e) => vec![e],
        };
        if errors.is_empty() && !self.dialogs.failed() {
            self.dialogs.react("✅").await;
            return;
        }
        self.dialogs.react("❌").await;
        for e in errors {
            tracing::error!("Error in command handler: {e:?}");
            self.dialogs.notice(format!("{e:#}")).await;
        }
    }

    async fn run_no_feedback(self, f: impl Future<Output = anyhow::Result<ErrList>>) {
        if let Err(e) = f.await {
            tracing::error!("Error in command handler: {e:#}");
        }
    }
}

pub async fn help(dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    dialogs.notice(HELP.to_owned()).await;
    Ok(vec![])
}

async fn pop_room(cmd: &mut Cmd, ctx: &BotContext) -> anyhow::Result<OwnedRoomId> {
    cmd.pop_room_id(ctx.client.inner())
        .await?
        .ok_or_else(|| anyhow!("Expected a room id or alias. Type `!help` for usage."))
}

fn pop_user(cmd: &mut Cmd) -> anyhow::Result<OwnedUserId> {
    cmd.pop_user_id()
        .ok_or_else(|| anyhow!("Expected a user id. Type `!help` for usage."))
}

async fn find_member(
    ctx: &BotContext,
    room_id: &OwnedRoomId,
    user_id: &OwnedUserId,
) -> anyhow::Result<RoomMember> {
    let room = ctx
        .client
        .room(room_id)
        .await?
        .ok_or_else(|| anyhow!("I'm not in {room_id}"))?;
    room.member(user_id)
        .cloned()
        .ok_or_else(|| anyhow!("{user_id} is not a member of {room_id}"))
}
