use anyhow::anyhow;
use tokio::sync::watch;

use super::{find_member, pop_room, pop_user, ErrList};
use crate::bot::dialogs::RoomDialogs;
use crate::bot::parser::Cmd;
use crate::bot::watches::WatchKey;
use crate::bot::BotContext;
use crate::client::{ChatClient, RoomMember};
use crate::dialogs::Dispatcher;
use crate::member_info::{MemberInfo, MemberInfoState};
use crate::power_levels::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Act {
    Kick,
    Ban,
    Mute,
    Mod,
}

impl Act {
    fn allowed(self, can: &Capabilities) -> bool {
        match self {
            Act::Kick => can.kick,
            Act::Ban => can.ban,
            Act::Mute => can.mute,
            Act::Mod => can.modify_level,
        }
    }

    fn verb(self, state: &MemberInfoState) -> &'static str {
        match self {
            Act::Kick => "kick",
            Act::Ban => "ban",
            Act::Mute if state.muted => "unmute",
            Act::Mute => "mute",
            Act::Mod if state.is_target_mod => "demote",
            Act::Mod => "promote",
        }
    }
}

async fn target(cmd: &mut Cmd, ctx: &BotContext) -> anyhow::Result<RoomMember> {
    let room_id = pop_room(cmd, ctx).await?;
    let user_id = pop_user(cmd)?;
    find_member(ctx, &room_id, &user_id).await
}

pub async fn show(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let member = target(&mut cmd, ctx).await?;
    if cmd.pop_word().as_deref() == Some("watch") {
        return watch(member, ctx, dialogs).await;
    }
    let (dispatcher, _actions) = Dispatcher::new();
    let info = MemberInfo::new(&ctx.client, dialogs, dispatcher, member).await;
    dialogs.notice(describe(info.member(), info.state())).await;
    Ok(vec![])
}

async fn watch(member: RoomMember, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let what = format!("{} in {}", member.user_id, member.room_id);
    let key = WatchKey {
        report_to: dialogs.room().room_id().to_owned(),
        room: member.room_id.clone(),
        member: Some(member.user_id.clone()),
    };
    let client = ctx.client.clone();
    let reporter_dialogs = dialogs.clone();
    let events = ctx.events.subscribe();
    let (tx, rx) = watch::channel((member.clone(), MemberInfoState::default()));
    let task = async move {
        let (dispatcher, _actions) = Dispatcher::new();
        let info = MemberInfo::new(&client, &reporter_dialogs, dispatcher, member).await;
        tokio::join!(info.run(events, tx), report_changes(&reporter_dialogs, rx));
    };
    if ctx.watches.start(key, task).await {
        tracing::info!("Replacing existing watch of {what}");
    }
    dialogs.notice(format!("Watching {what}")).await;
    Ok(vec![])
}

async fn report_changes(
    dialogs: &RoomDialogs,
    mut rx: watch::Receiver<(RoomMember, MemberInfoState)>,
) {
    let mut last_posted = None;
    while rx.changed().await.is_ok() {
        let current = rx.borrow_and_update().clone();
        if last_posted.as_ref() == Some(&current) {
            continue;
        }
        dialogs.notice(describe(&current.0, &current.1)).await;
        last_posted = Some(current);
    }
}

pub async fn act(
    act: Act,
    mut cmd: Cmd,
    ctx: &BotContext,
    dialogs: &RoomDialogs,
) -> anyhow::Result<ErrList> {
    let member = target(&mut cmd, ctx).await?;
    let (dispatcher, _actions) = Dispatcher::new();
    let info = MemberInfo::new(&ctx.client, dialogs, dispatcher, member).await;
    let state = info.state();
    if !act.allowed(&state.can) {
        let member = info.member();
        return Ok(vec![anyhow!(
            "I'm not allowed to {} {} in {}",
            act.verb(state),
            member.user_id,
            member.room_id
        )]);
    }
    match act {
        Act::Kick => info.kick().await,
        Act::Ban => info.ban().await,
        Act::Mute => info.toggle_mute().await,
        Act::Mod => info.toggle_mod().await,
    }
    Ok(vec![])
}

pub async fn chat(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let member = target(&mut cmd, ctx).await?;
    let user_id = member.user_id.clone();
    let (dispatcher, mut actions) = Dispatcher::new();
    let mut info = MemberInfo::new(&ctx.client, dialogs, dispatcher, member).await;
    info.start_chat().await;
    if dialogs.report_actions(&mut actions).await == 0 {
        return Ok(vec![anyhow!("Couldn't start a chat with {user_id}")]);
    }
    Ok(vec![])
}

pub async fn leave(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let room_id = pop_room(&mut cmd, ctx).await?;
    let confirmed = cmd.pop_word().as_deref() == Some("confirm");
    let me = find_member(ctx, &room_id, &ctx.client.user_id().to_owned()).await?;
    let dialogs = dialogs.confirmed(confirmed);
    let (dispatcher, mut actions) = Dispatcher::new();
    let info = MemberInfo::new(&ctx.client, &dialogs, dispatcher, me).await;
    info.leave().await;
    if dialogs.report_actions(&mut actions).await > 0 {
        ctx.watches.stop_room(&room_id).await;
    }
    Ok(vec![])
}

fn describe(member: &RoomMember, state: &MemberInfoState) -> String {
    let mut out = format!(
        "**{}** (`{}`) in {}\n\n",
        member.name(),
        member.user_id,
        member.room_id
    );
    out.push_str(&format!("- Power level: {}", member.power_level));
    if state.is_target_mod {
        out.push_str(" (moderator)");
    }
    out.push('\n');
    if state.muted {
        out.push_str("- Muted\n");
    }
    let can = &state.can;
    let mut allowed = Vec::new();
    if can.kick {
        allowed.push("kick");
    }
    if can.ban {
        allowed.push("ban");
    }
    if can.mute {
        allowed.push("mute");
    }
    if can.modify_level {
        allowed.push("change power level");
    }
    if allowed.is_empty() {
        out.push_str("- I can't moderate them\n");
    } else {
        out.push_str(&format!("- I can: {}\n", allowed.join(", ")));
    }
    out
}
