use std::time::Duration;

use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId, RoomId};
use tokio::sync::watch;
use tokio::time::Instant;

use super::{pop_room, ErrList};
use crate::bot::dialogs::RoomDialogs;
use crate::bot::parser::Cmd;
use crate::bot::watches::WatchKey;
use crate::bot::BotContext;
use crate::client::{MatrixClient, Membership};
use crate::config::CONFIG;
use crate::member_list::{by_power_level, MemberList, MemberRow};

const WATCH_DEBOUNCE: Duration = Duration::from_secs(1);

fn member_list(
    ctx: &BotContext,
    dialogs: &RoomDialogs,
    room_id: OwnedRoomId,
) -> MemberList<MatrixClient, RoomDialogs> {
    MemberList::new(
        ctx.client.clone(),
        dialogs.clone(),
        Some(room_id),
        CONFIG.members,
    )
    .with_sort(by_power_level)
}

pub async fn list(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let room_id = pop_room(&mut cmd, ctx).await?;
    let mut list = member_list(ctx, dialogs, room_id.clone());
    list.update_list().await;
    dialogs.notice(render(&room_id, &list.rows(), None)).await;
    Ok(vec![])
}

pub async fn watch(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let room_id = pop_room(&mut cmd, ctx).await?;
    let key = WatchKey {
        report_to: dialogs.room().room_id().to_owned(),
        room: room_id.clone(),
        member: None,
    };

    let list = member_list(ctx, dialogs, room_id.clone());
    let events = ctx.events.subscribe();
    let (tx, rx) = watch::channel(Vec::new());
    let reporter = report_changes(dialogs.clone(), room_id.clone(), rx);
    let task = async move {
        tokio::join!(list.run(events, tx), reporter);
    };
    if ctx.watches.start(key, task).await {
        tracing::info!("Replacing existing watch of {room_id}");
    }
    dialogs
        .notice(format!("Watching the members of {room_id}"))
        .await;
    Ok(vec![])
}

/// Stops `!watch <room>`, or `!member <room> <user> watch` when a user is given.
pub async fn unwatch(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let room_id = pop_room(&mut cmd, ctx).await?;
    let member = cmd.pop_user_id();
    let what = match &member {
        Some(user_id) => format!("{user_id} in {room_id}"),
        None => room_id.to_string(),
    };
    let key = WatchKey {
        report_to: dialogs.room().room_id().to_owned(),
        room: room_id,
        member,
    };
    if ctx.watches.stop(&key).await {
        dialogs.notice(format!("Stopped watching {what}")).await;
        Ok(vec![])
    } else {
        Ok(vec![anyhow::anyhow!("Not watching {what}")])
    }
}

pub async fn invite(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let room_id = pop_room(&mut cmd, ctx).await?;
    let mut list = member_list(ctx, dialogs, room_id);
    list.invite(&cmd.into_string()).await;
    Ok(vec![])
}

async fn report_changes(
    dialogs: RoomDialogs,
    room_id: OwnedRoomId,
    mut rx: watch::Receiver<Vec<MemberRow>>,
) {
    let mut last_posted: Option<Vec<OwnedUserId>> = None;
    while rx.changed().await.is_ok() {
        tokio::time::sleep(WATCH_DEBOUNCE).await;
        let rows = rx.borrow_and_update().clone();
        let shown: Vec<OwnedUserId> = rows.iter().map(|row| row.member.user_id.clone()).collect();
        // Presence alone doesn't warrant a new post.
        if last_posted.as_ref() == Some(&shown) {
            continue;
        }
        dialogs
            .notice(render(&room_id, &rows, Some(Instant::now())))
            .await;
        last_posted = Some(shown);
    }
    tracing::debug!("Stopped reporting members of {room_id}");
}

fn render(room_id: &RoomId, rows: &[MemberRow], now: Option<Instant>) -> String {
    let mut out = format!("**Members of {room_id}** ({})\n\n", rows.len());
    for row in rows {
        let member = &row.member;
        out.push_str(&format!("- {} (`{}`)", member.name(), member.user_id));
        if member.power_level != 0 {
            out.push_str(&format!(" power level {}", member.power_level));
        }
        if member.membership == Membership::Invite {
            out.push_str(" *invited*");
        }
        if let (Some(now), Some(seen)) = (now, row.last_presence) {
            let ago = now.saturating_duration_since(seen).as_secs();
            out.push_str(&format!(", seen {ago}s ago"));
        }
        out.push('\n');
    }
    out
}
