use anyhow::anyhow;

use super::{pop_room, ErrList};
use crate::avatar::{first_loadable, room_candidates, thumbnail_url, AvatarResolver};
use crate::bot::dialogs::RoomDialogs;
use crate::bot::parser::Cmd;
use crate::bot::BotContext;
use crate::client::ChatClient;
use crate::config::CONFIG;

pub async fn exec(mut cmd: Cmd, ctx: &BotContext, dialogs: &RoomDialogs) -> anyhow::Result<ErrList> {
    let room_id = pop_room(&mut cmd, ctx).await?;
    let room = ctx
        .client
        .room(&room_id)
        .await?
        .ok_or_else(|| anyhow!("I'm not in {room_id}"))?;
    let mut resolver = AvatarResolver::new(room_candidates(&room, ctx.client.user_id()));
    let client = &ctx.client;
    let found = first_loadable(&mut resolver, |mxc| async move {
        client.load_thumbnail(&mxc, &CONFIG.avatar).await.map(|_| ())
    })
    .await;
    let url = found
        .as_deref()
        .and_then(|mxc| thumbnail_url(client.homeserver_url(), mxc, &CONFIG.avatar));
    let msg = match url {
        Some(url) => format!("Avatar of {room_id}: {url}"),
        None => format!("{room_id} has no avatar"),
    };
    dialogs.notice(msg).await;
    Ok(vec![])
}
