use std::fmt::Display;

use anyhow::{anyhow, Context};
use matrix_sdk::ruma::events::room::message::{MessageFormat, TextMessageEventContent};
use matrix_sdk::ruma::{
    OwnedRoomAliasId, OwnedRoomId, OwnedUserId, RoomAliasId, RoomId, UserId,
};
use matrix_sdk::Client;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Cmd {
    parts: Vec<CmdPart>,
    pointer: usize,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CmdPart {
    Word(String),
    UserId(OwnedUserId),
    RoomId(OwnedRoomId),
    RoomAlias(OwnedRoomAliasId),
}

fn parse_plain_text(input: &str) -> Vec<CmdPart> {
    let mut cmd_parts = Vec::new();
    for word in input.split_whitespace() {
        if let Some(part) = parse_url(word) {
            cmd_parts.push(part);
            continue;
        }
        if let Ok(v) = UserId::parse(word) {
            cmd_parts.push(CmdPart::UserId(v));
            continue;
        }
        if let Ok(v) = RoomId::parse(word) {
            cmd_parts.push(CmdPart::RoomId(v));
            continue;
        }
        if let Ok(v) = RoomAliasId::parse(word) {
            cmd_parts.push(CmdPart::RoomAlias(v));
            continue;
        }
        let word = html_escape::decode_html_entities(word);
        cmd_parts.push(CmdPart::Word(word.into_owned()));
    }
    cmd_parts
}

fn parse_html(input: &str) -> anyhow::Result<Vec<CmdPart>> {
    let dom = html_parser::Dom::parse(input)?;
    let mut cmd_parts = Vec::new();
    for child in dom.children {
        match child {
            html_parser::Node::Text(text) => {
                cmd_parts.extend(parse_plain_text(text.as_str()));
            }
            // Pills are links to matrix.to; replies (mx-reply) are skipped
            html_parser::Node::Element(element) if element.name == "a" => {
                if let Some(Some(url)) = element.attributes.get("href") {
                    if let Some(part) = parse_url(url) {
                        cmd_parts.push(part);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(cmd_parts)
}

fn parse_url(url: &str) -> Option<CmdPart> {
    let url = percent_encoding::percent_decode_str(url)
        .decode_utf8()
        .ok()?
        .into_owned();
    let id = url
        .strip_prefix("https://matrix.to/#/")?
        .split('?')
        .next()?;
    match id.chars().next()? {
        '@' => Some(CmdPart::UserId(UserId::parse(id).ok()?)),
        '#' => Some(CmdPart::RoomAlias(RoomAliasId::parse(id).ok()?)),
        '!' => Some(CmdPart::RoomId(RoomId::parse(id).ok()?)),
        _ => None,
    }
}

macro_rules! get {
    ($self:expr) => {
        $self.parts.get($self.pointer)
    };
}

macro_rules! ret {
    ($self:expr, $v:expr) => {{
        $self.pointer += 1;
        Some($v)
    }};
}

impl Cmd {
    pub fn parse(input: &TextMessageEventContent) -> anyhow::Result<Self> {
        let cmd_parts = match &input.formatted {
            Some(formatted_body) if formatted_body.format == MessageFormat::Html => {
                parse_html(&formatted_body.body)?
            }
            _ => parse_plain_text(&input.body),
        };
        Ok(Cmd {
            parts: cmd_parts,
            pointer: 0,
        })
    }

    pub fn pop(&mut self) -> Option<CmdPart> {
        let v = self.parts.get(self.pointer).cloned();
        self.pointer += 1;
        v
    }

    pub fn pop_word(&mut self) -> Option<String> {
        match get!(self) {
            Some(CmdPart::Word(word)) => ret!(self, word.clone()),
            _ => None,
        }
    }

    pub async fn pop_room_id(&mut self, client: &Client) -> anyhow::Result<Option<OwnedRoomId>> {
        match get!(self) {
            Some(CmdPart::RoomId(id)) => Ok(ret!(self, id.to_owned())),
            Some(CmdPart::RoomAlias(alias)) => {
                let alias = alias.clone();
                self.pointer += 1;
                Ok(Some(
                    client
                        .resolve_room_alias(&alias)
                        .await
                        .with_context(|| anyhow!("Error resolving room alias {alias}"))?
                        .room_id,
                ))
            }
            _ => Ok(None),
        }
    }

    pub fn pop_user_id(&mut self) -> Option<OwnedUserId> {
        match get!(self) {
            Some(CmdPart::UserId(id)) => ret!(self, id.to_owned()),
            _ => None,
        }
    }

    /// The rest of the command as typed, e.g. a user id that failed to parse.
    pub fn into_string(self) -> String {
        let mut output = String::new();
        let mut first = true;
        for part in &self.parts[self.pointer.min(self.parts.len())..] {
            if first {
                first = false;
            } else {
                output.push(' ');
            }
            output.push_str(&part.to_string());
        }
        output
    }
}

impl Display for CmdPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmdPart::RoomAlias(alias) => alias.fmt(f),
            CmdPart::RoomId(id) => id.fmt(f),
            CmdPart::UserId(id) => id.fmt(f),
            CmdPart::Word(word) => word.fmt(f),
        }
    }
}
