use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use matrix_sdk::ruma::{OwnedUserId, UserId};
use once_cell::sync::Lazy;
use serde::Deserialize;
use url::Url;

use crate::avatar::ThumbnailSpec;
use crate::member_list::MemberListOptions;

#[derive(Deserialize)]
pub struct Config {
    pub bot: BotInfo,
    #[serde(default)]
    pub members: MemberListOptions,
    #[serde(default)]
    pub avatar: ThumbnailSpec,
}

#[derive(Deserialize)]
pub struct BotInfo {
    pub user: OwnedUserId,
    homeserver_url: Option<Url>,
    pub state_store: PathBuf,
    session_file: Option<PathBuf>,
    #[serde(default)]
    pub operators: Vec<OwnedUserId>,
}

impl BotInfo {
    pub fn is_operator(&self, user_id: &UserId) -> bool {
        self.operators.iter().any(|op| &**op == user_id)
    }

    pub fn homeserver_url(&self) -> anyhow::Result<Url> {
        match &self.homeserver_url {
            Some(url) => Ok(url.clone()),
            None => {
                let url = format!("https://{}", self.user.server_name().as_str());
                Url::parse(&url).with_context(|| format!("Invalid homeserver URL {url}"))
            }
        }
    }

    pub fn session_file_path(&self) -> PathBuf {
        match &self.session_file {
            Some(path) => path.clone(),
            None => self.state_store.join("session.json"),
        }
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let config_path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: room-controls <path to config file>");
            std::process::exit(1);
        }
    };
    let file = match File::open(config_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening config file: {e:#}");
            std::process::exit(2);
        }
    };
    match serde_yaml::from_reader(file) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error parsing config file: {e:#}");
            std::process::exit(2);
        }
    }
});
