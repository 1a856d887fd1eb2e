use std::future::Future;

use matrix_sdk::ruma::{MxcUri, OwnedMxcUri, UserId};
use serde::Deserialize;
use url::Url;

use crate::client::RoomSnapshot;

#[derive(Debug, Clone)]
pub struct AvatarResolver<T = String> {
    candidates: Vec<Option<T>>,
    next: usize,
    current: Option<usize>,
}

impl<T> AvatarResolver<T> {
    pub fn new(candidates: Vec<Option<T>>) -> Self {
        let mut resolver = AvatarResolver {
            candidates: Vec::new(),
            next: 0,
            current: None,
        };
        resolver.update(candidates);
        resolver
    }

    pub fn update(&mut self, candidates: Vec<Option<T>>) -> Option<&T> {
        self.candidates = candidates;
        self.next = 0;
        self.advance()
    }

    /// Once every candidate has been tried this keeps returning `None`.
    pub fn on_error(&mut self) -> Option<&T> {
        self.advance()
    }

    pub fn current(&self) -> Option<&T> {
        self.current
            .and_then(|idx| self.candidates.get(idx))
            .and_then(Option::as_ref)
    }

    fn advance(&mut self) -> Option<&T> {
        self.current = None;
        while self.next < self.candidates.len() {
            let idx = self.next;
            self.next += 1;
            if self.candidates[idx].is_some() {
                self.current = Some(idx);
                break;
            }
        }
        self.current()
    }
}

pub async fn first_loadable<T, F, Fut>(resolver: &mut AvatarResolver<T>, mut load: F) -> Option<T>
where
    T: Clone,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut candidate = resolver.current().cloned();
    while let Some(current) = candidate {
        match load(current.clone()).await {
            Ok(()) => return Some(current),
            Err(e) => {
                tracing::debug!("Avatar candidate failed to load: {e:#}");
                candidate = resolver.on_error().cloned();
            }
        }
    }
    None
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailMethod {
    #[default]
    Crop,
    Scale,
}

impl ThumbnailMethod {
    fn as_str(self) -> &'static str {
        match self {
            ThumbnailMethod::Crop => "crop",
            ThumbnailMethod::Scale => "scale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ThumbnailSpec {
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default)]
    pub method: ThumbnailMethod,
}

fn default_size() -> u32 {
    36
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        ThumbnailSpec {
            width: default_size(),
            height: default_size(),
            method: ThumbnailMethod::default(),
        }
    }
}

pub fn thumbnail_url(homeserver: &Url, mxc: &MxcUri, spec: &ThumbnailSpec) -> Option<String> {
    let (server_name, media_id) = mxc.parts().ok()?;
    let mut url = homeserver.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["_matrix", "media", "v3", "thumbnail", server_name.as_str(), media_id]);
    url.query_pairs_mut()
        .append_pair("width", &spec.width.to_string())
        .append_pair("height", &spec.height.to_string())
        .append_pair("method", spec.method.as_str());
    Some(url.into())
}

/// For a room of one or two members, the avatar of the member who isn't us
/// (or the only member).
pub fn one_to_one_source<'a>(room: &'a RoomSnapshot, me: &UserId) -> Option<&'a MxcUri> {
    let member = match room.members.as_slice() {
        [first, second] => {
            if first.user_id == me {
                second
            } else {
                first
            }
        }
        [only] => only,
        _ => return None,
    };
    member.avatar_url.as_deref()
}

pub fn room_candidates(room: &RoomSnapshot, me: &UserId) -> Vec<Option<OwnedMxcUri>> {
    vec![
        room.avatar_url.clone(),
        one_to_one_source(room, me).map(ToOwned::to_owned),
    ]
}
