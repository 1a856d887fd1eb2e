use crate::client::PowerLevelContent;

const MESSAGE_EVENT: &str = "m.room.message";
const POWER_LEVELS_EVENT: &str = "m.room.power_levels";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub kick: bool,
    pub ban: bool,
    pub mute: bool,
    pub modify_level: bool,
}

pub fn level_to_send(content: &PowerLevelContent) -> i64 {
    content
        .events
        .get(MESSAGE_EVENT)
        .copied()
        .unwrap_or(content.events_default)
}

pub fn level_to_edit_power_levels(content: &PowerLevelContent) -> i64 {
    content
        .events
        .get(POWER_LEVELS_EVENT)
        .copied()
        .unwrap_or(content.state_default)
}

pub fn calculate_can_permissions(me: i64, them: i64, content: &PowerLevelContent) -> Capabilities {
    // Nobody can act on a member at or above their own level.
    if them >= me {
        tracing::trace!("Cannot affect user: {them} >= {me}");
        return Capabilities::default();
    }
    Capabilities {
        kick: me >= content.kick,
        ban: me >= content.ban,
        mute: me >= level_to_edit_power_levels(content),
        modify_level: me > them,
    }
}

pub fn is_muted(them: i64, content: &PowerLevelContent) -> bool {
    them < level_to_send(content)
}

pub fn is_moderator(them: i64, content: &PowerLevelContent) -> bool {
    them > content.users_default
}
