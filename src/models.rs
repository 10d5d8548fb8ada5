use serde::{Deserialize, Serialize};

// --- Message kinds ---

/// Media family carried by a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFamily {
    Picture,
    Audio,
    Video,
}

impl MediaFamily {
    /// Push-notification label for a media-only body.
    pub fn label(&self) -> &'static str {
        match self {
            MediaFamily::Picture => "📷 Photo",
            MediaFamily::Audio => "🎵 Audio",
            MediaFamily::Video => "🎥 Video",
        }
    }
}

/// Tagged sum over the seven message kinds. The field rules in
/// [`MessageKind::validate`] fall out of an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "picture")]
    Picture,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "text+picture")]
    TextPicture,
    #[serde(rename = "text+audio")]
    TextAudio,
    #[serde(rename = "text+video")]
    TextVideo,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Picture => "picture",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
            MessageKind::TextPicture => "text+picture",
            MessageKind::TextAudio => "text+audio",
            MessageKind::TextVideo => "text+video",
        }
    }

    pub fn parse(s: &str) -> Option<MessageKind> {
        match s {
            "text" => Some(MessageKind::Text),
            "picture" => Some(MessageKind::Picture),
            "audio" => Some(MessageKind::Audio),
            "video" => Some(MessageKind::Video),
            "text+picture" => Some(MessageKind::TextPicture),
            "text+audio" => Some(MessageKind::TextAudio),
            "text+video" => Some(MessageKind::TextVideo),
            _ => None,
        }
    }

    pub fn has_text(&self) -> bool {
        matches!(
            self,
            MessageKind::Text
                | MessageKind::TextPicture
                | MessageKind::TextAudio
                | MessageKind::TextVideo
        )
    }

    pub fn media(&self) -> Option<MediaFamily> {
        match self {
            MessageKind::Text => None,
            MessageKind::Picture | MessageKind::TextPicture => Some(MediaFamily::Picture),
            MessageKind::Audio | MessageKind::TextAudio => Some(MediaFamily::Audio),
            MessageKind::Video | MessageKind::TextVideo => Some(MediaFamily::Video),
        }
    }

    /// Check the field constraints for this kind: text-only kinds forbid
    /// media, media-only kinds forbid text, combined kinds require both.
    pub fn validate(
        &self,
        text: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<(), &'static str> {
        let has_text = text.is_some_and(|t| !t.trim().is_empty());
        let has_media = media_url.is_some_and(|m| !m.trim().is_empty());
        match (self.has_text(), self.media().is_some()) {
            (true, false) => {
                if !has_text {
                    return Err("Text message requires text content");
                }
                if has_media {
                    return Err("Text message cannot carry a media URL");
                }
            }
            (false, true) => {
                if !has_media {
                    return Err("Media message requires a media URL");
                }
                if has_text {
                    return Err("Media message cannot carry text content");
                }
            }
            (true, true) => {
                if !has_text || !has_media {
                    return Err("Combined message requires both text and a media URL");
                }
            }
            (false, false) => unreachable!("no such kind"),
        }
        Ok(())
    }

    /// Combine text/media presence with a media family into a kind.
    pub fn from_parts(has_text: bool, family: Option<MediaFamily>) -> Option<MessageKind> {
        match (has_text, family) {
            (true, None) => Some(MessageKind::Text),
            (false, None) => None,
            (true, Some(MediaFamily::Picture)) => Some(MessageKind::TextPicture),
            (true, Some(MediaFamily::Audio)) => Some(MessageKind::TextAudio),
            (true, Some(MediaFamily::Video)) => Some(MessageKind::TextVideo),
            (false, Some(MediaFamily::Picture)) => Some(MessageKind::Picture),
            (false, Some(MediaFamily::Audio)) => Some(MessageKind::Audio),
            (false, Some(MediaFamily::Video)) => Some(MessageKind::Video),
        }
    }

    /// Derive the kind after an edit that did not name one explicitly: the
    /// media family sticks across edits while media is present.
    pub fn derive_for_edit(
        prev: MessageKind,
        has_text: bool,
        has_media: bool,
    ) -> Result<MessageKind, &'static str> {
        let family = if has_media {
            match prev.media() {
                Some(f) => Some(f),
                None => return Err("Kind is required when adding media to a text message"),
            }
        } else {
            None
        };
        MessageKind::from_parts(has_text, family)
            .ok_or("Edited message must keep text or media content")
    }
}

// --- Entities ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub room_code: String,
    pub has_password: bool,
    pub created_by: u64,
    pub created_at: String,
    pub members: Vec<Membership>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Membership {
    pub user_id: u64,
    pub username: String,
    pub joined_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomWithStats {
    pub id: String,
    pub name: String,
    pub room_code: String,
    pub has_password: bool,
    pub created_by: u64,
    pub created_at: String,
    pub member_count: i64,
    pub message_count: i64,
    pub last_activity: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    #[serde(rename = "chatroom_id")]
    pub room_id: String,
    pub sender_id: u64,
    pub sender_name: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub sent_at: String,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
}

/// One recipient's read state for a message, joined to the user directory.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReadStatusEntry {
    pub user_id: u64,
    pub username: String,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
}

/// Sender-visible aggregate over a message's read records.
pub fn tick_state(entries: &[ReadStatusEntry]) -> &'static str {
    if !entries.is_empty() && entries.iter().all(|e| e.is_read) {
        "read_by_all"
    } else if entries.iter().any(|e| e.is_read) {
        "read_by_some"
    } else {
        "delivered"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageWithStatus {
    #[serde(flatten)]
    pub message: Message,
    pub read_status: Vec<ReadStatusEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserRoomCursor {
    #[serde(rename = "chatroom_id")]
    pub room_id: String,
    pub user_id: u64,
    pub message_id: String,
    pub read_at: String,
    pub updated_at: String,
}

// --- Requests ---

#[derive(Debug, Deserialize)]
pub struct CreateRoom {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinByCode {
    pub room_code: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub kind: MessageKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub kind: Option<MessageKind>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadBulk {
    pub message_ids: Vec<String>,
}

// --- Responses ---

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkError {
    pub message_id: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkReadResponse {
    pub ok_count: usize,
    pub err_count: usize,
    pub errors: Vec<BulkError>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnreadInfo {
    #[serde(rename = "chatroom_id")]
    pub room_id: String,
    pub room_name: String,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadResponse {
    pub rooms: Vec<UnreadInfo>,
    pub total_unread: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LatestPerRoomEntry {
    #[serde(rename = "chatroom_id")]
    pub room_id: String,
    pub room_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageWithStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageResponse {
    pub messages: Vec<MessageWithStatus>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub unread_count: i64,
    pub total_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadStatusResponse {
    pub message_id: String,
    pub tick: String,
    pub read_status: Vec<ReadStatusEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadByResponse {
    pub message_id: String,
    pub read_by: Vec<ReadStatusEntry>,
    pub unread_by: Vec<ReadStatusEntry>,
}
