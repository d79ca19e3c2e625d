use uuid::Uuid;

use carblock_db::{DbError, SendError};
use carblock_types::{InboxEntry, MessageRecord};

use crate::state::CarblockService;

/// Default page size for history listings.
pub const DEFAULT_LIMIT: u32 = 50;

impl CarblockService {
    /// Send `text` to the owner of `plate`. Rejections come back as typed
    /// `SendError` variants for the bot layer to render.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        plate: &str,
        text: &str,
    ) -> Result<MessageRecord, SendError> {
        let (plate, text) = (plate.to_owned(), text.to_owned());
        self.run("send_message", move |db| db.send(sender_id, &plate, &text))
            .await
    }

    pub async fn remaining_messages(&self, sender_id: Uuid) -> Result<u32, DbError> {
        self.run("remaining_messages", move |db| {
            db.remaining_messages(sender_id)
        })
        .await
    }

    pub async fn recent_sent(
        &self,
        sender_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>, DbError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        self.run("recent_sent", move |db| db.recent_sent(sender_id, limit))
            .await
    }

    pub async fn inbox(
        &self,
        recipient_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<InboxEntry>, DbError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        self.run("inbox", move |db| db.inbox(recipient_id, limit))
            .await
    }
}
