use uuid::Uuid;

use carblock_db::DbError;
use carblock_types::User;

use crate::state::CarblockService;

impl CarblockService {
    /// Idempotent first-contact registration. Call before any other
    /// operation for an incoming chat user.
    pub async fn ensure_user(&self, telegram_id: i64, username: &str) -> Result<User, DbError> {
        let username = username.to_owned();
        self.run("ensure_user", move |db| db.ensure_user(telegram_id, &username))
            .await
    }

    pub async fn user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, DbError> {
        self.run("user_by_telegram_id", move |db| {
            db.user_by_telegram_id(telegram_id)
        })
        .await
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<bool, DbError> {
        self.run("delete_user", move |db| db.delete_user(id)).await
    }
}
