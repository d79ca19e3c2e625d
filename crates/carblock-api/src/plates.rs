use uuid::Uuid;

use carblock_db::{DbError, PlateError};
use carblock_types::{LicensePlate, User};

use crate::state::CarblockService;

impl CarblockService {
    pub async fn register_plate(
        &self,
        user_id: Uuid,
        plate: &str,
    ) -> Result<LicensePlate, PlateError> {
        let plate = plate.to_owned();
        self.run("register_plate", move |db| db.register_plate(user_id, &plate))
            .await
    }

    pub async fn resolve_owner(&self, plate: &str) -> Result<User, PlateError> {
        let plate = plate.to_owned();
        self.run("resolve_owner", move |db| db.resolve_owner(&plate))
            .await
    }

    pub async fn remove_plate(&self, user_id: Uuid, plate: &str) -> Result<(), PlateError> {
        let plate = plate.to_owned();
        self.run("remove_plate", move |db| db.remove_plate(user_id, &plate))
            .await
    }

    pub async fn renumber_plate(
        &self,
        user_id: Uuid,
        old: &str,
        new: &str,
    ) -> Result<LicensePlate, PlateError> {
        let (old, new) = (old.to_owned(), new.to_owned());
        self.run("renumber_plate", move |db| {
            db.renumber_plate(user_id, &old, &new)
        })
        .await
    }

    pub async fn plates_for_user(&self, user_id: Uuid) -> Result<Vec<LicensePlate>, DbError> {
        self.run("plates_for_user", move |db| db.plates_for_user(user_id))
            .await
    }
}
