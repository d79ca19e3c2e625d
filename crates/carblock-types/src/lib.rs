//! Domain data shared by the carblock engine and its callers.
//!
//! Nothing in here touches storage: these are the values the plate
//! directory, rate limiter and dispatcher hand back to the bot layer.

pub mod models;
pub mod plate;
pub mod rate;

pub use models::{InboxEntry, LicensePlate, MessageRecord, User};
pub use plate::{MAX_PLATE_LEN, PlateNumber, PlateNumberError};
pub use rate::RateDecision;
