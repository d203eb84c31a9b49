mod connection;

pub mod control_store;
pub mod migrations;
pub mod reading_store;
pub mod user_store;

pub use control_store::{ControlSource, ControlStore, ControlUpdate};
pub use reading_store::{ReadingSource, ReadingStore};
pub use user_store::{UserSource, UserStore};
