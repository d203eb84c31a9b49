pub mod control;
pub mod error;
pub mod reading;
pub mod user;

pub use control::{ControlMode, SensorControl};
pub use error::{Error, Result};
pub use reading::{NewReading, Reading, SensorType};
pub use user::User;
