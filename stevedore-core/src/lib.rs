pub mod config;
pub mod error;
pub mod models;

pub use config::ExecPlan;
pub use error::{ExecError, Result};
pub use models::*;
