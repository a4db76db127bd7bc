pub mod config_manager;
pub mod credential;
pub mod error;
pub mod types;

pub use config_manager::*;
pub use credential::Credential;
pub use error::*;
pub use types::*;
