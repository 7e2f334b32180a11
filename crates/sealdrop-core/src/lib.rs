pub mod config;
pub mod error;

pub use config::SealdropConfig;
pub use error::{SealdropError, SealdropResult};
