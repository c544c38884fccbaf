pub mod apply;
pub mod config;
pub mod context;
pub mod crm;
pub mod current;
pub mod diff;
pub mod error;
pub mod io;
pub mod model;
pub mod roles;
pub mod sync;
pub mod tools;

pub use error::{Result, SyncError};
