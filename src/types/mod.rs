mod context;
mod directory;
mod models;

pub use context::*;
pub use directory::*;
pub use models::*;
