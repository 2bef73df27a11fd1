pub mod events;
pub mod models;
pub mod pagination;

pub use events::ChatEvent;
pub use models::*;
pub use pagination::*;
