pub mod agent;
pub mod assignment;
pub mod conversation;
pub mod customer;
pub mod message;
pub mod ticket;

pub use agent::*;
pub use assignment::*;
pub use conversation::*;
pub use customer::*;
pub use message::*;
pub use ticket::*;
