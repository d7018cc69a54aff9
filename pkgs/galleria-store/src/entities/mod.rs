//! Sea-ORM entities for galleria-store

pub mod conversations;
pub mod message_receipts;
pub mod messages;
