//! The sea-orm entities of the tables the ledger works with.

pub mod activity;
pub mod notification;
pub mod user;
