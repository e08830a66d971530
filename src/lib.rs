pub mod activation;
pub mod activity_store;
pub mod activity_type;
pub mod config;
pub mod db;
pub mod entity;
pub mod ledger;
pub mod migration;
pub mod notification;
pub mod rank;
pub mod test;
pub mod trace;
