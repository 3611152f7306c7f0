pub mod create;
pub mod credentials;
pub mod delete;
pub mod get;
pub mod list;
pub mod scale;
pub mod transfer;
