pub mod api;
pub mod config;
pub mod dispatch;
pub mod generators;
pub mod poller;
pub mod registry;
pub mod validation;
