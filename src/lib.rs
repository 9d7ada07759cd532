pub mod api;
pub mod auth_form;
pub mod backend;
pub mod cache;
pub mod composer;
pub mod config;
pub mod logging;
pub mod messenger;
pub mod model;
pub mod mutations;
pub mod query;
pub mod realtime;
pub mod reconcile;
pub mod session;
pub mod toast;
pub mod typing;
