// Library for tests to access modules

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod logs;
pub mod models;
pub mod poller;
pub mod routes;
pub mod store;
