pub mod config;
pub mod content;
pub mod dumper;
pub mod error;
pub mod http;
pub mod links;
pub mod mapping;
pub mod naming;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod resolver;
pub mod runtime;
