pub mod api;
pub mod backend;
pub mod config;
pub mod controller;
pub mod launch;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod types;
