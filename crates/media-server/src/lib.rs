pub mod catalog;
pub mod cli;
pub mod config;
pub mod control;
pub mod discovery;
pub mod mounts;
pub mod notify;
pub mod runtime;
