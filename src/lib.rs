pub mod application;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod error;
pub mod package;
pub mod process;
pub mod runtime;
pub mod tool;
