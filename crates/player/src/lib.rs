pub mod cli;
pub mod commands;
pub mod config;
pub mod playlist;
pub mod runtime;
