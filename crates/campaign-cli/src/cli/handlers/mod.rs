//! Command handlers for the Campaign Hub CLI

pub mod auth;
pub mod config;
pub mod services;
