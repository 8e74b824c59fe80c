//! Library crate for quiz-live-back, exposing modules for binaries and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod events;
pub mod routes;
pub mod services;
pub mod state;
