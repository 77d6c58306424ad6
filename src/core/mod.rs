//! Core domain: authentication engine, storage and collaborator adapters

pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod ephemeral;
