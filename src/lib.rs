//! authcore - credential and session lifecycle engine
//!
//! Authenticates users, issues and rotates bearer credentials, revokes them on
//! logout, links third-party identities to local accounts and drives the
//! out-of-band verification flows (password reset, email verification).

pub mod core;
