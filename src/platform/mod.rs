//! Wagering-platform collaborator

pub mod client;

pub use client::{PlatformClient, SessionInfo};
