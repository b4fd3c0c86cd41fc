//! Client library: configuration, session, uploads, gallery and tag editing.

pub mod client;
pub mod config;
pub mod gallery;
pub mod models;
pub mod selection;
pub mod session;
pub mod tags;
pub mod upload;

pub use client::PhotoClient;
