//! Library exports for the link-in-bio service
//!
//! Exposes the rule engine, storage and HTTP layers for the binary and the
//! integration tests.

pub mod aggregate;
pub mod commerce;
pub mod config;
pub mod database;
pub mod editor;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod model;
pub mod repository;
pub mod resolver;
pub mod route;
pub mod visibility;
pub mod visitor;
