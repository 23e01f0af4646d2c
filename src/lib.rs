// src/lib.rs

//! Harvester Library
//!
//! Harvests cultural-heritage metadata from remote sources, normalizes it
//! into combined and per-source documents, and loads them into a search
//! index.

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod storage;
pub mod utils;
