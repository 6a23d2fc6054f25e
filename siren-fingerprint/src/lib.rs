//! # Siren Fingerprint Service (siren-fingerprint)
//!
//! Audio identification: matches snippet fingerprints against ingested
//! tracks, ingests new tracks from URLs and purges tracks.
//!
//! **Architecture:** in-process completion-queue RPC server whose handlers
//! drive the matching [`engine::Engine`]. Blocking store and HTTP work runs on
//! servicer threads or on the shared multi-queue [`thread_pool::ThreadPool`].
//! Matching is a delta histogram judged with robust statistics.

pub mod api;
pub mod common;
pub mod config;
pub mod engine;
pub mod fingerprinter;
pub mod histogram;
pub mod http;
pub mod rpc;
pub mod storage;
pub mod thread_pool;
pub mod types;

pub use config::ServiceConfig;
pub use engine::Engine;
pub use types::{Fingerprint, SongId};
