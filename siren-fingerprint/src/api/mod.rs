//! Track service surface: RPC handlers plus the HTTP/JSON gateway

pub mod error;
pub mod gateway;
pub mod handlers;
pub mod types;

pub use error::ServiceError;
pub use gateway::build_router;
pub use handlers::{register_track_service, DeleteTrackById, FindTrackByFingerprint, LoadTrackByUrl};
