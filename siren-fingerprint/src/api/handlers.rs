//! RPC method implementations backed by the engine

use super::types::{
    BasicIsSuccessResponse, DeleteTrackByIdRequest, ErrorDetail, FindTrackByFingerprintRequest,
    FindTrackByFingerprintResponse, LoadTrackByUrlRequest, INTERNAL_SERVER_ERROR, NOT_FOUND,
};
use crate::engine::{Engine, MetadataLookup};
use crate::rpc::{RpcHandler, RpcServer};
use crate::types::Fingerprint;
use std::sync::Arc;
use tracing::{info, warn};

pub struct LoadTrackByUrl;

impl RpcHandler for LoadTrackByUrl {
    type Context = Engine;
    type Request = LoadTrackByUrlRequest;
    type Reply = BasicIsSuccessResponse;

    const METHOD: &'static str = "LoadTrackByUrl";

    fn handle(engine: &Engine, request: LoadTrackByUrlRequest, reply: &mut BasicIsSuccessResponse) {
        info!(song_id = request.song_id, url = %request.url, "Load track requested");
        reply.success = engine.load_track_by_url(&request.url, request.song_id, request.is_caching);
    }
}

pub struct FindTrackByFingerprint;

impl RpcHandler for FindTrackByFingerprint {
    type Context = Engine;
    type Request = FindTrackByFingerprintRequest;
    type Reply = FindTrackByFingerprintResponse;

    const METHOD: &'static str = "FindTrackByFingerprint";

    fn handle(
        engine: &Engine,
        request: FindTrackByFingerprintRequest,
        reply: &mut FindTrackByFingerprintResponse,
    ) {
        let fingerprint = Fingerprint::from_map(&request.fingerprint);
        let result = engine.find_song_id_by_fingerprint(&fingerprint);
        if !result.is_ok() {
            info!(hashes = fingerprint.len(), "No confident match for fingerprint");
            reply.errors.push(ErrorDetail::new(NOT_FOUND));
            return;
        }

        match engine.fetch_song_metadata(result.song_id) {
            MetadataLookup::Found(metadata) => {
                reply.song_id = Some(result.song_id);
                reply.timestamp = Some(result.timestamp);
                reply.song_metadata = Some(metadata);
            }
            MetadataLookup::Disabled => {
                reply.song_id = Some(result.song_id);
                reply.timestamp = Some(result.timestamp);
            }
            MetadataLookup::NotFound => {
                warn!(song_id = result.song_id, "Matched song is unknown to the metadata service");
                reply.errors.push(ErrorDetail::new(NOT_FOUND));
            }
            MetadataLookup::Failed(_) => {
                reply.errors.push(ErrorDetail::new(INTERNAL_SERVER_ERROR));
            }
        }
    }
}

pub struct DeleteTrackById;

impl RpcHandler for DeleteTrackById {
    type Context = Engine;
    type Request = DeleteTrackByIdRequest;
    type Reply = BasicIsSuccessResponse;

    const METHOD: &'static str = "DeleteTrackById";

    fn handle(engine: &Engine, request: DeleteTrackByIdRequest, reply: &mut BasicIsSuccessResponse) {
        info!(song_id = request.song_id, "Delete track requested");
        reply.success = engine.purge_fingerprint_by_song_id(request.song_id);
    }
}

/// Register the three track methods on `server`.
pub fn register_track_service(server: &mut RpcServer, engine: Arc<Engine>) {
    server.register::<LoadTrackByUrl>(Arc::clone(&engine));
    server.register::<FindTrackByFingerprint>(Arc::clone(&engine));
    server.register::<DeleteTrackById>(engine);
}
