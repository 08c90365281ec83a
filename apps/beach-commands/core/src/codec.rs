use bytes::Bytes;
use thiserror::Error;

use crate::{CommandRequest, CommandResponse};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode command payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode command payload: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode_request(request: &CommandRequest) -> Result<Bytes, CodecError> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

pub fn decode_request(payload: &[u8]) -> Result<CommandRequest, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::Decode)
}

pub fn encode_response(response: &CommandResponse) -> Result<Bytes, CodecError> {
    serde_json::to_vec(response)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

pub fn decode_response(payload: &[u8]) -> Result<CommandResponse, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::Decode)
}
