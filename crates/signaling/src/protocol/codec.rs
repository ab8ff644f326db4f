//! Message Codec: wire bytes ↔ typed signaling messages
//!
//! Decoding is all-or-nothing. A frame that parses but carries records
//! the session cannot key on (empty identity, empty track sid) is rejected
//! as a whole, so callers never see a partially usable message.

use super::message::{SignalRequest, SignalResponse};
use super::types::ParticipantInfo;
use crate::{Error, Result};

/// Serialize a client request
pub fn encode_request(request: &SignalRequest) -> Result<Vec<u8>> {
    serde_json::to_vec(request)
        .map_err(|e| Error::Encode(format!("Failed to encode {}: {}", request.kind(), e)))
}

/// Parse a server response
pub fn decode_response(bytes: &[u8]) -> Result<SignalResponse> {
    let response: SignalResponse = serde_json::from_slice(bytes)
        .map_err(|e| Error::Decode(format!("Malformed signal response: {}", e)))?;
    validate_response(&response)?;
    Ok(response)
}

/// Serialize a server response (used by in-process servers)
pub fn encode_response(response: &SignalResponse) -> Result<Vec<u8>> {
    serde_json::to_vec(response)
        .map_err(|e| Error::Encode(format!("Failed to encode {}: {}", response.kind(), e)))
}

/// Parse a client request (used by in-process servers)
pub fn decode_request(bytes: &[u8]) -> Result<SignalRequest> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Decode(format!("Malformed signal request: {}", e)))
}

fn validate_response(response: &SignalResponse) -> Result<()> {
    match response {
        SignalResponse::Join(join) => {
            if join.participant.sid.is_empty() {
                return Err(Error::Decode(
                    "join response without local participant sid".to_string(),
                ));
            }
            join.other_participants.iter().try_for_each(validate_participant)
        }
        SignalResponse::Update(update) => {
            update.participants.iter().try_for_each(validate_participant)
        }
        SignalResponse::TrackPublished(published) if published.track.sid.is_empty() => Err(
            Error::Decode("track_published without track sid".to_string()),
        ),
        SignalResponse::TrackUnpublished(unpublished) if unpublished.track_sid.is_empty() => Err(
            Error::Decode("track_unpublished without track sid".to_string()),
        ),
        _ => Ok(()),
    }
}

fn validate_participant(participant: &ParticipantInfo) -> Result<()> {
    if participant.identity.is_empty() {
        return Err(Error::Decode(format!(
            "participant {} without identity",
            participant.sid
        )));
    }
    if let Some(track) = participant.tracks.iter().find(|t| t.sid.is_empty()) {
        return Err(Error::Decode(format!(
            "participant {} has track {:?} without sid",
            participant.identity, track.name
        )));
    }
    Ok(())
}
