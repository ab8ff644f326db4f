//! SDP offer/answer and ICE candidate sequencing

mod coordinator;
mod peer;

pub use coordinator::{
    AnswerDisposition, CandidateDisposition, Completion, NegotiationAction,
    NegotiationCoordinator, NegotiationRole, OfferDisposition, Renegotiation,
};
pub use peer::PeerConnection;
