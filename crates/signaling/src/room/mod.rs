//! Room state: model, snapshots and the reconciliation store

mod model;
mod store;

pub use model::{
    ConnectionState, Participant, PublicationState, RoomSnapshot, SubscriptionState, Track,
};
pub use store::{MergeOutcome, ParticipantChange, RoomState, TrackEvent};
