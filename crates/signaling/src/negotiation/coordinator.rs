//! Negotiation Coordinator
//!
//! A sans-IO state machine: inputs go in through `handle_*` methods,
//! work comes out of [`NegotiationCoordinator::poll_action`], and the
//! results of asynchronous peer connection calls come back through
//! [`NegotiationCoordinator::handle_completion`]. While a peer connection
//! call is outstanding, inbound negotiation messages are buffered and
//! replayed in arrival order once it resolves.

use crate::protocol::{IceCandidateInit, SessionDescription};
use crate::{Error, Result};
use std::collections::VecDeque;
use tracing::debug;

/// Negotiation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationRole {
    #[default]
    Idle,
    /// Local offer being created
    Offering,
    /// Remote offer being answered
    Answering,
    /// Local offer sent, waiting for the answer
    AwaitingRemoteAnswer,
}

/// Work for the driver
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationAction {
    /// Call `PeerConnection::create_offer`, report `OfferCreated`
    CreateOffer { epoch: u64 },
    /// Call `PeerConnection::create_answer`, report `AnswerCreated`
    CreateAnswer {
        epoch: u64,
        offer: SessionDescription,
    },
    /// Call `PeerConnection::set_remote_description`, report `AnswerApplied`
    ApplyAnswer {
        epoch: u64,
        answer: SessionDescription,
    },
    /// Call `PeerConnection::add_ice_candidate`, report `CandidateAdded`
    AddIceCandidate(IceCandidateInit),
    /// Transmit the local offer
    SendOffer(SessionDescription),
    /// Transmit the local answer
    SendAnswer(SessionDescription),
}

/// Result of a peer connection call
#[derive(Debug)]
pub enum Completion {
    OfferCreated {
        epoch: u64,
        result: Result<SessionDescription>,
    },
    AnswerCreated {
        epoch: u64,
        result: Result<SessionDescription>,
    },
    AnswerApplied {
        epoch: u64,
        result: Result<()>,
    },
    CandidateAdded {
        result: Result<()>,
    },
}

/// What happened to a remote offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    /// Answering it
    Accepted,
    /// Glare: our offer was dropped and the remote offer is being answered
    Yielded,
    /// Glare: the remote side must yield, offer ignored
    Ignored,
    /// A peer call is in flight; replayed later
    Queued,
}

/// What happened to a remote answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerDisposition {
    /// Being applied
    Applying,
    /// A peer call is in flight; replayed later
    Queued,
}

/// What happened to a remote ICE candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Handed to the peer connection
    Applied,
    /// Held until a remote description exists (or the in-flight call ends)
    Queued,
}

/// Outcome of a renegotiation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renegotiation {
    /// A new offer is being created
    Started,
    /// Negotiation in progress; an offer follows when it returns to idle
    Deferred,
}

#[derive(Debug, Clone)]
enum Inbound {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidateInit),
}

/// Offer/answer and ICE sequencing state machine
#[derive(Debug)]
pub struct NegotiationCoordinator {
    local_id: String,
    remote_id: String,
    role: NegotiationRole,
    epoch: u64,
    offer_epoch: Option<u64>,
    last_offer_epoch: u64,
    pending_local: Option<SessionDescription>,
    remote_applied: bool,
    pending_candidates: VecDeque<IceCandidateInit>,
    backlog: VecDeque<Inbound>,
    busy: bool,
    renegotiate: bool,
    actions: VecDeque<NegotiationAction>,
}

impl NegotiationCoordinator {
    /// Create a coordinator
    ///
    /// `local_id` and `remote_id` break glare ties: the side whose id
    /// sorts lower yields.
    pub fn new(local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            role: NegotiationRole::Idle,
            epoch: 0,
            offer_epoch: None,
            last_offer_epoch: 0,
            pending_local: None,
            remote_applied: false,
            pending_candidates: VecDeque::new(),
            backlog: VecDeque::new(),
            busy: false,
            renegotiate: false,
            actions: VecDeque::new(),
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a peer connection call is outstanding
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Local offer sent and not yet answered
    pub fn pending_local_description(&self) -> Option<&SessionDescription> {
        self.pending_local.as_ref()
    }

    /// Remote candidates held until a remote description is applied
    pub fn queued_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Next action for the driver
    pub fn poll_action(&mut self) -> Option<NegotiationAction> {
        self.actions.pop_front()
    }

    /// Start a local offer; returns the new epoch
    pub fn initiate_offer(&mut self) -> Result<u64> {
        if self.role != NegotiationRole::Idle || self.busy {
            return Err(Error::InvalidState(format!(
                "cannot initiate offer while {:?}",
                self.role
            )));
        }
        Ok(self.start_offer())
    }

    /// Server asked for a new offer
    pub fn negotiation_required(&mut self) -> Renegotiation {
        if self.role == NegotiationRole::Idle && !self.busy {
            self.start_offer();
            Renegotiation::Started
        } else {
            debug!(role = ?self.role, "Deferring renegotiation");
            self.renegotiate = true;
            Renegotiation::Deferred
        }
    }

    /// Remote offer arrived
    pub fn handle_remote_offer(&mut self, offer: SessionDescription) -> OfferDisposition {
        if self.busy {
            self.backlog.push_back(Inbound::Offer(offer));
            return OfferDisposition::Queued;
        }

        match self.role {
            NegotiationRole::Idle => {
                self.begin_answer(offer);
                OfferDisposition::Accepted
            }
            NegotiationRole::AwaitingRemoteAnswer if self.local_id < self.remote_id => {
                debug!(
                    local = %self.local_id,
                    remote = %self.remote_id,
                    "Glare: yielding to remote offer"
                );
                // Our offer is superseded; re-offer once this cycle ends.
                self.epoch += 1;
                self.offer_epoch = None;
                self.pending_local = None;
                self.renegotiate = true;
                self.begin_answer(offer);
                OfferDisposition::Yielded
            }
            role => {
                debug!(
                    ?role,
                    local = %self.local_id,
                    remote = %self.remote_id,
                    "Glare: ignoring remote offer"
                );
                OfferDisposition::Ignored
            }
        }
    }

    /// Remote answer arrived
    ///
    /// Fails with `StaleNegotiation` when no offer of the current epoch is
    /// outstanding; callers drop the answer.
    pub fn handle_remote_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<AnswerDisposition> {
        if self.busy {
            self.backlog.push_back(Inbound::Answer(answer));
            return Ok(AnswerDisposition::Queued);
        }

        match (self.role, self.offer_epoch) {
            (NegotiationRole::AwaitingRemoteAnswer, Some(epoch)) if epoch == self.epoch => {
                self.busy = true;
                self.actions
                    .push_back(NegotiationAction::ApplyAnswer { epoch, answer });
                Ok(AnswerDisposition::Applying)
            }
            _ => Err(Error::StaleNegotiation {
                received: self.last_offer_epoch,
                current: self.epoch,
            }),
        }
    }

    /// Remote ICE candidate arrived
    pub fn add_remote_candidate(&mut self, candidate: IceCandidateInit) -> CandidateDisposition {
        if self.busy {
            self.backlog.push_back(Inbound::Candidate(candidate));
            return CandidateDisposition::Queued;
        }

        if self.remote_applied {
            self.actions
                .push_back(NegotiationAction::AddIceCandidate(candidate));
            CandidateDisposition::Applied
        } else {
            self.pending_candidates.push_back(candidate);
            CandidateDisposition::Queued
        }
    }

    /// Feed back the result of a peer connection call
    ///
    /// Returns the call's error (for logging) or `StaleNegotiation` when
    /// the completion belongs to a superseded epoch. Either way the
    /// coordinator is left in a consistent state.
    pub fn handle_completion(&mut self, completion: Completion) -> Result<()> {
        match completion {
            Completion::CandidateAdded { result } => result,
            Completion::OfferCreated { epoch, result } => {
                self.check_epoch(epoch)?;
                self.busy = false;
                let outcome = match result {
                    Ok(offer) => {
                        self.role = NegotiationRole::AwaitingRemoteAnswer;
                        self.offer_epoch = Some(epoch);
                        self.last_offer_epoch = epoch;
                        self.pending_local = Some(offer.clone());
                        self.actions.push_back(NegotiationAction::SendOffer(offer));
                        Ok(())
                    }
                    Err(e) => {
                        self.role = NegotiationRole::Idle;
                        Err(e)
                    }
                };
                self.resume();
                outcome
            }
            Completion::AnswerCreated { epoch, result } => {
                self.check_epoch(epoch)?;
                self.busy = false;
                self.role = NegotiationRole::Idle;
                let outcome = match result {
                    Ok(answer) => {
                        self.actions.push_back(NegotiationAction::SendAnswer(answer));
                        self.remote_description_applied();
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                self.resume();
                outcome
            }
            Completion::AnswerApplied { epoch, result } => {
                self.check_epoch(epoch)?;
                self.busy = false;
                let outcome = match result {
                    Ok(()) => {
                        self.role = NegotiationRole::Idle;
                        self.offer_epoch = None;
                        self.pending_local = None;
                        self.remote_description_applied();
                        Ok(())
                    }
                    // The offer is unusable; supersede it and offer again.
                    Err(e) => {
                        debug!(epoch, "Remote answer rejected, re-offering");
                        self.epoch += 1;
                        self.role = NegotiationRole::Idle;
                        self.offer_epoch = None;
                        self.pending_local = None;
                        self.renegotiate = true;
                        Err(e)
                    }
                };
                self.resume();
                outcome
            }
        }
    }

    /// Forget all negotiation state (new signal connection)
    ///
    /// The epoch is bumped so completions of calls started before the
    /// reset are recognized as stale.
    pub fn reset(&mut self, local_id: impl Into<String>, remote_id: impl Into<String>) {
        self.local_id = local_id.into();
        self.remote_id = remote_id.into();
        self.epoch += 1;
        self.role = NegotiationRole::Idle;
        self.offer_epoch = None;
        self.pending_local = None;
        self.remote_applied = false;
        self.pending_candidates.clear();
        self.backlog.clear();
        self.busy = false;
        self.renegotiate = false;
        self.actions.clear();
    }

    fn check_epoch(&self, epoch: u64) -> Result<()> {
        if epoch == self.epoch {
            Ok(())
        } else {
            Err(Error::StaleNegotiation {
                received: epoch,
                current: self.epoch,
            })
        }
    }

    fn start_offer(&mut self) -> u64 {
        self.epoch += 1;
        self.role = NegotiationRole::Offering;
        self.busy = true;
        self.renegotiate = false;
        self.actions
            .push_back(NegotiationAction::CreateOffer { epoch: self.epoch });
        self.epoch
    }

    fn begin_answer(&mut self, offer: SessionDescription) {
        self.role = NegotiationRole::Answering;
        self.busy = true;
        self.actions.push_back(NegotiationAction::CreateAnswer {
            epoch: self.epoch,
            offer,
        });
    }

    fn remote_description_applied(&mut self) {
        self.remote_applied = true;
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.actions
                .push_back(NegotiationAction::AddIceCandidate(candidate));
        }
    }

    /// Replay buffered input, then start a deferred renegotiation
    fn resume(&mut self) {
        while !self.busy {
            let Some(input) = self.backlog.pop_front() else {
                break;
            };
            match input {
                Inbound::Offer(offer) => {
                    let _ = self.handle_remote_offer(offer);
                }
                Inbound::Answer(answer) => {
                    if let Err(e) = self.handle_remote_answer(answer) {
                        debug!("Dropping buffered answer: {}", e);
                    }
                }
                Inbound::Candidate(candidate) => {
                    let _ = self.add_remote_candidate(candidate);
                }
            }
        }

        if !self.busy && self.role == NegotiationRole::Idle && self.renegotiate {
            self.start_offer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidateInit {
        IceCandidateInit::new(format!("candidate:{} 1 udp 1 10.0.0.1 {} typ host", n, 5000 + n))
    }

    fn drain(c: &mut NegotiationCoordinator) -> Vec<NegotiationAction> {
        std::iter::from_fn(|| c.poll_action()).collect()
    }

    /// Runs the local offer through to `AwaitingRemoteAnswer`
    fn offer_sent(c: &mut NegotiationCoordinator) -> u64 {
        let epoch = c.initiate_offer().unwrap();
        assert_eq!(drain(c), vec![NegotiationAction::CreateOffer { epoch }]);
        c.handle_completion(Completion::OfferCreated {
            epoch,
            result: Ok(SessionDescription::offer("local-offer")),
        })
        .unwrap();
        assert_eq!(
            drain(c),
            vec![NegotiationAction::SendOffer(SessionDescription::offer("local-offer"))]
        );
        epoch
    }

    #[test]
    fn test_local_offer_cycle() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = offer_sent(&mut c);

        assert_eq!(c.role(), NegotiationRole::AwaitingRemoteAnswer);
        assert!(c.pending_local_description().is_some());

        let answer = SessionDescription::answer("remote-answer");
        assert_eq!(
            c.handle_remote_answer(answer.clone()).unwrap(),
            AnswerDisposition::Applying
        );
        assert_eq!(
            drain(&mut c),
            vec![NegotiationAction::ApplyAnswer { epoch, answer }]
        );

        c.handle_completion(Completion::AnswerApplied {
            epoch,
            result: Ok(()),
        })
        .unwrap();
        assert_eq!(c.role(), NegotiationRole::Idle);
        assert!(c.pending_local_description().is_none());
    }

    #[test]
    fn test_remote_offer_cycle() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let offer = SessionDescription::offer("remote-offer");

        assert_eq!(c.handle_remote_offer(offer.clone()), OfferDisposition::Accepted);
        assert_eq!(c.role(), NegotiationRole::Answering);
        let epoch = c.epoch();
        assert_eq!(
            drain(&mut c),
            vec![NegotiationAction::CreateAnswer { epoch, offer }]
        );

        c.handle_completion(Completion::AnswerCreated {
            epoch,
            result: Ok(SessionDescription::answer("local-answer")),
        })
        .unwrap();
        assert_eq!(c.role(), NegotiationRole::Idle);
        assert_eq!(
            drain(&mut c),
            vec![NegotiationAction::SendAnswer(SessionDescription::answer("local-answer"))]
        );
    }

    #[test]
    fn test_initiate_offer_rejected_while_awaiting_answer() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = offer_sent(&mut c);

        assert!(matches!(c.initiate_offer(), Err(Error::InvalidState(_))));

        // The pending negotiation is intact.
        assert_eq!(c.role(), NegotiationRole::AwaitingRemoteAnswer);
        assert_eq!(c.epoch(), epoch);
        assert!(drain(&mut c).is_empty());
        assert_eq!(
            c.handle_remote_answer(SessionDescription::answer("a")).unwrap(),
            AnswerDisposition::Applying
        );
    }

    #[test]
    fn test_answer_without_offer_is_stale() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        assert!(matches!(
            c.handle_remote_answer(SessionDescription::answer("late")),
            Err(Error::StaleNegotiation { .. })
        ));
        assert_eq!(c.role(), NegotiationRole::Idle);
        assert!(drain(&mut c).is_empty());
    }

    #[test]
    fn test_duplicate_answer_is_stale() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = offer_sent(&mut c);
        c.handle_remote_answer(SessionDescription::answer("a")).unwrap();
        c.handle_completion(Completion::AnswerApplied {
            epoch,
            result: Ok(()),
        })
        .unwrap();
        drain(&mut c);

        assert!(matches!(
            c.handle_remote_answer(SessionDescription::answer("a")),
            Err(Error::StaleNegotiation { .. })
        ));
    }

    #[test]
    fn test_candidates_queued_until_remote_description() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        for n in 0..3 {
            assert_eq!(c.add_remote_candidate(candidate(n)), CandidateDisposition::Queued);
        }
        assert_eq!(c.queued_candidates(), 3);
        assert!(drain(&mut c).is_empty());

        let epoch = offer_sent(&mut c);
        c.handle_remote_answer(SessionDescription::answer("a")).unwrap();
        drain(&mut c);
        c.handle_completion(Completion::AnswerApplied {
            epoch,
            result: Ok(()),
        })
        .unwrap();

        assert_eq!(
            drain(&mut c),
            (0..3)
                .map(|n| NegotiationAction::AddIceCandidate(candidate(n)))
                .collect::<Vec<_>>()
        );

        // Later candidates go straight through.
        assert_eq!(c.add_remote_candidate(candidate(3)), CandidateDisposition::Applied);
        assert_eq!(drain(&mut c), vec![NegotiationAction::AddIceCandidate(candidate(3))]);
    }

    #[test]
    fn test_candidates_during_answer_keep_order() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        c.add_remote_candidate(candidate(0));
        c.handle_remote_offer(SessionDescription::offer("o"));
        let epoch = c.epoch();
        drain(&mut c);

        // Arrive while create_answer is in flight.
        c.add_remote_candidate(candidate(1));
        c.add_remote_candidate(candidate(2));

        c.handle_completion(Completion::AnswerCreated {
            epoch,
            result: Ok(SessionDescription::answer("ans")),
        })
        .unwrap();

        assert_eq!(
            drain(&mut c),
            vec![
                NegotiationAction::SendAnswer(SessionDescription::answer("ans")),
                NegotiationAction::AddIceCandidate(candidate(0)),
                NegotiationAction::AddIceCandidate(candidate(1)),
                NegotiationAction::AddIceCandidate(candidate(2)),
            ]
        );
    }

    #[test]
    fn test_messages_buffered_while_call_outstanding() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = c.initiate_offer().unwrap();
        drain(&mut c);

        // The answer races ahead of our create_offer completion.
        assert_eq!(
            c.handle_remote_answer(SessionDescription::answer("a")).unwrap(),
            AnswerDisposition::Queued
        );

        c.handle_completion(Completion::OfferCreated {
            epoch,
            result: Ok(SessionDescription::offer("o")),
        })
        .unwrap();

        assert_eq!(
            drain(&mut c),
            vec![
                NegotiationAction::SendOffer(SessionDescription::offer("o")),
                NegotiationAction::ApplyAnswer {
                    epoch,
                    answer: SessionDescription::answer("a")
                },
            ]
        );
    }

    #[test]
    fn test_glare_has_exactly_one_answerer() {
        // Each side's remote id is the other's local id.
        let mut low = NegotiationCoordinator::new("PA_aaa", "PA_zzz");
        let mut high = NegotiationCoordinator::new("PA_zzz", "PA_aaa");

        offer_sent(&mut low);
        offer_sent(&mut high);

        let low_offer = low.pending_local_description().cloned().unwrap();
        let high_offer = high.pending_local_description().cloned().unwrap();

        assert_eq!(low.handle_remote_offer(high_offer), OfferDisposition::Yielded);
        assert_eq!(high.handle_remote_offer(low_offer), OfferDisposition::Ignored);

        assert_eq!(low.role(), NegotiationRole::Answering);
        assert_eq!(high.role(), NegotiationRole::AwaitingRemoteAnswer);
        assert!(low.pending_local_description().is_none());

        // low answers, high applies it: no deadlock.
        let low_epoch = low.epoch();
        drain(&mut low);
        low.handle_completion(Completion::AnswerCreated {
            epoch: low_epoch,
            result: Ok(SessionDescription::answer("low-answer")),
        })
        .unwrap();
        let actions = drain(&mut low);
        assert_eq!(
            actions[0],
            NegotiationAction::SendAnswer(SessionDescription::answer("low-answer"))
        );
        // The yielded side re-offers its own changes afterwards.
        assert!(matches!(actions[1], NegotiationAction::CreateOffer { .. }));

        assert_eq!(
            high.handle_remote_answer(SessionDescription::answer("low-answer"))
                .unwrap(),
            AnswerDisposition::Applying
        );
    }

    #[test]
    fn test_answer_to_yielded_offer_is_stale() {
        let mut c = NegotiationCoordinator::new("PA_a", "node-z");
        offer_sent(&mut c);
        c.handle_remote_offer(SessionDescription::offer("remote"));
        let epoch = c.epoch();
        drain(&mut c);
        c.handle_completion(Completion::AnswerCreated {
            epoch,
            result: Ok(SessionDescription::answer("mine")),
        })
        .unwrap();
        let _ = drain(&mut c);

        // Now offering again for the re-offer; finish it.
        let reoffer_epoch = c.epoch();
        c.handle_completion(Completion::OfferCreated {
            epoch: reoffer_epoch,
            result: Ok(SessionDescription::offer("again")),
        })
        .unwrap();
        drain(&mut c);

        // Answer to the first offer would be indistinguishable on the wire,
        // but completions of the abandoned epoch are rejected.
        assert!(matches!(
            c.handle_completion(Completion::AnswerApplied {
                epoch: epoch - 1,
                result: Ok(())
            }),
            Err(Error::StaleNegotiation { .. })
        ));
        assert_eq!(c.role(), NegotiationRole::AwaitingRemoteAnswer);
    }

    #[test]
    fn test_renegotiation_deferred_until_idle() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = offer_sent(&mut c);

        assert_eq!(c.negotiation_required(), Renegotiation::Deferred);
        c.handle_remote_answer(SessionDescription::answer("a")).unwrap();
        drain(&mut c);
        c.handle_completion(Completion::AnswerApplied {
            epoch,
            result: Ok(()),
        })
        .unwrap();

        assert_eq!(c.role(), NegotiationRole::Offering);
        assert_eq!(
            drain(&mut c),
            vec![NegotiationAction::CreateOffer { epoch: epoch + 1 }]
        );
    }

    #[test]
    fn test_renegotiation_from_idle_starts_offer() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        assert_eq!(c.negotiation_required(), Renegotiation::Started);
        assert_eq!(c.role(), NegotiationRole::Offering);
    }

    #[test]
    fn test_failed_offer_returns_to_idle() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = c.initiate_offer().unwrap();
        drain(&mut c);

        let result = c.handle_completion(Completion::OfferCreated {
            epoch,
            result: Err(Error::PeerConnection("no transceivers".to_string())),
        });
        assert!(matches!(result, Err(Error::PeerConnection(_))));
        assert_eq!(c.role(), NegotiationRole::Idle);
        assert!(c.initiate_offer().is_ok());
    }

    #[test]
    fn test_rejected_answer_supersedes_offer() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = offer_sent(&mut c);
        c.handle_remote_answer(SessionDescription::answer("bad")).unwrap();
        drain(&mut c);

        let result = c.handle_completion(Completion::AnswerApplied {
            epoch,
            result: Err(Error::PeerConnection("invalid sdp".to_string())),
        });
        assert!(matches!(result, Err(Error::PeerConnection(_))));

        // A fresh offer replaces the rejected one without any server input.
        assert_eq!(c.role(), NegotiationRole::Offering);
        assert!(c.pending_local_description().is_none());
        let actions = drain(&mut c);
        assert_eq!(actions.len(), 1);
        let NegotiationAction::CreateOffer { epoch: reoffer } = actions[0] else {
            panic!("expected a new offer, got {:?}", actions);
        };
        assert!(reoffer > epoch);

        // The next answer pairs with the new offer.
        c.handle_completion(Completion::OfferCreated {
            epoch: reoffer,
            result: Ok(SessionDescription::offer("again")),
        })
        .unwrap();
        drain(&mut c);
        assert_eq!(
            c.handle_remote_answer(SessionDescription::answer("good")).unwrap(),
            AnswerDisposition::Applying
        );
        assert_eq!(
            drain(&mut c),
            vec![NegotiationAction::ApplyAnswer {
                epoch: reoffer,
                answer: SessionDescription::answer("good"),
            }]
        );
    }

    #[test]
    fn test_reset_discards_in_flight_work() {
        let mut c = NegotiationCoordinator::new("PA_local", "node-1");
        let epoch = c.initiate_offer().unwrap();
        c.add_remote_candidate(candidate(0));

        c.reset("PA_new", "node-2");
        assert_eq!(c.role(), NegotiationRole::Idle);
        assert_eq!(c.queued_candidates(), 0);
        assert!(drain(&mut c).is_empty());

        assert!(matches!(
            c.handle_completion(Completion::OfferCreated {
                epoch,
                result: Ok(SessionDescription::offer("old")),
            }),
            Err(Error::StaleNegotiation { .. })
        ));
        assert_eq!(c.role(), NegotiationRole::Idle);

        // Fresh connection: no remote description yet, candidates queue again.
        assert_eq!(c.add_remote_candidate(candidate(1)), CandidateDisposition::Queued);
    }
}
