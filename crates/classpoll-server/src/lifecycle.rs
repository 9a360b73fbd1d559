//! Poll lifecycle: the one current poll, its epoch, and the rules for
//! creating, answering, and ending it.
//!
//! Owned exclusively by the coordinator task, so every transition here
//! happens within a single command turn. That is what makes the
//! idempotent-end and create-vs-expiry races trivial: the second
//! attempt at a transition simply observes the state the first one
//! left behind.

use classpoll_core::{compute, AggregateResult, Poll, PollId, Response, SessionError};
use chrono::Utc;

/// Outcome of a successful create: the new poll, the epoch its timer
/// must carry, and a previously-active poll that was silently flipped
/// to ended (persisted but never broadcast).
#[derive(Debug)]
pub struct CreatedPoll {
    pub poll: Poll,
    pub epoch: u64,
    pub superseded: Option<Poll>,
}

/// A poll that has just been ended, with its final tallies.
#[derive(Debug)]
pub struct EndedPoll {
    pub poll: Poll,
    pub results: AggregateResult,
}

/// Outcome of an accepted response.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Recorded; the poll stays open.
    Accepted {
        poll_id: PollId,
        response: Response,
        answered_count: usize,
        total_students: usize,
        responses: Vec<Response>,
    },
    /// Recorded, and it was the last outstanding answer, so the poll
    /// ended in the same turn.
    QuorumEnded {
        poll_id: PollId,
        response: Response,
        ended: EndedPoll,
    },
}

/// State machine for the session's single poll slot.
#[derive(Debug, Default)]
pub struct PollLifecycle {
    current: Option<Poll>,
    epoch: u64,
    time_remaining: u32,
}

impl PollLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_poll(&self) -> Option<&Poll> {
        self.current.as_ref()
    }

    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// A poll is in progress when it is active and some joined student
    /// has not answered yet. An active poll with no joined students,
    /// or one every student has answered, does not block creation.
    pub fn poll_in_progress(&self, participant_count: usize) -> bool {
        match &self.current {
            Some(poll) => {
                poll.is_active()
                    && participant_count > 0
                    && poll.responded_count() < participant_count
            }
            None => false,
        }
    }

    /// Create a new poll. A finished-but-still-current poll is
    /// superseded: flipped to ended and returned for persistence, with
    /// no end broadcast.
    pub fn create_poll(
        &mut self,
        question: String,
        options: Vec<String>,
        time_limit_secs: u32,
        participant_count: usize,
    ) -> Result<CreatedPoll, SessionError> {
        if self.poll_in_progress(participant_count) {
            return Err(SessionError::PollInProgress);
        }

        let poll = Poll::new(question, options, time_limit_secs)?;

        let superseded = match self.current.take() {
            Some(mut prev) if prev.is_active() => {
                prev.end();
                Some(prev)
            }
            _ => None,
        };

        self.epoch += 1;
        self.time_remaining = poll.time_limit_secs;
        self.current = Some(poll.clone());

        Ok(CreatedPoll {
            poll,
            epoch: self.epoch,
            superseded,
        })
    }

    /// Record one student's answer. The answer text is stored as sent;
    /// it is not checked against the option list. When the last
    /// outstanding student answers, the poll ends in the same call.
    pub fn submit_response(
        &mut self,
        student_name: &str,
        answer: String,
        participant_count: usize,
    ) -> Result<SubmitOutcome, SessionError> {
        let poll = match self.current.as_mut() {
            Some(poll) if poll.is_active() => poll,
            _ => return Err(SessionError::NoActivePoll),
        };
        if poll.has_answered(student_name) {
            return Err(SessionError::DuplicateResponse(student_name.to_string()));
        }

        let response = Response {
            student_name: student_name.to_string(),
            answer,
            submitted_at: Utc::now(),
        };
        poll.responses.push(response.clone());

        let poll_id = poll.id.clone();
        let answered_count = poll.responded_count();

        if participant_count > 0 && answered_count >= participant_count {
            // The poll was just observed active, so the end cannot miss.
            if let Some(ended) = self.end_poll(participant_count) {
                return Ok(SubmitOutcome::QuorumEnded {
                    poll_id,
                    response,
                    ended,
                });
            }
        }

        let responses = self
            .current
            .as_ref()
            .map(|p| p.responses.clone())
            .unwrap_or_default();
        Ok(SubmitOutcome::Accepted {
            poll_id,
            response,
            answered_count,
            total_students: participant_count,
            responses,
        })
    }

    /// End the current poll if it is still active. Returns `None` when
    /// there is nothing to end, which is how a second end attempt in
    /// the same race (manual end vs. timer expiry vs. quorum) becomes
    /// a no-op.
    pub fn end_poll(&mut self, participant_count: usize) -> Option<EndedPoll> {
        let poll = self.current.as_mut()?;
        if !poll.is_active() {
            return None;
        }
        poll.end();
        self.epoch += 1;
        self.time_remaining = 0;

        let poll = poll.clone();
        let results = compute(&poll.options, &poll.responses, participant_count as u32);
        Some(EndedPoll { poll, results })
    }

    /// Record a timer tick. Ignored when the tick's epoch is stale or
    /// the poll is no longer active. Returns whether the tick applied.
    pub fn tick(&mut self, epoch: u64, remaining: u32) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match &self.current {
            Some(poll) if poll.is_active() => {
                self.time_remaining = remaining;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn create(lc: &mut PollLifecycle, participants: usize) -> CreatedPoll {
        lc.create_poll("Color?".into(), opts(&["Red", "Blue"]), 60, participants)
            .unwrap()
    }

    #[test]
    fn create_sets_current_and_bumps_epoch() {
        let mut lc = PollLifecycle::new();
        assert_eq!(lc.epoch(), 0);

        let created = create(&mut lc, 3);
        assert_eq!(created.epoch, 1);
        assert!(created.superseded.is_none());
        assert_eq!(lc.time_remaining(), 60);
        assert!(lc.current_poll().unwrap().is_active());
    }

    #[test]
    fn create_blocked_while_poll_in_progress() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);

        let err = lc
            .create_poll("Next?".into(), opts(&["A", "B"]), 30, 2)
            .unwrap_err();
        assert_eq!(err, SessionError::PollInProgress);
    }

    #[test]
    fn active_poll_with_no_students_does_not_block_create() {
        let mut lc = PollLifecycle::new();
        let first = create(&mut lc, 0);

        let second = create(&mut lc, 0);
        assert_eq!(second.epoch, 2);
        // Prior active poll is silently flipped to ended for persistence.
        let superseded = second.superseded.unwrap();
        assert_eq!(superseded.id, first.poll.id);
        assert!(!superseded.is_active());
    }

    #[test]
    fn fully_answered_poll_does_not_block_create() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 1);
        lc.submit_response("Sam", "Red".into(), 1).unwrap();

        // Quorum already ended it, so no supersede this time.
        let second = lc
            .create_poll("Next?".into(), opts(&["A", "B"]), 30, 1)
            .unwrap();
        assert!(second.superseded.is_none());
    }

    #[test]
    fn ended_poll_stays_current_until_replaced() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);
        lc.end_poll(2).unwrap();

        let current = lc.current_poll().unwrap();
        assert!(!current.is_active());
    }

    #[test]
    fn submit_without_poll_is_rejected() {
        let mut lc = PollLifecycle::new();
        let err = lc.submit_response("Sam", "Red".into(), 1).unwrap_err();
        assert_eq!(err, SessionError::NoActivePoll);
    }

    #[test]
    fn submit_after_end_is_rejected() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);
        lc.end_poll(2).unwrap();

        let err = lc.submit_response("Sam", "Red".into(), 2).unwrap_err();
        assert_eq!(err, SessionError::NoActivePoll);
    }

    #[test]
    fn duplicate_response_rejected_and_first_kept() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 3);
        lc.submit_response("Sam", "Red".into(), 3).unwrap();

        let err = lc.submit_response("Sam", "Blue".into(), 3).unwrap_err();
        assert_eq!(err, SessionError::DuplicateResponse("Sam".into()));

        let poll = lc.current_poll().unwrap();
        assert_eq!(poll.responses.len(), 1);
        assert_eq!(poll.responses[0].answer, "Red");
    }

    #[test]
    fn partial_responses_report_progress() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 3);

        match lc.submit_response("Sam", "Red".into(), 3).unwrap() {
            SubmitOutcome::Accepted {
                answered_count,
                total_students,
                responses,
                ..
            } => {
                assert_eq!(answered_count, 1);
                assert_eq!(total_students, 3);
                assert_eq!(responses.len(), 1);
            }
            SubmitOutcome::QuorumEnded { .. } => panic!("quorum with 1 of 3"),
        }
    }

    #[test]
    fn last_response_ends_poll_by_quorum() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);
        lc.submit_response("Sam", "Red".into(), 2).unwrap();

        match lc.submit_response("Ada", "Blue".into(), 2).unwrap() {
            SubmitOutcome::QuorumEnded { ended, .. } => {
                assert!(!ended.poll.is_active());
                assert_eq!(ended.results.total_responses, 2);
                assert_eq!(ended.results.results[0].percentage, 50.0);
                assert_eq!(ended.results.results[1].percentage, 50.0);
            }
            SubmitOutcome::Accepted { .. } => panic!("expected quorum end"),
        }
        assert!(!lc.current_poll().unwrap().is_active());
    }

    #[test]
    fn unlisted_answer_is_stored_verbatim() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);
        lc.submit_response("Sam", "Green".into(), 2).unwrap();

        let poll = lc.current_poll().unwrap();
        assert_eq!(poll.responses[0].answer, "Green");

        let ended = lc.end_poll(2).unwrap();
        assert_eq!(ended.results.total_responses, 1);
        assert_eq!(ended.results.results[0].count, 0);
        assert_eq!(ended.results.results[1].count, 0);
    }

    #[test]
    fn end_is_idempotent() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);

        assert!(lc.end_poll(2).is_some());
        assert!(lc.end_poll(2).is_none());
        assert!(lc.end_poll(2).is_none());
    }

    #[test]
    fn end_with_zero_answers_yields_zero_tallies() {
        let mut lc = PollLifecycle::new();
        create(&mut lc, 2);

        let ended = lc.end_poll(2).unwrap();
        assert_eq!(ended.results.total_responses, 0);
        for tally in &ended.results.results {
            assert_eq!(tally.count, 0);
            assert_eq!(tally.percentage, 0.0);
        }
    }

    #[test]
    fn stale_epoch_tick_is_ignored() {
        let mut lc = PollLifecycle::new();
        let created = create(&mut lc, 2);
        assert!(lc.tick(created.epoch, 42));
        assert_eq!(lc.time_remaining(), 42);

        lc.end_poll(2).unwrap();
        // A tick from the old timer generation no longer applies.
        assert!(!lc.tick(created.epoch, 10));
        assert_eq!(lc.time_remaining(), 0);
    }

    #[test]
    fn end_bumps_epoch_so_expiry_of_old_timer_is_stale() {
        let mut lc = PollLifecycle::new();
        let created = create(&mut lc, 2);
        lc.end_poll(2).unwrap();
        assert_ne!(lc.epoch(), created.epoch);
    }
}
