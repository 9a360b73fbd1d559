use chrono::{DateTime, Utc};
use tracing::instrument;

use classpoll_core::{Poll, PollId, PollStatus, Response};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable copies of polls. The in-memory poll held by the coordinator
/// is the source of truth while active; rows here are written as the
/// session progresses and queried for history.
pub struct PollRepo {
    db: Database,
}

impl PollRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a freshly created poll.
    #[instrument(skip(self, poll), fields(poll_id = %poll.id))]
    pub fn insert(&self, poll: &Poll) -> Result<(), StoreError> {
        let options = serde_json::to_string(&poll.options)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO polls (id, question, options, time_limit_secs, status, created_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    poll.id.as_str(),
                    poll.question,
                    options,
                    poll.time_limit_secs,
                    poll.status.to_string(),
                    poll.created_at.to_rfc3339(),
                    poll.ended_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
    }

    /// Append one accepted response to a poll.
    #[instrument(skip(self, response), fields(poll_id = %poll_id))]
    pub fn append_response(&self, poll_id: &PollId, response: &Response) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let affected = conn.execute(
                "INSERT INTO responses (poll_id, student_name, answer, submitted_at)
                 SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM polls WHERE id = ?1)",
                rusqlite::params![
                    poll_id.as_str(),
                    response.student_name,
                    response.answer,
                    response.submitted_at.to_rfc3339(),
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("poll {poll_id}")));
            }
            Ok(())
        })
    }

    /// Mark a poll ended. Called both for natural termination and when a
    /// finished poll is silently superseded by a new one.
    #[instrument(skip(self), fields(poll_id = %poll_id))]
    pub fn finalize(&self, poll_id: &PollId, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE polls SET status = 'ended', ended_at = ?1 WHERE id = ?2",
                rusqlite::params![ended_at.to_rfc3339(), poll_id.as_str()],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("poll {poll_id}")));
            }
            Ok(())
        })
    }

    /// Ended polls, newest first, with their responses attached.
    #[instrument(skip(self))]
    pub fn history(&self, limit: u32) -> Result<Vec<Poll>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question, options, time_limit_secs, status, created_at, ended_at
                 FROM polls WHERE status = 'ended'
                 ORDER BY created_at DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut polls = Vec::new();
            while let Some(row) = rows.next()? {
                polls.push(row_to_poll(row)?);
            }

            let mut resp_stmt = conn.prepare(
                "SELECT student_name, answer, submitted_at
                 FROM responses WHERE poll_id = ?1 ORDER BY submitted_at",
            )?;
            for poll in &mut polls {
                let mut resp_rows = resp_stmt.query([poll.id.as_str()])?;
                while let Some(row) = resp_rows.next()? {
                    poll.responses.push(row_to_response(row)?);
                }
            }

            Ok(polls)
        })
    }
}

fn row_to_poll(row: &rusqlite::Row<'_>) -> Result<Poll, StoreError> {
    let id: String = row_helpers::get(row, 0, "polls", "id")?;
    let question: String = row_helpers::get(row, 1, "polls", "question")?;
    let options_raw: String = row_helpers::get(row, 2, "polls", "options")?;
    let options: Vec<String> = serde_json::from_str(&options_raw).map_err(|e| {
        StoreError::CorruptRow {
            table: "polls",
            column: "options",
            detail: format!("invalid JSON: {e}"),
        }
    })?;
    let time_limit_secs: u32 = row_helpers::get(row, 3, "polls", "time_limit_secs")?;
    let status_raw: String = row_helpers::get(row, 4, "polls", "status")?;
    let status: PollStatus = row_helpers::parse_enum(&status_raw, "polls", "status")?;
    let created_raw: String = row_helpers::get(row, 5, "polls", "created_at")?;
    let ended_raw: Option<String> = row_helpers::get_opt(row, 6, "polls", "ended_at")?;

    Ok(Poll {
        id: PollId::from_raw(id),
        question,
        options,
        time_limit_secs,
        status,
        created_at: row_helpers::parse_timestamp(&created_raw, "polls", "created_at")?,
        ended_at: ended_raw
            .map(|raw| row_helpers::parse_timestamp(&raw, "polls", "ended_at"))
            .transpose()?,
        responses: Vec::new(),
    })
}

fn row_to_response(row: &rusqlite::Row<'_>) -> Result<Response, StoreError> {
    let student_name: String = row_helpers::get(row, 0, "responses", "student_name")?;
    let answer: String = row_helpers::get(row, 1, "responses", "answer")?;
    let submitted_raw: String = row_helpers::get(row, 2, "responses", "submitted_at")?;
    Ok(Response {
        student_name,
        answer,
        submitted_at: row_helpers::parse_timestamp(&submitted_raw, "responses", "submitted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> PollRepo {
        PollRepo::new(Database::in_memory().unwrap())
    }

    fn sample_poll(question: &str) -> Poll {
        Poll::new(question, vec!["Red".into(), "Blue".into()], 30).unwrap()
    }

    fn sample_response(name: &str, answer: &str) -> Response {
        Response {
            student_name: name.into(),
            answer: answer.into(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_finalize() {
        let repo = repo();
        let poll = sample_poll("Color?");
        repo.insert(&poll).unwrap();

        // Active polls are not part of history
        assert!(repo.history(10).unwrap().is_empty());

        repo.finalize(&poll.id, Utc::now()).unwrap();
        let history = repo.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "Color?");
        assert_eq!(history[0].status, PollStatus::Ended);
        assert!(history[0].ended_at.is_some());
    }

    #[test]
    fn finalize_unknown_poll_is_not_found() {
        let repo = repo();
        let err = repo.finalize(&PollId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn responses_attached_to_history() {
        let repo = repo();
        let poll = sample_poll("Color?");
        repo.insert(&poll).unwrap();
        repo.append_response(&poll.id, &sample_response("Sam", "Red")).unwrap();
        repo.append_response(&poll.id, &sample_response("Alex", "Blue")).unwrap();
        repo.finalize(&poll.id, Utc::now()).unwrap();

        let history = repo.history(10).unwrap();
        assert_eq!(history[0].responses.len(), 2);
        assert_eq!(history[0].responses[0].student_name, "Sam");
        assert_eq!(history[0].responses[1].answer, "Blue");
    }

    #[test]
    fn append_response_to_unknown_poll_fails() {
        let repo = repo();
        let err = repo
            .append_response(&PollId::new(), &sample_response("Sam", "Red"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn history_newest_first_and_bounded() {
        let repo = repo();
        for i in 0..5 {
            let mut poll = sample_poll(&format!("Q{i}?"));
            poll.created_at = Utc::now() + chrono::Duration::seconds(i);
            repo.insert(&poll).unwrap();
            repo.finalize(&poll.id, Utc::now()).unwrap();
        }

        let history = repo.history(3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].question, "Q4?");
        assert_eq!(history[2].question, "Q2?");
    }

    #[test]
    fn options_roundtrip_in_order() {
        let repo = repo();
        let poll =
            Poll::new("Pick", vec!["C".into(), "A".into(), "B".into()], 10).unwrap();
        repo.insert(&poll).unwrap();
        repo.finalize(&poll.id, Utc::now()).unwrap();

        let history = repo.history(1).unwrap();
        assert_eq!(history[0].options, vec!["C", "A", "B"]);
    }
}
