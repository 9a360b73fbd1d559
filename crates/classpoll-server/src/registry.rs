//! Participant roster for the session.
//!
//! Participation is keyed by display name, not by connection: a name
//! can be present at most once, names are case-sensitive, and the
//! moderator slot is separate from the student roster. Only the
//! coordinator task touches this type, so it needs no interior
//! mutability.

use classpoll_core::{ConnectionId, SessionError, StudentInfo};

/// What a departing connection was, as far as the session is
/// concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Departure {
    Student(String),
    Moderator,
}

/// Roster of joined participants. Students are kept in join order so
/// roster snapshots are stable across broadcasts.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    students: Vec<(ConnectionId, String)>,
    moderator: Option<ConnectionId>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join as a student under `name`. Fails if the exact name is
    /// already on the roster.
    pub fn join(&mut self, conn: ConnectionId, name: String) -> Result<(), SessionError> {
        if self.students.iter().any(|(_, n)| *n == name) {
            return Err(SessionError::NameTaken(name));
        }
        self.students.push((conn, name));
        Ok(())
    }

    /// Claim the moderator slot. A later claim displaces an earlier
    /// one; the displaced connection simply stops receiving
    /// moderator-only events.
    pub fn claim_moderator(&mut self, conn: ConnectionId) {
        if let Some(prev) = self.moderator.replace(conn) {
            tracing::debug!(previous = %prev, "moderator slot reclaimed");
        }
    }

    /// Remove a connection from the roster. Returns what it was, or
    /// `None` if it had never joined. A connection holding both roles
    /// loses both; the student departure is the one reported, since
    /// it is the one that affects quorum. Idempotent.
    pub fn leave(&mut self, conn: &ConnectionId) -> Option<Departure> {
        let was_moderator = self.moderator.as_ref() == Some(conn);
        if was_moderator {
            self.moderator = None;
        }
        if let Some(pos) = self.students.iter().position(|(c, _)| c == conn) {
            let (_, name) = self.students.remove(pos);
            return Some(Departure::Student(name));
        }
        if was_moderator {
            return Some(Departure::Moderator);
        }
        None
    }

    /// Number of joined students. The moderator is not a participant.
    pub fn count(&self) -> usize {
        self.students.len()
    }

    pub fn is_moderator(&self, conn: &ConnectionId) -> bool {
        self.moderator.as_ref() == Some(conn)
    }

    pub fn moderator(&self) -> Option<&ConnectionId> {
        self.moderator.as_ref()
    }

    /// Display name for a student connection.
    pub fn find(&self, conn: &ConnectionId) -> Option<&str> {
        self.students
            .iter()
            .find(|(c, _)| c == conn)
            .map(|(_, n)| n.as_str())
    }

    /// Connection currently holding `name`, if any.
    pub fn find_by_name(&self, name: &str) -> Option<&ConnectionId> {
        self.students
            .iter()
            .find(|(_, n)| n == name)
            .map(|(c, _)| c)
    }

    /// Roster snapshot in join order.
    pub fn students(&self) -> Vec<StudentInfo> {
        self.students
            .iter()
            .map(|(conn, name)| StudentInfo {
                name: name.clone(),
                connection_id: conn.clone(),
            })
            .collect()
    }

    /// Connections of all joined students.
    pub fn student_connections(&self) -> Vec<ConnectionId> {
        self.students.iter().map(|(c, _)| c.clone()).collect()
    }
}
