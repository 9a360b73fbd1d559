//! Session coordinator: the single task that owns all session state.
//!
//! Every input — client frames, timer fires, disconnects — arrives as
//! a [`Command`] on one queue and is handled to completion before the
//! next is taken. Poll termination therefore cannot race with itself:
//! whichever trigger (manual end, quorum, timer expiry) is handled
//! first ends the poll, and the others observe an already-ended poll
//! and do nothing.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use classpoll_core::{compute, ClientEvent, ConnectionId, ServerEvent, SessionError};
use classpoll_store::{ChatRepo, Database, PollRepo};

use crate::chat_relay;
use crate::client::ClientRegistry;
use crate::lifecycle::{CreatedPoll, EndedPoll, PollLifecycle, SubmitOutcome};
use crate::registry::{Departure, ParticipantRegistry};
use crate::timer::{self, TimerEvent, TimerHandle};

/// Polls returned for a `get-past-polls` request.
const PAST_POLLS_LIMIT: u32 = 50;
/// Messages returned for a `get-chat-history` request.
const CHAT_HISTORY_LIMIT: u32 = 50;

const COMMAND_QUEUE_SIZE: usize = 256;

/// One unit of work for the coordinator.
#[derive(Debug)]
pub enum Command {
    /// A parsed frame from a connected client.
    Inbound {
        conn: ConnectionId,
        event: ClientEvent,
    },
    /// A frame that failed to parse.
    Malformed { conn: ConnectionId, error: String },
    /// Countdown progress or expiry.
    Timer(TimerEvent),
    /// A client's socket closed.
    Disconnected { conn: ConnectionId },
}

impl From<TimerEvent> for Command {
    fn from(event: TimerEvent) -> Self {
        Self::Timer(event)
    }
}

pub struct Coordinator {
    registry: ParticipantRegistry,
    lifecycle: PollLifecycle,
    clients: Arc<ClientRegistry>,
    polls: PollRepo,
    chat: ChatRepo,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    timer: Option<TimerHandle>,
}

impl Coordinator {
    pub fn new(clients: Arc<ClientRegistry>, db: Database) -> Self {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_SIZE);
        Self {
            registry: ParticipantRegistry::new(),
            lifecycle: PollLifecycle::new(),
            clients,
            polls: PollRepo::new(db.clone()),
            chat: ChatRepo::new(db),
            commands,
            command_tx,
            timer: None,
        }
    }

    /// Sender half of the command queue, for the transport layer.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.command_tx.clone()
    }

    /// Drain the command queue until every sender is gone.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        tracing::info!("coordinator shutting down");
    }

    /// Handle one command to completion. Synchronous: no await point
    /// can interleave another command mid-transition.
    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Inbound { conn, event } => {
                tracing::debug!(connection_id = %conn, event = event.event_name(), "handling client event");
                self.handle_event(conn, event);
            }
            Command::Malformed { conn, error } => {
                tracing::debug!(connection_id = %conn, %error, "malformed frame");
                self.send(&conn, &ServerEvent::ProtocolError { message: error });
            }
            Command::Timer(event) => self.handle_timer(event),
            Command::Disconnected { conn } => self.handle_disconnect(conn),
        }
    }

    fn handle_event(&mut self, conn: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::JoinAsTeacher => self.join_as_teacher(conn),
            ClientEvent::JoinAsStudent { name } => self.join_as_student(conn, name),
            ClientEvent::CreatePoll {
                question,
                options,
                time_limit,
            } => self.create_poll(conn, question, options, time_limit),
            ClientEvent::SubmitResponse { answer } => self.submit_response(conn, answer),
            ClientEvent::EndPoll => self.end_poll(conn),
            ClientEvent::GetPollResults => self.get_poll_results(conn),
            ClientEvent::GetPastPolls => self.get_past_polls(conn),
            ClientEvent::SendChatMessage { message } => self.send_chat_message(conn, message),
            ClientEvent::GetChatHistory => self.get_chat_history(conn),
            ClientEvent::KickStudent { name } => self.kick_student(conn, name),
        }
    }

    fn join_as_teacher(&mut self, conn: ConnectionId) {
        self.registry.claim_moderator(conn.clone());
        tracing::info!(connection_id = %conn, "moderator joined");
        self.send(
            &conn,
            &ServerEvent::PollStatus {
                current_poll: self.lifecycle.current_poll().cloned(),
                time_remaining: self.lifecycle.time_remaining(),
                connected_students: self.registry.students(),
                students_count: self.registry.count() as u32,
            },
        );
    }

    fn join_as_student(&mut self, conn: ConnectionId, name: String) {
        // A frame can arrive after the transport entry is gone (kick,
        // sweep); joining then would strand an unreachable roster
        // entry that counts toward quorum.
        if !self.clients.is_connected(&conn) {
            tracing::debug!(connection_id = %conn, %name, "join from closed connection ignored");
            return;
        }
        if let Err(err) = self.registry.join(conn.clone(), name.clone()) {
            tracing::info!(connection_id = %conn, %name, "join rejected, name taken");
            self.send(
                &conn,
                &ServerEvent::NameTaken {
                    message: err.to_string(),
                },
            );
            return;
        }
        tracing::info!(connection_id = %conn, %name, count = self.registry.count(), "student joined");

        self.send(&conn, &ServerEvent::JoinedSuccessfully { name: name.clone() });
        self.notify_moderator(&ServerEvent::StudentJoined {
            name: name.clone(),
            students_count: self.registry.count() as u32,
            connected_students: self.registry.students(),
        });

        // A late joiner sees the poll already underway.
        if let Some(poll) = self.lifecycle.current_poll() {
            if poll.is_active() {
                self.send(
                    &conn,
                    &ServerEvent::CurrentPoll {
                        poll: poll.clone(),
                        time_remaining: self.lifecycle.time_remaining(),
                        has_answered: poll.has_answered(&name),
                    },
                );
            }
        }
    }

    fn create_poll(
        &mut self,
        conn: ConnectionId,
        question: String,
        options: Vec<String>,
        time_limit: u32,
    ) {
        let created = match self.lifecycle.create_poll(
            question,
            options,
            time_limit,
            self.registry.count(),
        ) {
            Ok(created) => created,
            Err(err) => {
                tracing::info!(connection_id = %conn, kind = err.error_kind(), "poll creation rejected");
                self.send(
                    &conn,
                    &ServerEvent::PollCreationError {
                        message: err.to_string(),
                    },
                );
                return;
            }
        };

        let CreatedPoll {
            poll,
            epoch,
            superseded,
        } = created;

        if let Some(handle) = self.timer.take() {
            handle.cancel();
        }

        // A finished poll displaced by this one is persisted as ended
        // with no end broadcast.
        if let Some(prev) = superseded {
            let ended_at = prev.ended_at.unwrap_or_else(Utc::now);
            if let Err(err) = self.polls.finalize(&prev.id, ended_at) {
                tracing::error!(poll_id = %prev.id, error = %err, "failed to finalize superseded poll");
            }
        }

        if let Err(err) = self.polls.insert(&poll) {
            tracing::error!(poll_id = %poll.id, error = %err, "failed to persist poll");
        }

        self.timer = Some(timer::start(
            poll.time_limit_secs,
            epoch,
            self.command_tx.clone(),
        ));
        tracing::info!(poll_id = %poll.id, time_limit = poll.time_limit_secs, "poll created");

        self.clients.send_event_to_all(
            &self.registry.student_connections(),
            &ServerEvent::NewPoll {
                poll: poll.clone(),
                time_remaining: poll.time_limit_secs,
            },
        );
        self.send(&conn, &ServerEvent::PollCreated { poll });
    }

    fn submit_response(&mut self, conn: ConnectionId, answer: String) {
        let name = match self.registry.find(&conn) {
            Some(name) => name.to_string(),
            None => {
                self.send(
                    &conn,
                    &ServerEvent::ResponseError {
                        message: SessionError::Unauthorized.to_string(),
                    },
                );
                return;
            }
        };

        let outcome = match self
            .lifecycle
            .submit_response(&name, answer, self.registry.count())
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::info!(connection_id = %conn, %name, kind = err.error_kind(), "response rejected");
                self.send(
                    &conn,
                    &ServerEvent::ResponseError {
                        message: err.to_string(),
                    },
                );
                return;
            }
        };

        match outcome {
            SubmitOutcome::Accepted {
                poll_id,
                response,
                answered_count,
                total_students,
                responses,
            } => {
                if let Err(err) = self.polls.append_response(&poll_id, &response) {
                    tracing::error!(poll_id = %poll_id, error = %err, "failed to persist response");
                }
                tracing::info!(poll_id = %poll_id, %name, answered = answered_count, "response recorded");

                self.send(&conn, &ServerEvent::ResponseSubmitted);
                self.notify_moderator(&ServerEvent::PollResultsUpdate {
                    responses,
                    answered_count: answered_count as u32,
                    total_students: total_students as u32,
                });
            }
            SubmitOutcome::QuorumEnded {
                poll_id,
                response,
                ended,
            } => {
                if let Err(err) = self.polls.append_response(&poll_id, &response) {
                    tracing::error!(poll_id = %poll_id, error = %err, "failed to persist response");
                }
                tracing::info!(poll_id = %poll_id, %name, "final response received, poll ending");

                self.finish_poll(ended);
                self.send(&conn, &ServerEvent::ResponseSubmitted);
            }
        }
    }

    // Moderator-only by convention; the protocol defines no check and
    // no error event for it.
    fn end_poll(&mut self, _conn: ConnectionId) {
        match self.lifecycle.end_poll(self.registry.count()) {
            Some(ended) => self.finish_poll(ended),
            // Already ended in an earlier turn (quorum or expiry won).
            None => tracing::debug!("end-poll with no active poll, nothing to do"),
        }
    }

    fn get_poll_results(&mut self, conn: ConnectionId) {
        if let Some(poll) = self.lifecycle.current_poll() {
            let results = compute(&poll.options, &poll.responses, self.registry.count() as u32);
            self.send(&conn, &ServerEvent::PollResults { results });
        }
    }

    fn get_past_polls(&mut self, conn: ConnectionId) {
        match self.polls.history(PAST_POLLS_LIMIT) {
            Ok(polls) => self.send(&conn, &ServerEvent::PastPolls { polls }),
            Err(err) => {
                tracing::error!(error = %err, "failed to load poll history");
                self.send(
                    &conn,
                    &ServerEvent::PastPollsError {
                        message: "failed to load past polls".into(),
                    },
                );
            }
        }
    }

    fn send_chat_message(&mut self, conn: ConnectionId, body: String) {
        let message = match chat_relay::send(&self.registry, &conn, body) {
            Ok(message) => message,
            Err(err) => {
                self.send(
                    &conn,
                    &ServerEvent::ChatError {
                        message: err.to_string(),
                    },
                );
                return;
            }
        };

        if let Err(err) = self.chat.append(&message) {
            tracing::error!(message_id = %message.id, error = %err, "failed to persist chat message");
        }

        self.broadcast_session(&ServerEvent::NewChatMessage { message });
    }

    fn get_chat_history(&mut self, conn: ConnectionId) {
        match self.chat.recent(CHAT_HISTORY_LIMIT) {
            Ok(messages) => self.send(&conn, &ServerEvent::ChatHistory { messages }),
            Err(err) => {
                tracing::error!(error = %err, "failed to load chat history");
                self.send(
                    &conn,
                    &ServerEvent::ChatHistoryError {
                        message: "failed to load chat history".into(),
                    },
                );
            }
        }
    }

    fn kick_student(&mut self, _conn: ConnectionId, name: String) {
        let Some(target) = self.registry.find_by_name(&name).cloned() else {
            tracing::debug!(%name, "kick-student target not on roster");
            return;
        };
        tracing::info!(%name, connection_id = %target, "kicking student");

        // The notice is queued before the close so it still drains to
        // the socket; roster cleanup happens on the disconnect command.
        self.send(
            &target,
            &ServerEvent::KickedOut {
                message: "you have been removed from the session".into(),
            },
        );
        self.clients.close(&target);
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Tick { epoch, remaining } => {
                if self.lifecycle.tick(epoch, remaining) {
                    self.broadcast_session(&ServerEvent::PollTimeUpdate {
                        seconds_remaining: remaining,
                    });
                }
            }
            TimerEvent::Expired { epoch } => {
                if epoch != self.lifecycle.epoch() {
                    tracing::debug!(epoch, "stale timer expiry ignored");
                    return;
                }
                tracing::info!("poll time limit reached");
                if let Some(ended) = self.lifecycle.end_poll(self.registry.count()) {
                    self.finish_poll(ended);
                }
            }
        }
    }

    fn handle_disconnect(&mut self, conn: ConnectionId) {
        match self.registry.leave(&conn) {
            Some(Departure::Student(name)) => {
                tracing::info!(connection_id = %conn, %name, count = self.registry.count(), "student left");
                self.notify_moderator(&ServerEvent::StudentLeft {
                    name,
                    students_count: self.registry.count() as u32,
                    connected_students: self.registry.students(),
                });
            }
            Some(Departure::Moderator) => {
                // The poll, if any, keeps running; a reconnecting
                // moderator reclaims the slot via join-as-teacher.
                tracing::info!(connection_id = %conn, "moderator left");
            }
            None => {}
        }
    }

    /// Cancel the countdown, persist the end, and announce the final
    /// results to everyone.
    fn finish_poll(&mut self, ended: EndedPoll) {
        if let Some(handle) = self.timer.take() {
            handle.cancel();
        }

        let ended_at = ended.poll.ended_at.unwrap_or_else(Utc::now);
        if let Err(err) = self.polls.finalize(&ended.poll.id, ended_at) {
            tracing::error!(poll_id = %ended.poll.id, error = %err, "failed to finalize poll");
        }
        tracing::info!(
            poll_id = %ended.poll.id,
            responses = ended.results.total_responses,
            "poll ended"
        );

        self.broadcast_session(&ServerEvent::PollEnded {
            poll: ended.poll,
            results: ended.results,
        });
    }

    fn send(&self, conn: &ConnectionId, event: &ServerEvent) {
        self.clients.send_event(conn, event);
    }

    fn notify_moderator(&self, event: &ServerEvent) {
        if let Some(moderator) = self.registry.moderator() {
            self.clients.send_event(moderator, event);
        }
    }

    /// Everyone in the session: all students plus the moderator.
    fn broadcast_session(&self, event: &ServerEvent) {
        let mut targets = self.registry.student_connections();
        if let Some(moderator) = self.registry.moderator() {
            targets.push(moderator.clone());
        }
        self.clients.send_event_to_all(&targets, event);
    }
}
