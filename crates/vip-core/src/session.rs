//! Call state machine
//!
//! ```text
//! Idle ──START──► Started ──PROCEEDING──► Proceeding ──ALERTING──► Alerting ──CONNECT──► Connected
//!                    │                         │                                   ▲
//!                    └──────── ALERTING / CONNECT may skip ahead ──────────────────┘
//!
//! any state ──RELEASE──► Closed
//! ```
//!
//! PROCEEDING, ALERTING and CONNECT travel from callee to caller only. A
//! message that does not fit the current state is refused and leaves the
//! call untouched.

use crate::csp::{Message, ReleaseCause};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CallState {
    #[default]
    Idle,
    Started,
    Proceeding,
    Alerting,
    Connected,
    Closed,
}

/// Which end of the call this side is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Sent,
    Received,
}

/// Call progress on one CTP connection
#[derive(Debug, Clone, Default)]
pub struct Call {
    state: CallState,
    role: Option<CallRole>,
    call_id: Option<u32>,
    release_cause: Option<ReleaseCause>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Set once the START has been seen
    pub fn role(&self) -> Option<CallRole> {
        self.role
    }

    pub fn call_id(&self) -> Option<u32> {
        self.call_id
    }

    /// Cause carried by the RELEASE that closed the call
    pub fn release_cause(&self) -> Option<ReleaseCause> {
        self.release_cause
    }

    pub fn is_closed(&self) -> bool {
        self.state == CallState::Closed
    }

    /// Apply a message this side sent. Returns false if refused.
    pub fn on_sent(&mut self, message: &Message) -> bool {
        self.apply(message, Direction::Sent)
    }

    /// Apply a message this side received. Returns false if refused.
    pub fn on_received(&mut self, message: &Message) -> bool {
        self.apply(message, Direction::Received)
    }

    fn apply(&mut self, message: &Message, direction: Direction) -> bool {
        let next = match message {
            Message::Start(start) => {
                if self.state != CallState::Idle {
                    return self.refuse(message);
                }
                self.role = Some(match direction {
                    Direction::Sent => CallRole::Caller,
                    Direction::Received => CallRole::Callee,
                });
                self.call_id = Some(start.call_id);
                CallState::Started
            }
            Message::Proceeding => {
                if !self.from_callee(direction) || self.state != CallState::Started {
                    return self.refuse(message);
                }
                CallState::Proceeding
            }
            Message::Alerting(_) => {
                if !self.from_callee(direction)
                    || !matches!(
                        self.state,
                        CallState::Started | CallState::Proceeding | CallState::Alerting
                    )
                {
                    return self.refuse(message);
                }
                CallState::Alerting
            }
            Message::Connect => {
                if !self.from_callee(direction)
                    || !matches!(
                        self.state,
                        CallState::Started | CallState::Proceeding | CallState::Alerting
                    )
                {
                    return self.refuse(message);
                }
                CallState::Connected
            }
            Message::Release(release) => {
                if self.state == CallState::Closed {
                    return self.refuse(message);
                }
                self.release_cause = Some(release.cause);
                CallState::Closed
            }
            // In-call records ride along without moving the state
            _ => {
                if matches!(self.state, CallState::Idle | CallState::Closed) {
                    return self.refuse(message);
                }
                return true;
            }
        };

        if next != self.state {
            debug!(
                "call {:?}: {:?} -> {:?} ({:?} {})",
                self.call_id,
                self.state,
                next,
                direction,
                message.message_type().name()
            );
            self.state = next;
        }
        true
    }

    fn from_callee(&self, direction: Direction) -> bool {
        matches!(
            (self.role, direction),
            (Some(CallRole::Callee), Direction::Sent) | (Some(CallRole::Caller), Direction::Received)
        )
    }

    fn refuse(&self, message: &Message) -> bool {
        trace!(
            "call {:?}: {} refused in state {:?}",
            self.call_id,
            message.message_type().name(),
            self.state
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::{AlertType, AlertingMessage, CallType, ReleaseMessage, StartMessage};
    use crate::LogicalAddress;

    fn start() -> Message {
        Message::Start(StartMessage::new(
            LogicalAddress::parse("456:1").unwrap(),
            LogicalAddress::parse("123").unwrap(),
            CallType::Normal,
            1,
        ))
    }

    #[test]
    fn test_caller_full_progression() {
        let mut call = Call::new();
        assert!(call.on_sent(&start()));
        assert_eq!(call.role(), Some(CallRole::Caller));
        assert!(call.on_received(&Message::Proceeding));
        assert!(call.on_received(&Message::Alerting(AlertingMessage {
            alert: AlertType::Ringing
        })));
        assert!(call.on_received(&Message::Connect));
        assert_eq!(call.state(), CallState::Connected);
        assert!(call.on_sent(&Message::Release(ReleaseMessage::new(ReleaseCause::Normal))));
        assert!(call.is_closed());
        assert_eq!(call.release_cause(), Some(ReleaseCause::Normal));
    }

    #[test]
    fn test_callee_cannot_receive_connect() {
        let mut call = Call::new();
        assert!(call.on_received(&start()));
        assert!(!call.on_received(&Message::Connect));
        assert_eq!(call.state(), CallState::Started);
        assert!(call.on_sent(&Message::Connect));
        assert_eq!(call.state(), CallState::Connected);
    }

    #[test]
    fn test_out_of_order_is_refused() {
        let mut call = Call::new();
        assert!(!call.on_received(&Message::Connect));
        assert_eq!(call.state(), CallState::Idle);

        assert!(call.on_sent(&start()));
        assert!(!call.on_sent(&start()));
        assert!(call.on_received(&Message::Connect));
        assert!(!call.on_received(&Message::Proceeding));
        assert_eq!(call.state(), CallState::Connected);
    }

    #[test]
    fn test_release_from_idle_closes() {
        let mut call = Call::new();
        assert!(call.on_received(&Message::Release(ReleaseMessage::new(ReleaseCause::Busy))));
        assert!(call.is_closed());
        assert!(!call.on_received(&Message::Release(ReleaseMessage::new(ReleaseCause::Busy))));
    }
}
