//! Commerce gate
//!
//! Paywall state machine for a locked link, tracked per visitor session:
//!
//! ```text
//! Locked --click--> PaymentPending --payment confirmed--> Unlocked
//!    ^                    |
//!    +--failed/cancel-----+
//! ```
//!
//! `Unlocked` is terminal for a session. Confirmations only come from the
//! verified payment webhook; a client has no way to confirm a payment itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Link;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Locked,
    PaymentPending,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// Visitor clicked the purchase button
    Click,
    /// Visitor closed the payment step
    Cancel,
    /// Processor reported a failed payment
    PaymentFailed,
    /// Processor reported a verified payment
    PaymentConfirmed {
        confirmation_id: String,
        payer: String,
    },
}

impl GateEvent {
    fn name(&self) -> &'static str {
        match self {
            GateEvent::Click => "click",
            GateEvent::Cancel => "cancel",
            GateEvent::PaymentFailed => "payment_failed",
            GateEvent::PaymentConfirmed { .. } => "payment_confirmed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("link {0} is not locked")]
    NotLocked(String),

    #[error("cannot apply {event} while {from:?}")]
    InvalidTransition { from: GateState, event: &'static str },
}

/// Audit record of a granted unlock
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnlockGrant {
    pub link_id: String,
    pub session_id: String,
    pub payer: String,
    pub confirmation_id: String,
    pub granted_at: DateTime<Utc>,
}

/// Content released by an unlock
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Reveal {
    pub link_id: String,
    pub file_url: Option<String>,

    /// Post-unlock destination, when the link also has a URL
    pub destination: Option<String>,
}

impl Reveal {
    fn of(link: &Link) -> Self {
        Reveal {
            link_id: link.id.clone(),
            file_url: link.commerce.as_ref().and_then(|c| c.file_url.clone()),
            destination: Some(link.url.clone()).filter(|url| !url.is_empty()),
        }
    }
}

/// What a successfully applied event did
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Payment step opened
    PaymentPending,
    /// Payment step abandoned, back to locked
    Relocked,
    /// First confirmation for this session
    Unlocked { grant: UnlockGrant, reveal: Reveal },
    /// Duplicate click, failure or confirmation, nothing changed
    Unchanged,
}

/// Gate state of one (link, visitor session) pair
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GateSession {
    pub link_id: String,
    pub session_id: String,
    pub state: GateState,

    /// Number of payment steps opened
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub grant: Option<UnlockGrant>,

    pub updated_at: DateTime<Utc>,
}

impl GateSession {
    /// Starts a session in `Locked`. Unlocked links never enter the gate.
    pub fn open(link: &Link, session_id: &str, now: DateTime<Utc>) -> Result<Self, GateError> {
        ensure_locked(link)?;
        Ok(GateSession {
            link_id: link.id.clone(),
            session_id: session_id.to_string(),
            state: GateState::Locked,
            attempts: 0,
            grant: None,
            updated_at: now,
        })
    }

    /// Applies `event`, returning what changed
    ///
    /// Confirmations are only accepted from `PaymentPending`. Once unlocked,
    /// every further event is a no-op.
    pub fn apply(
        &mut self,
        link: &Link,
        event: GateEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome, GateError> {
        if self.state == GateState::Unlocked {
            return Ok(Outcome::Unchanged);
        }
        ensure_locked(link)?;

        let outcome = match (self.state, event) {
            (GateState::Locked, GateEvent::Click) => {
                self.state = GateState::PaymentPending;
                self.attempts += 1;
                Outcome::PaymentPending
            }
            (GateState::PaymentPending, GateEvent::Click) => Outcome::Unchanged,
            (GateState::PaymentPending, GateEvent::Cancel | GateEvent::PaymentFailed) => {
                self.state = GateState::Locked;
                Outcome::Relocked
            }
            (GateState::Locked, GateEvent::Cancel | GateEvent::PaymentFailed) => Outcome::Unchanged,
            (
                GateState::PaymentPending,
                GateEvent::PaymentConfirmed {
                    confirmation_id,
                    payer,
                },
            ) => {
                let grant = UnlockGrant {
                    link_id: link.id.clone(),
                    session_id: self.session_id.clone(),
                    payer,
                    confirmation_id,
                    granted_at: now,
                };
                self.state = GateState::Unlocked;
                self.grant = Some(grant.clone());
                Outcome::Unlocked {
                    grant,
                    reveal: Reveal::of(link),
                }
            }
            (from, event) => {
                return Err(GateError::InvalidTransition {
                    from,
                    event: event.name(),
                })
            }
        };

        self.updated_at = now;
        Ok(outcome)
    }

    /// Unlocked content for this session, if any
    pub fn access(&self, link: &Link) -> Option<Reveal> {
        (self.state == GateState::Unlocked).then(|| Reveal::of(link))
    }
}

fn ensure_locked(link: &Link) -> Result<(), GateError> {
    if link.is_locked() {
        Ok(())
    } else {
        Err(GateError::NotLocked(link.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Commerce;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn locked_link() -> Link {
        Link {
            id: "c".to_string(),
            owner_id: "owner".to_string(),
            title: "Course".to_string(),
            url: "https://example.com/course".to_string(),
            order: 0,
            is_visible: true,
            smart_rules: None,
            commerce: Some(Commerce {
                is_locked: true,
                price: 99.0,
                currency: "INR".to_string(),
                file_url: Some("https://files.example.com/course.zip".to_string()),
                button_text: Some("Buy".to_string()),
            }),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn confirmed(id: &str) -> GateEvent {
        GateEvent::PaymentConfirmed {
            confirmation_id: id.to_string(),
            payer: "payer@example.com".to_string(),
        }
    }

    #[test]
    fn failed_payment_then_retry_unlocks_once() {
        let link = locked_link();
        let mut session = GateSession::open(&link, "s1", now()).unwrap();

        assert_eq!(session.apply(&link, GateEvent::Click, now()).unwrap(), Outcome::PaymentPending);
        assert_eq!(session.state, GateState::PaymentPending);
        assert!(session.access(&link).is_none());

        assert_eq!(session.apply(&link, GateEvent::PaymentFailed, now()).unwrap(), Outcome::Relocked);
        assert_eq!(session.state, GateState::Locked);

        session.apply(&link, GateEvent::Click, now()).unwrap();
        let Outcome::Unlocked { grant, reveal } = session.apply(&link, confirmed("pay_1"), now()).unwrap() else {
            panic!("expected unlock");
        };
        assert_eq!(session.state, GateState::Unlocked);
        assert_eq!(session.attempts, 2);
        assert_eq!(grant.link_id, "c");
        assert_eq!(grant.payer, "payer@example.com");
        assert_eq!(grant.confirmation_id, "pay_1");
        assert_eq!(reveal.file_url.as_deref(), Some("https://files.example.com/course.zip"));
        assert_eq!(reveal.destination.as_deref(), Some("https://example.com/course"));

        // Redelivery reveals nothing new
        assert_eq!(session.apply(&link, confirmed("pay_1"), now()).unwrap(), Outcome::Unchanged);
        assert_eq!(session.apply(&link, confirmed("pay_2"), now()).unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn confirmation_cannot_skip_payment_pending() {
        let link = locked_link();
        let mut session = GateSession::open(&link, "s1", now()).unwrap();

        let err = session.apply(&link, confirmed("pay_1"), now()).unwrap_err();
        assert_eq!(
            err,
            GateError::InvalidTransition {
                from: GateState::Locked,
                event: "payment_confirmed"
            }
        );
        assert_eq!(session.state, GateState::Locked);
        assert!(session.grant.is_none());
    }

    #[test]
    fn no_event_sequence_unlocks_without_confirmation() {
        let link = locked_link();
        let events = [GateEvent::Click, GateEvent::Cancel, GateEvent::PaymentFailed];

        // Every sequence of length 4 over the non-confirming events
        for i in 0..81usize {
            let mut session = GateSession::open(&link, "s", now()).unwrap();
            let mut n = i;
            for _ in 0..4 {
                let _ = session.apply(&link, events[n % 3].clone(), now());
                n /= 3;
            }
            assert_ne!(session.state, GateState::Unlocked);
        }
    }

    #[test]
    fn unlocked_is_terminal() {
        let link = locked_link();
        let mut session = GateSession::open(&link, "s1", now()).unwrap();
        session.apply(&link, GateEvent::Click, now()).unwrap();
        session.apply(&link, confirmed("pay_1"), now()).unwrap();

        for event in [GateEvent::Cancel, GateEvent::PaymentFailed, GateEvent::Click] {
            assert_eq!(session.apply(&link, event, now()).unwrap(), Outcome::Unchanged);
            assert_eq!(session.state, GateState::Unlocked);
        }
        assert!(session.access(&link).is_some());
    }

    #[test]
    fn open_links_never_enter_the_gate() {
        let mut link = locked_link();
        link.commerce = None;
        assert_eq!(
            GateSession::open(&link, "s1", now()).unwrap_err(),
            GateError::NotLocked("c".to_string())
        );
    }

    #[test]
    fn duplicate_click_keeps_single_pending_step() {
        let link = locked_link();
        let mut session = GateSession::open(&link, "s1", now()).unwrap();
        session.apply(&link, GateEvent::Click, now()).unwrap();
        assert_eq!(session.apply(&link, GateEvent::Click, now()).unwrap(), Outcome::Unchanged);
        assert_eq!(session.attempts, 1);
    }
}
