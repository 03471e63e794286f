//! Store interfaces
//!
//! Handlers and the resolver only talk to storage through these traits, so
//! the evaluation core can be exercised without a real backend.

use chrono::{DateTime, Utc};

use crate::commerce::{GateEvent, GateSession, Outcome, UnlockGrant};
use crate::error::StoreError;
use crate::model::{Link, LinkDraft, LinkPatch, Profile, ShortLink, Subscription};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait LinkStore: Send + Sync {
    /// All links of `owner_id` in stored (insertion) sequence
    fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Link>>;

    fn get_link(&self, link_id: &str) -> StoreResult<Option<Link>>;

    fn create(&self, owner_id: &str, draft: LinkDraft) -> StoreResult<Link>;

    /// Applies the present fields of `patch` and returns the updated link
    fn update_fields(&self, link_id: &str, patch: LinkPatch) -> StoreResult<Link>;

    fn delete_by_id(&self, link_id: &str) -> StoreResult<()>;

    /// Sets `order` on several links at once
    ///
    /// All updates land in one transaction. An unknown id or a link owned by
    /// someone else aborts the whole batch.
    fn batch_reorder(&self, owner_id: &str, items: &[(String, i64)]) -> StoreResult<()>;
}

pub trait ShortLinkStore: Send + Sync {
    /// Inserts a short link, failing with `Conflict` if the code is taken
    fn create_short_link(&self, short_link: &ShortLink) -> StoreResult<()>;

    fn list_short_links(&self, owner_id: &str) -> StoreResult<Vec<ShortLink>>;

    /// Looks up `code` and bumps its click counter in the same write
    fn resolve_and_count(&self, code: &str) -> StoreResult<Option<ShortLink>>;

    fn delete_short_link(&self, owner_id: &str, code: &str) -> StoreResult<()>;
}

pub trait ProfileStore: Send + Sync {
    /// Claims `profile.username` for `profile.owner_id`, releasing any
    /// username the owner held before
    fn upsert_profile(&self, profile: &Profile) -> StoreResult<Profile>;

    fn profile_by_username(&self, username: &str) -> StoreResult<Option<Profile>>;

    fn profile_by_owner(&self, owner_id: &str) -> StoreResult<Option<Profile>>;

    fn list_profiles(&self, offset: usize, limit: usize) -> StoreResult<Vec<Profile>>;
}

/// Result of applying one gate event
#[derive(Debug, Clone)]
pub struct GateTransition {
    pub session: GateSession,
    pub outcome: Outcome,
}

pub trait CommerceStore: Send + Sync {
    /// Applies `event` to the (link, session) gate inside one transaction
    ///
    /// `event_id` identifies a webhook delivery. An id that was already
    /// processed, or a confirmation id that was already applied, is a no-op.
    fn apply_gate_event(
        &self,
        link: &Link,
        session_id: &str,
        event: GateEvent,
        event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<GateTransition>;

    fn gate_session(&self, link_id: &str, session_id: &str) -> StoreResult<Option<GateSession>>;

    /// Unlock audit trail of a link
    fn grants_for_link(&self, link_id: &str) -> StoreResult<Vec<UnlockGrant>>;
}

pub trait SubscriptionStore: Send + Sync {
    /// Sets the subscription state of `user_id`
    ///
    /// An `event_id` that was already processed leaves the record untouched,
    /// even when other events were applied in between.
    fn set_subscription(
        &self,
        user_id: &str,
        active: bool,
        plan: Option<String>,
        event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription>;

    fn subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>>;

    fn list_subscriptions(&self, offset: usize, limit: usize) -> StoreResult<Vec<Subscription>>;
}

/// Everything the HTTP layer needs from storage
pub trait Store: LinkStore + ShortLinkStore + ProfileStore + CommerceStore + SubscriptionStore {}

impl<T> Store for T where T: LinkStore + ShortLinkStore + ProfileStore + CommerceStore + SubscriptionStore {}
