//! Database initialization, table definitions and the redb-backed store
//!
//! Every table maps string keys to JSON-serialized records. Owner-scoped
//! listings go through index tables whose composite keys keep insertion order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::commerce::{GateEvent, GateSession, Outcome, UnlockGrant};
use crate::config::Config;
use crate::error::StoreError;
use crate::model::{Link, LinkDraft, LinkPatch, Profile, ShortLink, Subscription};
use crate::repository::{
    CommerceStore, GateTransition, LinkStore, ProfileStore, ShortLinkStore, Store, StoreResult,
    SubscriptionStore,
};

/// Links by id
pub const TABLE_LINKS: TableDefinition<&str, &str> = TableDefinition::new("links_v1");

/// Owner index for links
///
/// Key: `"{owner_id}:{sequence:020}:{link_id}"`, value: link id.
/// The zero-padded sequence keeps a prefix range in insertion order.
pub const TABLE_LINK_OWNER_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("link_owner_index_v1");

/// Short links by code
pub const TABLE_SHORT_LINKS: TableDefinition<&str, &str> = TableDefinition::new("short_links_v1");

/// Owner index for short links, same key layout as [`TABLE_LINK_OWNER_INDEX`]
pub const TABLE_SHORT_OWNER_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("short_owner_index_v1");

/// Profiles by username
pub const TABLE_PROFILES: TableDefinition<&str, &str> = TableDefinition::new("profiles_v1");

/// Username claimed by each owner
pub const TABLE_PROFILE_OWNERS: TableDefinition<&str, &str> =
    TableDefinition::new("profile_owners_v1");

/// Commerce gate sessions, key `"{link_id}:{session_id}"`
pub const TABLE_GATE_SESSIONS: TableDefinition<&str, &str> =
    TableDefinition::new("gate_sessions_v1");

/// Unlock audit trail, key `"{link_id}:{confirmation_id}"`
pub const TABLE_UNLOCK_GRANTS: TableDefinition<&str, &str> =
    TableDefinition::new("unlock_grants_v1");

/// Webhook event ids and payment confirmation ids already applied, mapped
/// to the record they touched (`"link:{id}"` or `"subscription:{user_id}"`)
pub const TABLE_PROCESSED_EVENTS: TableDefinition<&str, &str> =
    TableDefinition::new("processed_events_v1");

/// Subscriptions by user id
pub const TABLE_SUBSCRIPTIONS: TableDefinition<&str, &str> =
    TableDefinition::new("subscriptions_v1");

/// Monotonic counters backing the index keys
pub const TABLE_SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences_v1");

const ALL_TABLES: [TableDefinition<&str, &str>; 10] = [
    TABLE_LINKS,
    TABLE_LINK_OWNER_INDEX,
    TABLE_SHORT_LINKS,
    TABLE_SHORT_OWNER_INDEX,
    TABLE_PROFILES,
    TABLE_PROFILE_OWNERS,
    TABLE_GATE_SESSIONS,
    TABLE_UNLOCK_GRANTS,
    TABLE_PROCESSED_EVENTS,
    TABLE_SUBSCRIPTIONS,
];

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: impl Store + 'static, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }
}

/// Creates or opens the database file and makes sure every table exists
///
/// ```no_run
/// # use linkpage::database::init_db;
/// let db = init_db("data.db").expect("Failed to initialize database");
/// ```
pub fn init_db(db_path: &str) -> Result<Database, StoreError> {
    let db = Database::create(db_path)?;

    let write_txn = db.begin_write()?;
    for table in ALL_TABLES {
        write_txn.open_table(table)?;
    }
    write_txn.open_table(TABLE_SEQUENCES)?;
    write_txn.commit()?;

    Ok(db)
}

/// [`Store`] implementation on top of an embedded redb database
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let db = init_db(db_path)?;
        info!(path = db_path, "database ready");
        Ok(Self { db })
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(raw)?)
}

fn encode<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn index_key(owner_id: &str, sequence: u64, id: &str) -> String {
    format!("{}:{:020}:{}", owner_id, sequence, id)
}

/// Bounds of every key starting with `"{prefix}:"`
///
/// `';'` is the byte after `':'`, so `"{prefix};"` bounds every suffix,
/// whatever bytes it contains.
fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{}:", prefix), format!("{};", prefix))
}

fn next_sequence(write_txn: &WriteTransaction, name: &str) -> StoreResult<u64> {
    let mut table = write_txn.open_table(TABLE_SEQUENCES)?;
    let next = table.get(name)?.map(|guard| guard.value()).unwrap_or(0) + 1;
    table.insert(name, next)?;
    Ok(next)
}

/// Removes the index entry of `owner_id` pointing at `value`
fn remove_index_entry(
    index: &mut Table<'_, &'static str, &'static str>,
    owner_id: &str,
    value: &str,
) -> StoreResult<()> {
    let (start, end) = prefix_range(owner_id);
    let mut found = None;
    for entry in index.range(start.as_str()..end.as_str())? {
        let (key, entry_value) = entry?;
        if entry_value.value() == value {
            found = Some(key.value().to_string());
            break;
        }
    }

    if let Some(key) = found {
        index.remove(key.as_str())?;
    }
    Ok(())
}

pub(crate) fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Reads a JSON value from any readable table
fn get_json<T, R>(table: &R, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static str>,
{
    match table.get(key)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Values of every key under `prefix` in an index table
fn index_values<R>(table: &R, prefix: &str) -> StoreResult<Vec<String>>
where
    R: ReadableTable<&'static str, &'static str>,
{
    let (start, end) = prefix_range(prefix);
    let mut values = Vec::new();
    for entry in table.range(start.as_str()..end.as_str())? {
        let (_, value) = entry?;
        values.push(value.value().to_string());
    }
    Ok(values)
}

/// A page of decoded records from a full table scan
fn scan_page<T, R>(table: &R, offset: usize, limit: usize) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static str>,
{
    let mut records = Vec::new();
    for entry in table.iter()?.skip(offset).take(limit) {
        let (_, value) = entry?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

impl LinkStore for RedbStore {
    fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Link>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TABLE_LINK_OWNER_INDEX)?;
        let links = read_txn.open_table(TABLE_LINKS)?;

        let mut result = Vec::new();
        for link_id in index_values(&index, owner_id)? {
            if let Some(link) = get_json::<Link, _>(&links, &link_id)? {
                result.push(link);
            }
        }
        Ok(result)
    }

    fn get_link(&self, link_id: &str) -> StoreResult<Option<Link>> {
        let read_txn = self.db.begin_read()?;
        let links = read_txn.open_table(TABLE_LINKS)?;
        get_json(&links, link_id)
    }

    fn create(&self, owner_id: &str, draft: LinkDraft) -> StoreResult<Link> {
        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        let link = {
            let mut links = write_txn.open_table(TABLE_LINKS)?;
            let mut index = write_txn.open_table(TABLE_LINK_OWNER_INDEX)?;

            let order = match draft.order {
                Some(order) => order,
                None => {
                    let mut next = 0;
                    for link_id in index_values(&index, owner_id)? {
                        if let Some(existing) = get_json::<Link, _>(&links, &link_id)? {
                            next = next.max(existing.order.saturating_add(1));
                        }
                    }
                    next
                }
            };

            let mut id = random_id(12);
            while links.get(id.as_str())?.is_some() {
                id = random_id(12);
            }

            let link = Link {
                id,
                owner_id: owner_id.to_string(),
                title: draft.title,
                url: draft.url,
                order,
                is_visible: draft.is_visible.unwrap_or(true),
                smart_rules: draft.smart_rules,
                commerce: draft.commerce,
                created_at: now,
                updated_at: now,
            };

            let sequence = next_sequence(&write_txn, "links")?;
            links.insert(link.id.as_str(), encode(&link)?.as_str())?;
            index.insert(index_key(owner_id, sequence, &link.id).as_str(), link.id.as_str())?;
            link
        };
        write_txn.commit()?;

        debug!(link_id = %link.id, owner_id, "link created");
        Ok(link)
    }

    fn update_fields(&self, link_id: &str, patch: LinkPatch) -> StoreResult<Link> {
        let write_txn = self.db.begin_write()?;
        let link = {
            let mut links = write_txn.open_table(TABLE_LINKS)?;
            let mut link: Link = get_json(&links, link_id)?
                .ok_or_else(|| StoreError::NotFound(format!("link {}", link_id)))?;

            let LinkPatch {
                title,
                url,
                is_visible,
                smart_rules,
                commerce,
            } = patch;
            if let Some(title) = title {
                link.title = title;
            }
            if let Some(url) = url {
                link.url = url;
            }
            if let Some(is_visible) = is_visible {
                link.is_visible = is_visible;
            }
            if let Some(smart_rules) = smart_rules {
                link.smart_rules = Some(smart_rules);
            }
            if let Some(commerce) = commerce {
                link.commerce = Some(commerce);
            }
            link.updated_at = Utc::now();

            links.insert(link_id, encode(&link)?.as_str())?;
            link
        };
        write_txn.commit()?;

        Ok(link)
    }

    fn delete_by_id(&self, link_id: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut links = write_txn.open_table(TABLE_LINKS)?;
            let link: Link = get_json(&links, link_id)?
                .ok_or_else(|| StoreError::NotFound(format!("link {}", link_id)))?;

            links.remove(link_id)?;
            let mut index = write_txn.open_table(TABLE_LINK_OWNER_INDEX)?;
            remove_index_entry(&mut index, &link.owner_id, link_id)?;
        }
        write_txn.commit()?;

        Ok(())
    }

    fn batch_reorder(&self, owner_id: &str, items: &[(String, i64)]) -> StoreResult<()> {
        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        {
            let mut links = write_txn.open_table(TABLE_LINKS)?;
            // An early return drops the transaction uncommitted, discarding
            // every update made so far.
            for (link_id, order) in items {
                let mut link: Link = get_json(&links, link_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("link {}", link_id)))?;
                if link.owner_id != owner_id {
                    return Err(StoreError::Forbidden(format!("link {}", link_id)));
                }
                link.order = *order;
                link.updated_at = now;
                links.insert(link_id.as_str(), encode(&link)?.as_str())?;
            }
        }
        write_txn.commit()?;

        debug!(owner_id, count = items.len(), "links reordered");
        Ok(())
    }
}

impl ShortLinkStore for RedbStore {
    fn create_short_link(&self, short_link: &ShortLink) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE_SHORT_LINKS)?;
            if table.get(short_link.code.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!("short code {}", short_link.code)));
            }
            table.insert(short_link.code.as_str(), encode(short_link)?.as_str())?;

            let sequence = next_sequence(&write_txn, "short_links")?;
            let mut index = write_txn.open_table(TABLE_SHORT_OWNER_INDEX)?;
            index.insert(
                index_key(&short_link.owner_id, sequence, &short_link.code).as_str(),
                short_link.code.as_str(),
            )?;
        }
        write_txn.commit()?;

        Ok(())
    }

    fn list_short_links(&self, owner_id: &str) -> StoreResult<Vec<ShortLink>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TABLE_SHORT_OWNER_INDEX)?;
        let table = read_txn.open_table(TABLE_SHORT_LINKS)?;

        let mut result = Vec::new();
        for code in index_values(&index, owner_id)? {
            if let Some(short_link) = get_json::<ShortLink, _>(&table, &code)? {
                result.push(short_link);
            }
        }
        Ok(result)
    }

    fn resolve_and_count(&self, code: &str) -> StoreResult<Option<ShortLink>> {
        let write_txn = self.db.begin_write()?;
        let resolved = {
            let mut table = write_txn.open_table(TABLE_SHORT_LINKS)?;
            match get_json::<ShortLink, _>(&table, code)? {
                Some(mut short_link) => {
                    short_link.clicks = short_link.clicks.saturating_add(1);
                    table.insert(code, encode(&short_link)?.as_str())?;
                    Some(short_link)
                }
                None => None,
            }
        };

        if resolved.is_some() {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(resolved)
    }

    fn delete_short_link(&self, owner_id: &str, code: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE_SHORT_LINKS)?;
            let short_link: ShortLink = get_json(&table, code)?
                .ok_or_else(|| StoreError::NotFound(format!("short code {}", code)))?;
            if short_link.owner_id != owner_id {
                return Err(StoreError::Forbidden(format!("short code {}", code)));
            }

            table.remove(code)?;
            let mut index = write_txn.open_table(TABLE_SHORT_OWNER_INDEX)?;
            remove_index_entry(&mut index, owner_id, code)?;
        }
        write_txn.commit()?;

        Ok(())
    }
}

impl ProfileStore for RedbStore {
    fn upsert_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        let write_txn = self.db.begin_write()?;
        let stored = {
            let mut profiles = write_txn.open_table(TABLE_PROFILES)?;
            let mut owners = write_txn.open_table(TABLE_PROFILE_OWNERS)?;

            let mut stored = profile.clone();
            if let Some(existing) = get_json::<Profile, _>(&profiles, &profile.username)? {
                if existing.owner_id != profile.owner_id {
                    return Err(StoreError::Conflict(format!("username {}", profile.username)));
                }
                stored.created_at = existing.created_at;
            }

            let previous = owners
                .get(profile.owner_id.as_str())?
                .map(|guard| guard.value().to_string());
            if let Some(previous) = previous.filter(|u| *u != profile.username) {
                profiles.remove(previous.as_str())?;
            }

            profiles.insert(stored.username.as_str(), encode(&stored)?.as_str())?;
            owners.insert(stored.owner_id.as_str(), stored.username.as_str())?;
            stored
        };
        write_txn.commit()?;

        Ok(stored)
    }

    fn profile_by_username(&self, username: &str) -> StoreResult<Option<Profile>> {
        let read_txn = self.db.begin_read()?;
        let profiles = read_txn.open_table(TABLE_PROFILES)?;
        get_json(&profiles, username)
    }

    fn profile_by_owner(&self, owner_id: &str) -> StoreResult<Option<Profile>> {
        let read_txn = self.db.begin_read()?;
        let owners = read_txn.open_table(TABLE_PROFILE_OWNERS)?;
        let username = owners
            .get(owner_id)?
            .map(|guard| guard.value().to_string());

        match username {
            Some(username) => {
                let profiles = read_txn.open_table(TABLE_PROFILES)?;
                get_json(&profiles, &username)
            }
            None => Ok(None),
        }
    }

    fn list_profiles(&self, offset: usize, limit: usize) -> StoreResult<Vec<Profile>> {
        let read_txn = self.db.begin_read()?;
        let profiles = read_txn.open_table(TABLE_PROFILES)?;
        scan_page(&profiles, offset, limit)
    }
}

impl CommerceStore for RedbStore {
    fn apply_gate_event(
        &self,
        link: &Link,
        session_id: &str,
        event: GateEvent,
        event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<GateTransition> {
        let key = format!("{}:{}", link.id, session_id);
        let target = format!("link:{}", link.id);

        // A delivery is known by its event id; a confirmation also by the
        // confirmation id it carries.
        let mut dedupe_ids: Vec<String> = event_id.map(str::to_string).into_iter().collect();
        if let GateEvent::PaymentConfirmed { confirmation_id, .. } = &event {
            if !dedupe_ids.contains(confirmation_id) {
                dedupe_ids.push(confirmation_id.clone());
            }
        }

        let write_txn = self.db.begin_write()?;
        let transition = {
            let mut sessions = write_txn.open_table(TABLE_GATE_SESSIONS)?;
            let mut processed = write_txn.open_table(TABLE_PROCESSED_EVENTS)?;

            let mut session = match get_json::<GateSession, _>(&sessions, &key)? {
                Some(session) => session,
                None => GateSession::open(link, session_id, now)?,
            };

            let mut replayed = false;
            for id in &dedupe_ids {
                replayed |= processed.get(id.as_str())?.is_some();
            }

            let outcome = if replayed {
                debug!(link_id = %link.id, ?event_id, "payment event already processed");
                Outcome::Unchanged
            } else {
                let outcome = session.apply(link, event, now)?;
                for id in &dedupe_ids {
                    processed.insert(id.as_str(), target.as_str())?;
                }
                outcome
            };

            if outcome != Outcome::Unchanged {
                sessions.insert(key.as_str(), encode(&session)?.as_str())?;
            }
            if let Outcome::Unlocked { grant, .. } = &outcome {
                let mut grants = write_txn.open_table(TABLE_UNLOCK_GRANTS)?;
                grants.insert(
                    format!("{}:{}", link.id, grant.confirmation_id).as_str(),
                    encode(grant)?.as_str(),
                )?;
                info!(
                    link_id = %grant.link_id,
                    payer = %grant.payer,
                    confirmation_id = %grant.confirmation_id,
                    "link unlocked"
                );
            }

            GateTransition { session, outcome }
        };
        write_txn.commit()?;

        Ok(transition)
    }

    fn gate_session(&self, link_id: &str, session_id: &str) -> StoreResult<Option<GateSession>> {
        let read_txn = self.db.begin_read()?;
        let sessions = read_txn.open_table(TABLE_GATE_SESSIONS)?;
        get_json(&sessions, &format!("{}:{}", link_id, session_id))
    }

    fn grants_for_link(&self, link_id: &str) -> StoreResult<Vec<UnlockGrant>> {
        let read_txn = self.db.begin_read()?;
        let grants = read_txn.open_table(TABLE_UNLOCK_GRANTS)?;
        index_values(&grants, link_id)?
            .iter()
            .map(|raw| decode(raw))
            .collect()
    }
}

impl SubscriptionStore for RedbStore {
    fn set_subscription(
        &self,
        user_id: &str,
        active: bool,
        plan: Option<String>,
        event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let write_txn = self.db.begin_write()?;
        let subscription = {
            let mut table = write_txn.open_table(TABLE_SUBSCRIPTIONS)?;
            let mut processed = write_txn.open_table(TABLE_PROCESSED_EVENTS)?;
            let existing = get_json::<Subscription, _>(&table, user_id)?;

            let replayed = match event_id {
                Some(id) => processed.get(id)?.is_some(),
                None => false,
            };

            match existing {
                Some(existing) if replayed => {
                    debug!(user_id, ?event_id, "subscription event already processed");
                    existing
                }
                existing => {
                    let subscription = Subscription {
                        user_id: user_id.to_string(),
                        active,
                        plan: plan.or_else(|| existing.and_then(|e| e.plan)),
                        last_event_id: event_id.map(str::to_string),
                        updated_at: now,
                    };
                    table.insert(user_id, encode(&subscription)?.as_str())?;
                    if let Some(id) = event_id {
                        processed.insert(id, format!("subscription:{}", user_id).as_str())?;
                    }
                    subscription
                }
            }
        };
        write_txn.commit()?;

        Ok(subscription)
    }

    fn subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_SUBSCRIPTIONS)?;
        get_json(&table, user_id)
    }

    fn list_subscriptions(&self, offset: usize, limit: usize) -> StoreResult<Vec<Subscription>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_SUBSCRIPTIONS)?;
        scan_page(&table, offset, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Commerce;
    use tempfile::NamedTempFile;

    fn store() -> (RedbStore, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let store = RedbStore::open(temp_db.path().to_str().unwrap()).unwrap();
        (store, temp_db)
    }

    fn draft(title: &str) -> LinkDraft {
        LinkDraft {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            ..Default::default()
        }
    }

    #[test]
    fn list_keeps_insertion_order_and_assigns_ranks() {
        let (store, _tmp) = store();
        let a = store.create("alice", draft("a")).unwrap();
        let b = store.create("alice", draft("b")).unwrap();
        store.create("bob", draft("x")).unwrap();

        let links = store.list_by_owner("alice").unwrap();
        let ids: Vec<_> = links.iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(links[0].order, 0);
        assert_eq!(links[1].order, 1);
        assert!(store.list_by_owner("nobody").unwrap().is_empty());
    }

    #[test]
    fn batch_reorder_is_all_or_nothing() {
        let (store, _tmp) = store();
        let a = store.create("alice", draft("a")).unwrap();
        let b = store.create("alice", draft("b")).unwrap();
        let foreign = store.create("bob", draft("x")).unwrap();

        let err = store
            .batch_reorder(
                "alice",
                &[(a.id.clone(), 10), (foreign.id.clone(), 0), (b.id.clone(), 5)],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
        assert_eq!(store.get_link(&a.id).unwrap().unwrap().order, 0);

        let err = store
            .batch_reorder("alice", &[(a.id.clone(), 10), ("missing".to_string(), 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.get_link(&a.id).unwrap().unwrap().order, 0);

        store
            .batch_reorder("alice", &[(a.id.clone(), 2), (b.id.clone(), 1)])
            .unwrap();
        assert_eq!(store.get_link(&a.id).unwrap().unwrap().order, 2);
        assert_eq!(store.get_link(&b.id).unwrap().unwrap().order, 1);
    }

    #[test]
    fn update_and_delete() {
        let (store, _tmp) = store();
        let link = store.create("alice", draft("a")).unwrap();

        let updated = store
            .update_fields(
                &link.id,
                LinkPatch {
                    title: Some("renamed".to_string()),
                    is_visible: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "renamed");
        assert!(!updated.is_visible);
        assert_eq!(updated.url, link.url);

        store.delete_by_id(&link.id).unwrap();
        assert!(store.get_link(&link.id).unwrap().is_none());
        assert!(store.list_by_owner("alice").unwrap().is_empty());
        assert!(matches!(
            store.delete_by_id(&link.id).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn resolve_counts_clicks() {
        let (store, _tmp) = store();
        let short_link = ShortLink {
            code: "abc123".to_string(),
            original_url: "https://example.com".to_string(),
            owner_id: "alice".to_string(),
            created_at: Utc::now(),
            clicks: 0,
        };
        store.create_short_link(&short_link).unwrap();
        assert!(matches!(
            store.create_short_link(&short_link).unwrap_err(),
            StoreError::Conflict(_)
        ));

        store.resolve_and_count("abc123").unwrap();
        let resolved = store.resolve_and_count("abc123").unwrap().unwrap();
        assert_eq!(resolved.clicks, 2);
        assert!(store.resolve_and_count("missing").unwrap().is_none());
        assert_eq!(store.list_short_links("alice").unwrap()[0].clicks, 2);
    }

    #[test]
    fn gate_confirmation_is_idempotent() {
        let (store, _tmp) = store();
        let link = store
            .create(
                "alice",
                LinkDraft {
                    commerce: Some(Commerce {
                        is_locked: true,
                        price: 5.0,
                        currency: "USD".to_string(),
                        file_url: Some("https://files.example.com/f".to_string()),
                        button_text: None,
                    }),
                    ..draft("paid")
                },
            )
            .unwrap();
        let now = Utc::now();
        let confirm = GateEvent::PaymentConfirmed {
            confirmation_id: "evt_1".to_string(),
            payer: "s1".to_string(),
        };

        // Confirmation before the payment step is refused and nothing is stored
        assert!(matches!(
            store.apply_gate_event(&link, "s1", confirm.clone(), None, now).unwrap_err(),
            StoreError::Gate(_)
        ));
        assert!(store.gate_session(&link.id, "s1").unwrap().is_none());

        store.apply_gate_event(&link, "s1", GateEvent::Click, None, now).unwrap();
        let first = store.apply_gate_event(&link, "s1", confirm.clone(), None, now).unwrap();
        assert!(matches!(first.outcome, Outcome::Unlocked { .. }));

        let again = store.apply_gate_event(&link, "s1", confirm.clone(), None, now).unwrap();
        assert_eq!(again.outcome, Outcome::Unchanged);

        // The same confirmation cannot unlock another session
        store.apply_gate_event(&link, "s2", GateEvent::Click, None, now).unwrap();
        let other = store.apply_gate_event(&link, "s2", confirm, None, now).unwrap();
        assert_eq!(other.outcome, Outcome::Unchanged);
        assert_eq!(
            store.gate_session(&link.id, "s2").unwrap().unwrap().state,
            crate::commerce::GateState::PaymentPending
        );

        assert_eq!(store.grants_for_link(&link.id).unwrap().len(), 1);
    }

    #[test]
    fn subscription_redelivery_is_ignored() {
        let (store, _tmp) = store();
        let now = Utc::now();

        store
            .set_subscription("alice", true, Some("pro".to_string()), Some("evt_1"), now)
            .unwrap();
        store
            .set_subscription("alice", false, None, Some("evt_2"), now)
            .unwrap();
        let replay = store
            .set_subscription("alice", true, None, Some("evt_2"), now)
            .unwrap();

        assert!(!replay.active);
        assert_eq!(replay.plan.as_deref(), Some("pro"));
        assert_eq!(store.list_subscriptions(0, 10).unwrap().len(), 1);
    }

    #[test]
    fn stale_subscription_redelivery_is_ignored() {
        let (store, _tmp) = store();
        let now = Utc::now();

        store
            .set_subscription("alice", true, Some("pro".to_string()), Some("evt_1"), now)
            .unwrap();
        store
            .set_subscription("alice", false, None, Some("evt_2"), now)
            .unwrap();
        let stale = store
            .set_subscription("alice", true, None, Some("evt_1"), now)
            .unwrap();

        assert!(!stale.active);
        assert_eq!(stale.last_event_id.as_deref(), Some("evt_2"));
        assert!(!store.subscription("alice").unwrap().unwrap().active);
    }

    fn paid_link(store: &RedbStore) -> Link {
        store
            .create(
                "alice",
                LinkDraft {
                    commerce: Some(Commerce {
                        is_locked: true,
                        price: 5.0,
                        currency: "USD".to_string(),
                        file_url: None,
                        button_text: None,
                    }),
                    ..draft("paid")
                },
            )
            .unwrap()
    }

    #[test]
    fn redelivered_failure_does_not_relock() {
        let (store, _tmp) = store();
        let link = paid_link(&store);
        let now = Utc::now();

        store.apply_gate_event(&link, "s1", GateEvent::Click, None, now).unwrap();
        let failed = store
            .apply_gate_event(&link, "s1", GateEvent::PaymentFailed, Some("evt_f"), now)
            .unwrap();
        assert_eq!(failed.outcome, Outcome::Relocked);

        store.apply_gate_event(&link, "s1", GateEvent::Click, None, now).unwrap();
        let replay = store
            .apply_gate_event(&link, "s1", GateEvent::PaymentFailed, Some("evt_f"), now)
            .unwrap();
        assert_eq!(replay.outcome, Outcome::Unchanged);
        assert_eq!(replay.session.state, crate::commerce::GateState::PaymentPending);

        let confirm = GateEvent::PaymentConfirmed {
            confirmation_id: "evt_ok".to_string(),
            payer: "s1".to_string(),
        };
        let unlocked = store
            .apply_gate_event(&link, "s1", confirm, Some("evt_ok"), now)
            .unwrap();
        assert!(matches!(unlocked.outcome, Outcome::Unlocked { .. }));
    }

    #[test]
    fn grants_listed_whatever_the_confirmation_id() {
        let (store, _tmp) = store();
        let link = paid_link(&store);
        let now = Utc::now();

        for (session, id) in [("s1", "~evt"), ("s2", "evt-\u{e9}"), ("s3", "{evt}")] {
            store.apply_gate_event(&link, session, GateEvent::Click, None, now).unwrap();
            let confirm = GateEvent::PaymentConfirmed {
                confirmation_id: id.to_string(),
                payer: session.to_string(),
            };
            store.apply_gate_event(&link, session, confirm, Some(id), now).unwrap();
        }

        let mut ids: Vec<String> = store
            .grants_for_link(&link.id)
            .unwrap()
            .into_iter()
            .map(|grant| grant.confirmation_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["evt-\u{e9}", "{evt}", "~evt"]);

        // Grants of another link stay separate
        let other = paid_link(&store);
        assert!(store.grants_for_link(&other.id).unwrap().is_empty());
    }

    #[test]
    fn default_order_saturates() {
        let (store, _tmp) = store();
        store
            .create(
                "alice",
                LinkDraft {
                    order: Some(i64::MAX),
                    ..draft("last")
                },
            )
            .unwrap();

        let next = store.create("alice", draft("next")).unwrap();
        assert_eq!(next.order, i64::MAX);
    }

    #[test]
    fn usernames_are_exclusive() {
        let (store, _tmp) = store();
        let profile = |username: &str, owner: &str| Profile {
            username: username.to_string(),
            owner_id: owner.to_string(),
            display_name: None,
            bio: None,
            created_at: Utc::now(),
        };

        store.upsert_profile(&profile("alice", "u1")).unwrap();
        assert!(matches!(
            store.upsert_profile(&profile("alice", "u2")).unwrap_err(),
            StoreError::Conflict(_)
        ));

        // Renaming releases the old username
        store.upsert_profile(&profile("alice2", "u1")).unwrap();
        assert!(store.profile_by_username("alice").unwrap().is_none());
        assert_eq!(
            store.profile_by_owner("u1").unwrap().unwrap().username,
            "alice2"
        );
    }
}
