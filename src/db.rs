use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Names of the two durable collections.
pub const CURRENT: &str = "current";
pub const SOLD: &str = "sold";

// ============================================================================
// LISTING STATUS
// ============================================================================

/// Feed status is an open string domain: anything that is not exactly
/// `current` or `sold` (withdrawn, offmarket, deleted, ...) means the
/// listing left the market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ListingStatus {
    Current,
    Sold,
    Other(String),
}

impl ListingStatus {
    /// Matching is exact and case-sensitive, like the feed itself.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "current" => ListingStatus::Current,
            "sold" => ListingStatus::Sold,
            other => ListingStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ListingStatus::Current => "current",
            ListingStatus::Sold => "sold",
            ListingStatus::Other(raw) => raw,
        }
    }

    pub fn is_sold(&self) -> bool {
        matches!(self, ListingStatus::Sold)
    }

    pub fn is_current(&self) -> bool {
        matches!(self, ListingStatus::Current)
    }
}

impl From<String> for ListingStatus {
    fn from(raw: String) -> Self {
        ListingStatus::parse(&raw)
    }
}

impl From<ListingStatus> for String {
    fn from(status: ListingStatus) -> Self {
        status.as_str().to_string()
    }
}

// ============================================================================
// LISTING
// ============================================================================

/// One property listing as reconciled into the current/sold collections.
/// Serialized field names follow the feed's camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(rename = "uniqueID")]
    pub unique_id: String,

    pub status: ListingStatus,

    /// Responsible agent, if the feed named one. Listings without agent
    /// information never enter reconciliation.
    #[serde(rename = "agentName", default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// Feed modification time. Only used to order sold listings for
    /// eviction; older entries are evicted first.
    #[serde(rename = "modTime")]
    pub mod_time: NaiveDateTime,

    /// Remaining feed fields, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Listing {
    pub fn new(unique_id: &str, status: ListingStatus, mod_time: NaiveDateTime) -> Self {
        Listing {
            unique_id: unique_id.to_string(),
            status,
            agent_name: None,
            mod_time,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder pattern: set the responsible agent
    pub fn with_agent(mut self, agent_name: &str) -> Self {
        self.agent_name = Some(agent_name.to_string());
        self
    }

    /// Builder pattern: add a pass-through attribute
    pub fn with_attribute(mut self, name: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

// ============================================================================
// COLLECTION
// ============================================================================

/// Insertion-ordered set of listings keyed by uniqueID.
///
/// Order is preserved across save/load, so two runs over the same input
/// publish byte-identical JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    listings: Vec<Listing>,
}

impl Collection {
    pub fn new() -> Self {
        Collection::default()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.get(unique_id).is_some()
    }

    pub fn get(&self, unique_id: &str) -> Option<&Listing> {
        self.listings.iter().find(|l| l.unique_id == unique_id)
    }

    /// Insert a listing. The id must not already be present; callers that
    /// replace an entry remove the old one first.
    pub fn insert(&mut self, listing: Listing) -> Result<()> {
        if self.contains(&listing.unique_id) {
            bail!("duplicate uniqueID '{}' in collection", listing.unique_id);
        }
        self.listings.push(listing);
        Ok(())
    }

    /// Remove a listing by id. Absent ids are a no-op, never an error.
    pub fn remove(&mut self, unique_id: &str) -> Option<Listing> {
        let position = self.listings.iter().position(|l| l.unique_id == unique_id)?;
        Some(self.listings.remove(position))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listing> {
        self.listings.iter()
    }
}

// ============================================================================
// LISTING STORE
// ============================================================================

/// SQLite-backed persistence for the current/sold collections.
///
/// Collections are loaded once before a batch and saved once after it, so a
/// crash mid-batch loses that batch's progress but never leaves the store
/// half-written.
pub struct ListingStore {
    conn: Connection,
}

impl ListingStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open listing store at {}", path.display()))?;

        // WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        setup_store(&conn)?;
        Ok(ListingStore { conn })
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        setup_store(&conn)?;
        Ok(ListingStore { conn })
    }

    /// Load one collection. Unknown names yield an empty collection.
    pub fn load(&self, name: &str) -> Result<Collection> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM listings WHERE collection = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;

        let mut collection = Collection::new();
        for body in rows {
            let body = body?;
            let listing: Listing = serde_json::from_str(&body)
                .with_context(|| format!("Corrupt listing row in collection '{}'", name))?;
            collection.insert(listing)?;
        }
        Ok(collection)
    }

    /// Replace one collection's persisted contents.
    pub fn save(&mut self, name: &str, collection: &Collection) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM listings WHERE collection = ?1", params![name])?;
        for (seq, listing) in collection.iter().enumerate() {
            let body = serde_json::to_string(listing)
                .with_context(|| format!("Failed to serialize listing '{}'", listing.unique_id))?;
            tx.execute(
                "INSERT INTO listings (collection, seq, unique_id, body) VALUES (?1, ?2, ?3, ?4)",
                params![name, seq as i64, listing.unique_id, body],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn setup_store(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS listings (
            collection TEXT NOT NULL,
            seq INTEGER NOT NULL,
            unique_id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (collection, seq)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_listings_id ON listings(collection, unique_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
