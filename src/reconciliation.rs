// ⚖️ Reconciliation Engine - apply one feed listing to the current/sold state
//
// Transition rules, evaluated in order:
//   sold              -> leave current, enter sold (bounded by retention)
//   not sold/current  -> leave current, enter nothing
//   current           -> enter current, replacing any stale entry
//
// Removal always happens before insert, so an update to an already-tracked
// id can never produce a duplicate key or drift between collections.

use crate::db::{Collection, Listing};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default bound on the sold collection.
pub const DEFAULT_SOLD_LIMIT: usize = 3;

// ============================================================================
// VALIDATION ERROR
// ============================================================================

/// Rejection of a single listing before it may touch the collections.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// RECONCILE ACTION
// ============================================================================

/// What applying one listing did to the collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Fresh id with status `current`, inserted into Current. Also covers a
    /// sold listing coming back on the market.
    Listed,
    /// Known id re-reported as `current`; the stale entry was replaced.
    Updated,
    /// Listing entered Sold, leaving Current if it was there. Carries the
    /// ids the retention policy evicted, oldest first.
    Sold {
        was_current: bool,
        evicted: Vec<String>,
    },
    /// Known id reported with an unrecognized status; dropped from Current.
    Withdrawn,
    /// Unknown id with an unrecognized status; nothing to do.
    Ignored,
}

impl ReconcileAction {
    pub fn is_sold(&self) -> bool {
        matches!(self, ReconcileAction::Sold { .. })
    }

    pub fn evicted(&self) -> &[String] {
        match self {
            ReconcileAction::Sold { evicted, .. } => evicted,
            _ => &[],
        }
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

/// Applies listings to the current/sold collections, one at a time.
pub struct ReconciliationEngine {
    /// Maximum size of the sold collection after retention runs.
    pub sold_limit: usize,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            sold_limit: DEFAULT_SOLD_LIMIT,
        }
    }

    pub fn with_sold_limit(sold_limit: usize) -> Self {
        ReconciliationEngine { sold_limit }
    }

    /// Apply one listing.
    ///
    /// After this returns, the listing's id is present in at most one of the
    /// two collections. Removing an absent id is a no-op, never an error.
    pub fn apply(
        &self,
        listing: Listing,
        current: &mut Collection,
        sold: &mut Collection,
    ) -> Result<ReconcileAction> {
        if listing.unique_id.is_empty() {
            return Err(ValidationError {
                field: "uniqueID".to_string(),
                message: "listing has an empty uniqueID".to_string(),
            }
            .into());
        }

        let was_current = current.remove(&listing.unique_id).is_some();

        if listing.status.is_sold() {
            // Replace any previous sold entry with the same id.
            sold.remove(&listing.unique_id);
            sold.insert(listing)?;
            let evicted = self.enforce_sold_limit(sold);
            return Ok(ReconcileAction::Sold {
                was_current,
                evicted,
            });
        }

        if !listing.status.is_current() {
            // Unrecognized status means the listing left the market.
            return Ok(if was_current {
                ReconcileAction::Withdrawn
            } else {
                ReconcileAction::Ignored
            });
        }

        // A sold listing re-reported as current comes back on the market.
        sold.remove(&listing.unique_id);
        current.insert(listing)?;
        Ok(if was_current {
            ReconcileAction::Updated
        } else {
            ReconcileAction::Listed
        })
    }

    /// Evict the oldest sold listings until the collection is back at the
    /// limit. Oldest means minimum (modTime, uniqueID); the id tiebreak
    /// keeps eviction reproducible when two sales share a timestamp.
    fn enforce_sold_limit(&self, sold: &mut Collection) -> Vec<String> {
        let mut evicted = Vec::new();
        while sold.len() > self.sold_limit {
            let oldest = sold
                .iter()
                .min_by(|a, b| {
                    (a.mod_time, a.unique_id.as_str()).cmp(&(b.mod_time, b.unique_id.as_str()))
                })
                .map(|listing| listing.unique_id.clone());

            match oldest {
                Some(id) => {
                    sold.remove(&id);
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ListingStatus;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 6, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn listing(id: &str, status: &str, day: u32) -> Listing {
        Listing::new(id, ListingStatus::parse(status), ts(day)).with_agent("Therese Plath")
    }

    #[test]
    fn test_sold_listing_moves_from_current_to_sold() {
        // Scenario B: Current = {X current}; reconcile X sold
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();
        current.insert(listing("X", "current", 1)).unwrap();

        let action = engine
            .apply(listing("X", "sold", 2), &mut current, &mut sold)
            .unwrap();

        assert!(!current.contains("X"));
        assert!(sold.contains("X"));
        assert_eq!(
            action,
            ReconcileAction::Sold {
                was_current: true,
                evicted: vec![]
            }
        );
    }

    #[test]
    fn test_sold_listing_unknown_to_current_still_enters_sold() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        let action = engine
            .apply(listing("X", "sold", 1), &mut current, &mut sold)
            .unwrap();

        assert!(sold.contains("X"));
        assert!(current.is_empty());
        assert!(action.is_sold());
    }

    #[test]
    fn test_sold_replaces_existing_sold_entry() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        engine
            .apply(listing("X", "sold", 1), &mut current, &mut sold)
            .unwrap();
        engine
            .apply(
                listing("X", "sold", 2).with_attribute("price", serde_json::json!("was 450000")),
                &mut current,
                &mut sold,
            )
            .unwrap();

        assert_eq!(sold.len(), 1);
        assert_eq!(sold.get("X").unwrap().mod_time, ts(2));
    }

    #[test]
    fn test_unrecognized_status_removes_from_current() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();
        current.insert(listing("X", "current", 1)).unwrap();

        let action = engine
            .apply(listing("X", "offmarket", 2), &mut current, &mut sold)
            .unwrap();

        assert!(!current.contains("X"));
        assert!(!sold.contains("X"));
        assert_eq!(action, ReconcileAction::Withdrawn);
    }

    #[test]
    fn test_unrecognized_status_on_unknown_id_is_a_no_op() {
        // Scenario C: nothing tracked, status "withdrawn" arrives
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        let action = engine
            .apply(listing("Y", "withdrawn", 1), &mut current, &mut sold)
            .unwrap();

        assert!(current.is_empty());
        assert!(sold.is_empty());
        assert_eq!(action, ReconcileAction::Ignored);
    }

    #[test]
    fn test_current_listing_replaces_stale_entry() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        let first =
            listing("X", "current", 1).with_attribute("price", serde_json::json!("450000"));
        let second =
            listing("X", "current", 2).with_attribute("price", serde_json::json!("430000"));

        assert_eq!(
            engine
                .apply(first, &mut current, &mut sold)
                .unwrap(),
            ReconcileAction::Listed
        );
        assert_eq!(
            engine
                .apply(second.clone(), &mut current, &mut sold)
                .unwrap(),
            ReconcileAction::Updated
        );

        assert_eq!(current.len(), 1);
        assert_eq!(current.get("X").unwrap(), &second);
    }

    #[test]
    fn test_reapplying_current_listing_is_idempotent() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        let l = listing("X", "current", 1);
        engine.apply(l.clone(), &mut current, &mut sold).unwrap();
        let once = current.clone();

        engine.apply(l, &mut current, &mut sold).unwrap();
        assert_eq!(current, once);
    }

    #[test]
    fn test_relisted_sold_listing_leaves_sold() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        engine
            .apply(listing("X", "sold", 1), &mut current, &mut sold)
            .unwrap();
        engine
            .apply(listing("X", "current", 2), &mut current, &mut sold)
            .unwrap();

        assert!(current.contains("X"));
        assert!(!sold.contains("X"));
    }

    #[test]
    fn test_retention_evicts_oldest_mod_time() {
        // Scenario A: four sold listings against a limit of 3
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        for (id, day) in [("A", 1), ("B", 2), ("C", 3)] {
            engine
                .apply(listing(id, "sold", day), &mut current, &mut sold)
                .unwrap();
        }
        let action = engine
            .apply(listing("D", "sold", 4), &mut current, &mut sold)
            .unwrap();

        assert_eq!(sold.len(), 3);
        assert!(!sold.contains("A"));
        for id in ["B", "C", "D"] {
            assert!(sold.contains(id));
        }
        assert_eq!(action.evicted(), &["A".to_string()]);
    }

    #[test]
    fn test_retention_tiebreak_on_unique_id() {
        let engine = ReconciliationEngine::with_sold_limit(1);
        let mut current = Collection::new();
        let mut sold = Collection::new();

        // Same modTime: the lexicographically smaller id goes first
        engine
            .apply(listing("B", "sold", 1), &mut current, &mut sold)
            .unwrap();
        let action = engine
            .apply(listing("A", "sold", 1), &mut current, &mut sold)
            .unwrap();

        assert_eq!(action.evicted(), &["A".to_string()]);
        assert!(sold.contains("B"));
    }

    #[test]
    fn test_retention_never_exceeds_limit() {
        let engine = ReconciliationEngine::with_sold_limit(2);
        let mut current = Collection::new();
        let mut sold = Collection::new();

        for day in 1..=9 {
            engine
                .apply(
                    listing(&format!("ID{}", day), "sold", day as u32),
                    &mut current,
                    &mut sold,
                )
                .unwrap();
            assert!(sold.len() <= 2);
        }

        assert!(sold.contains("ID8"));
        assert!(sold.contains("ID9"));
    }

    #[test]
    fn test_empty_unique_id_is_rejected() {
        let engine = ReconciliationEngine::new();
        let mut current = Collection::new();
        let mut sold = Collection::new();

        let err = engine
            .apply(listing("", "current", 1), &mut current, &mut sold)
            .unwrap_err();

        assert!(err.downcast_ref::<ValidationError>().is_some());
        assert!(current.is_empty());
        assert!(sold.is_empty());
    }
}
