// Agent scoping. Listings outside the configured agent never reach the
// reconciliation engine, so they can never mutate the collections.

use crate::db::Listing;

/// Retains only listings handled by the configured agent.
#[derive(Debug, Clone)]
pub struct AgentFilter {
    agent_name: String,
}

impl AgentFilter {
    pub fn new(agent_name: &str) -> Self {
        AgentFilter {
            agent_name: agent_name.to_string(),
        }
    }

    /// Exact, case-sensitive match. Listings with no agent information are
    /// out of scope.
    pub fn in_scope(&self, listing: &Listing) -> bool {
        listing.agent_name.as_deref() == Some(self.agent_name.as_str())
    }

    /// Filter a sequence of listings, preserving order.
    pub fn filter(&self, listings: Vec<Listing>) -> Vec<Listing> {
        listings.into_iter().filter(|l| self.in_scope(l)).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
