//! Inner-number registry.
//!
//! Maps inner extensions to the tenant that owns them. Rebuilt
//! wholesale on every refresh and swapped in atomically; classification
//! and reconciliation always see a consistent snapshot. Numbers
//! provisioned under more than one tenant land in the duplicate table
//! and are deliberately excluded from the single-owner map, forcing
//! country inference from the opponent number.

use portal_client::{PortalClient, PortalMethod};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Attempts per tenant during one refresh.
const FETCH_ATTEMPTS: u32 = 5;
/// Fixed delay between attempts.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Roster source for one tenant.
#[derive(Debug, Clone)]
pub struct TenantRoster {
    pub country: String,
    /// Full URL of the tenant's `get_employees_inner_phone` endpoint.
    pub url: String,
    pub tenant_id: String,
    pub secret: String,
}

/// Result of a registry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The number belongs to exactly one tenant.
    Owned(String),
    /// The number is provisioned under several tenants.
    Ambiguous,
    /// The number is not provisioned anywhere we know of.
    Unknown,
}

/// One consistent view of the number space.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    owners: HashMap<String, String>,
    duplicates: HashSet<String>,
    by_country: BTreeMap<String, BTreeSet<String>>,
}

impl RegistrySnapshot {
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }
}

/// Build a snapshot from per-tenant rosters.
pub fn build_snapshot(rosters: &[(String, Vec<String>)]) -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::default();

    for (country, numbers) in rosters {
        for raw in numbers {
            let number = raw.trim();
            if number.is_empty() {
                continue;
            }
            snapshot
                .by_country
                .entry(country.clone())
                .or_default()
                .insert(number.to_string());

            if snapshot.duplicates.contains(number) {
                continue;
            }
            match snapshot.owners.get(number) {
                Some(owner) if owner != country => {
                    // Second tenant claiming the same extension: nobody
                    // owns it outright anymore.
                    snapshot.owners.remove(number);
                    snapshot.duplicates.insert(number.to_string());
                }
                Some(_) => {}
                None => {
                    snapshot.owners.insert(number.to_string(), country.clone());
                }
            }
        }
    }

    snapshot
}

/// Shared registry handle. Single writer (the refresh routine),
/// many readers.
pub struct NumberRegistry {
    snapshot: RwLock<RegistrySnapshot>,
    /// Single-flight guard: refresh never runs concurrently with itself.
    refresh_guard: tokio::sync::Mutex<()>,
    portal: Arc<PortalClient>,
    rosters: Vec<TenantRoster>,
}

impl NumberRegistry {
    pub fn new(portal: Arc<PortalClient>, rosters: Vec<TenantRoster>) -> Self {
        Self {
            snapshot: RwLock::new(RegistrySnapshot::default()),
            refresh_guard: tokio::sync::Mutex::new(()),
            portal,
            rosters,
        }
    }

    /// Fetch every tenant's roster and swap in a fresh snapshot.
    /// A tenant that stays unreachable after bounded retry is skipped;
    /// the other tenants still refresh.
    pub async fn refresh(&self) {
        let _guard = self.refresh_guard.lock().await;

        let mut collected: Vec<(String, Vec<String>)> = Vec::new();
        for roster in &self.rosters {
            match self.fetch_roster(roster).await {
                Some(numbers) => collected.push((roster.country.clone(), numbers)),
                None => {
                    warn!(country = %roster.country, "Roster fetch failed, tenant skipped");
                }
            }
        }

        let snapshot = build_snapshot(&collected);
        info!(
            owners = snapshot.owner_count(),
            duplicates = snapshot.duplicate_count(),
            "Inner-number registry refreshed"
        );
        self.install(snapshot);
    }

    async fn fetch_roster(&self, roster: &TenantRoster) -> Option<Vec<String>> {
        for attempt in 1..=FETCH_ATTEMPTS {
            match self
                .portal
                .send(
                    &json!({}),
                    &roster.url,
                    PortalMethod::Get,
                    &roster.secret,
                    &roster.tenant_id,
                )
                .await
            {
                Ok(body) => {
                    return Some(body.split(',').map(str::to_string).collect());
                }
                Err(e) => {
                    warn!(country = %roster.country, attempt, error = %e, "Roster fetch attempt failed");
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(FETCH_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }

    /// Swap in a prebuilt snapshot. Also the seam tests use to populate
    /// the registry without a portal.
    pub fn install(&self, snapshot: RegistrySnapshot) {
        *self.snapshot.write().unwrap() = snapshot;
    }

    /// O(1) lookup under the read lock.
    pub fn resolve(&self, number: &str) -> Resolution {
        let snapshot = self.snapshot.read().unwrap();
        if snapshot.duplicates.contains(number) {
            return Resolution::Ambiguous;
        }
        match snapshot.owners.get(number) {
            Some(country) => Resolution::Owned(country.clone()),
            None => Resolution::Unknown,
        }
    }

    /// All numbers provisioned under a country, duplicates included.
    pub fn numbers_for(&self, country: &str) -> Vec<String> {
        let snapshot = self.snapshot.read().unwrap();
        snapshot
            .by_country
            .get(country)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rosters() -> Vec<(String, Vec<String>)> {
        vec![
            (
                "ua".to_string(),
                vec!["1007".to_string(), "6916".to_string(), "".to_string()],
            ),
            (
                "ru".to_string(),
                vec!["2008".to_string(), "6916".to_string()],
            ),
        ]
    }

    #[test]
    fn duplicate_numbers_leave_the_owner_map() {
        let snapshot = build_snapshot(&rosters());
        assert_eq!(snapshot.owner_count(), 2);
        assert_eq!(snapshot.duplicate_count(), 1);
        assert!(snapshot.duplicates.contains("6916"));
        assert!(!snapshot.owners.contains_key("6916"));
    }

    #[test]
    fn duplicates_stay_listed_per_country() {
        let registry = NumberRegistry::new(Arc::new(PortalClient::new()), Vec::new());
        registry.install(build_snapshot(&rosters()));

        assert_eq!(registry.numbers_for("ua"), vec!["1007", "6916"]);
        assert_eq!(registry.numbers_for("ru"), vec!["2008", "6916"]);
        assert!(registry.numbers_for("kz").is_empty());
    }

    #[test]
    fn resolve_distinguishes_owned_ambiguous_unknown() {
        let registry = NumberRegistry::new(Arc::new(PortalClient::new()), Vec::new());
        registry.install(build_snapshot(&rosters()));

        assert_eq!(registry.resolve("1007"), Resolution::Owned("ua".to_string()));
        assert_eq!(registry.resolve("6916"), Resolution::Ambiguous);
        assert_eq!(registry.resolve("9999"), Resolution::Unknown);
    }

    #[test]
    fn same_country_repeat_is_not_a_duplicate() {
        let snapshot = build_snapshot(&[(
            "ua".to_string(),
            vec!["1007".to_string(), "1007".to_string()],
        )]);
        assert_eq!(snapshot.owner_count(), 1);
        assert_eq!(snapshot.duplicate_count(), 0);
    }
}
