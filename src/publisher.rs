// 🚀 Publisher - push the reconciled collections to the site repository
//
// Writes `current` and `sold` JSON into the local git checkout, commits and
// pushes via the git CLI, then optionally pings the site's build hook.

use crate::config::BuildHookConfig;
use crate::db::{Collection, Listing};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// File names the site repository expects.
const CURRENT_FILE: &str = "current";
const SOLD_FILE: &str = "sold";

pub struct Publisher {
    git_path: PathBuf,
    build_hook: Option<BuildHookConfig>,
}

impl Publisher {
    pub fn new(git_path: impl Into<PathBuf>, build_hook: Option<BuildHookConfig>) -> Self {
        Publisher {
            git_path: git_path.into(),
            build_hook,
        }
    }

    /// Serialize, commit, push, ping. Runs once, after the batch has been
    /// saved to the listing store.
    pub fn publish(&self, current: &Collection, sold: &Collection) -> Result<()> {
        self.write_collections(current, sold)?;
        self.push_to_git()?;
        if let Some(hook) = &self.build_hook {
            trigger_build(hook)?;
        }
        Ok(())
    }

    fn write_collections(&self, current: &Collection, sold: &Collection) -> Result<()> {
        let current_path = self.git_path.join(CURRENT_FILE);
        fs::write(&current_path, publish_json(current)?)
            .with_context(|| format!("Failed to write {}", current_path.display()))?;

        let sold_path = self.git_path.join(SOLD_FILE);
        fs::write(&sold_path, publish_json(sold)?)
            .with_context(|| format!("Failed to write {}", sold_path.display()))?;

        Ok(())
    }

    fn push_to_git(&self) -> Result<()> {
        run_git(&self.git_path, &["pull"])?;
        run_git(&self.git_path, &["add", "-A"])?;

        // Nothing changed since the last run: skip the empty commit.
        if git_stdout(&self.git_path, &["status", "--porcelain"])?.is_empty() {
            return Ok(());
        }

        let message = format!("JSON data - {}", Utc::now().to_rfc2822());
        run_git(&self.git_path, &["commit", "-m", &message])?;
        run_git(&self.git_path, &["push"])?;
        Ok(())
    }
}

/// Collections publish with every uniqueID lower-cased; the site treats ids
/// as case-insensitive slugs.
pub fn publish_json(collection: &Collection) -> Result<String> {
    let listings: Vec<Listing> = collection
        .iter()
        .map(|listing| {
            let mut published = listing.clone();
            published.unique_id = published.unique_id.to_lowercase();
            published
        })
        .collect();

    serde_json::to_string(&listings).context("Failed to serialize collection for publishing")
}

fn run_git(repo: &Path, args: &[&str]) -> Result<()> {
    git_stdout(repo, args)?;
    Ok(())
}

fn git_stdout(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn trigger_build(hook: &BuildHookConfig) -> Result<()> {
    let response = reqwest::blocking::Client::new()
        .post(&hook.url)
        .basic_auth(&hook.username, Some(&hook.password))
        .send()
        .with_context(|| format!("Build hook request to {} failed", hook.url))?;

    if !response.status().is_success() {
        bail!("build hook returned {}", response.status());
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ListingStatus;
    use chrono::NaiveDate;

    fn listing(id: &str, day: u32) -> Listing {
        let mod_time = NaiveDate::from_ymd_opt(2017, 6, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Listing::new(id, ListingStatus::Current, mod_time).with_agent("Therese Plath")
    }

    #[test]
    fn test_publish_json_lowercases_unique_ids() {
        let mut collection = Collection::new();
        collection.insert(listing("AB123", 1)).unwrap();

        let json = publish_json(&collection).unwrap();
        assert!(json.contains("\"uniqueID\":\"ab123\""));
        assert!(!json.contains("AB123"));
    }

    #[test]
    fn test_publish_json_preserves_collection_order() {
        let mut collection = Collection::new();
        collection.insert(listing("B2", 1)).unwrap();
        collection.insert(listing("A1", 2)).unwrap();

        let json = publish_json(&collection).unwrap();
        let b = json.find("b2").unwrap();
        let a = json.find("a1").unwrap();
        assert!(b < a);
    }

    #[test]
    fn test_publish_json_is_deterministic() {
        let mut collection = Collection::new();
        collection
            .insert(
                listing("AB123", 1)
                    .with_attribute("price", serde_json::json!("450000"))
                    .with_attribute("bedrooms", serde_json::json!("3")),
            )
            .unwrap();

        assert_eq!(
            publish_json(&collection).unwrap(),
            publish_json(&collection).unwrap()
        );
    }

    #[test]
    fn test_empty_collection_publishes_as_empty_array() {
        let json = publish_json(&Collection::new()).unwrap();
        assert_eq!(json, "[]");
    }

    #[test]
    fn test_write_collections() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path(), None);

        let mut current = Collection::new();
        current.insert(listing("AB123", 1)).unwrap();
        let sold = Collection::new();

        publisher.write_collections(&current, &sold).unwrap();

        let written = fs::read_to_string(dir.path().join("current")).unwrap();
        assert!(written.contains("ab123"));
        assert_eq!(fs::read_to_string(dir.path().join("sold")).unwrap(), "[]");
    }
}
