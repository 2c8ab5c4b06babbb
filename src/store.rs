//! Persistent records for enrolled repositories, users and notification
//! endpoints. The trait is driver-agnostic; the in-memory driver backs
//! tests and single-node deployments without a database.
//!
//! Writes are last-write-wins per slug. Uniqueness (slug, login, owner,
//! (host, user)) is enforced here, not by the callers.

use std::sync::Mutex;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: u64,
    pub login: String,
    #[serde(skip)]
    pub token: Option<SecretStringField>,
    pub secret: String,
    pub avatar: String,
    pub scopes: String,
}

/// `SecretString` is not `Clone` in row position, so the token is held
/// behind a small wrapper that clones the exposed value deliberately.
#[derive(Debug)]
pub struct SecretStringField(pub SecretString);

impl Clone for SecretStringField {
    fn clone(&self) -> Self {
        use secrecy::ExposeSecret;
        SecretStringField(SecretString::from(self.0.expose_secret().to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRow {
    pub id: u64,
    pub slug: String,
    pub owner: String,
    pub name: String,
    pub user_id: u64,
    /// HMAC key for this repository's callback URLs.
    pub secret: String,
    pub private: bool,
    pub org: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRow {
    pub id: u64,
    pub owner: String,
    pub user_id: u64,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackUrlRow {
    pub host_name: String,
    pub user: String,
    pub url: String,
}

pub trait Store: Send + Sync {
    fn create_user(&self, user: UserRow) -> anyhow::Result<()>;
    fn update_user(&self, user: UserRow) -> anyhow::Result<()>;
    fn get_user(&self, id: u64) -> anyhow::Result<UserRow>;
    fn get_user_by_login(&self, login: &str) -> anyhow::Result<Option<UserRow>>;
    fn delete_user(&self, id: u64) -> anyhow::Result<()>;

    fn create_repo(&self, repo: RepoRow) -> anyhow::Result<()>;
    fn get_repo_by_slug(&self, slug: &str) -> anyhow::Result<Option<RepoRow>>;
    fn list_repos_for_user(&self, user_id: u64) -> anyhow::Result<Vec<RepoRow>>;
    fn delete_repo(&self, slug: &str) -> anyhow::Result<()>;

    fn create_org(&self, org: OrgRow) -> anyhow::Result<()>;
    fn get_org_by_owner(&self, owner: &str) -> anyhow::Result<Option<OrgRow>>;
    fn delete_org(&self, owner: &str) -> anyhow::Result<()>;

    fn upsert_slack_url(&self, row: SlackUrlRow) -> anyhow::Result<()>;
    fn get_slack_url(&self, host_name: &str, user: &str) -> anyhow::Result<Option<String>>;
    fn delete_slack_url(&self, host_name: &str, user: &str) -> anyhow::Result<()>;

    /// Allow-lists restricting who may enroll. Empty lists allow everyone.
    fn user_allowed(&self, login: &str) -> anyhow::Result<bool>;
    fn org_allowed(&self, owner: &str) -> anyhow::Result<bool>;

    /// Names of the migrations that have run, in application order.
    fn applied_migrations(&self) -> Vec<String>;
}

/// A forward-only schema change. Drivers apply the full ordered list on
/// startup, skipping names that already ran.
pub struct Migration {
    pub name: &'static str,
}

/// Every migration ever shipped, in order. Names never change once
/// released since drivers key the applied set on them.
pub const MIGRATIONS: &[Migration] = &[
    Migration { name: "create-users" },
    Migration { name: "create-repos" },
    Migration { name: "create-orgs" },
    Migration { name: "create-slack-urls" },
    Migration { name: "create-limit-lists" },
    Migration { name: "users-add-scopes" },
];

#[derive(Default)]
struct MemTables {
    users: IndexMap<u64, UserRow>,
    repos: IndexMap<String, RepoRow>,
    orgs: IndexMap<String, OrgRow>,
    slack_urls: IndexMap<(String, String), String>,
    limit_users: Vec<String>,
    limit_orgs: Vec<String>,
    applied: Vec<String>,
}

/// In-memory driver. All state is lost on restart, which is acceptable
/// for single-node deployments that re-enroll via the forge on boot.
pub struct MemStore {
    tables: Mutex<MemTables>,
}

impl MemStore {
    pub fn new() -> Self {
        let mut tables = MemTables::default();
        for migration in MIGRATIONS {
            tables.applied.push(migration.name.to_string());
        }
        MemStore {
            tables: Mutex::new(tables),
        }
    }

    pub fn with_limits(user_logins: &[&str], org_owners: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut tables = store.lock();
            tables.limit_users = user_logins.iter().map(|s| s.to_string()).collect();
            tables.limit_orgs = org_owners.iter().map(|s| s.to_string()).collect();
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemTables> {
        // A poisoned table mutex means a writer panicked mid-update;
        // the data is plain rows so continuing is safe.
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemStore {
    fn create_user(&self, user: UserRow) -> anyhow::Result<()> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.login == user.login) {
            return Err(error::bad_request(format!(
                "user login '{}' already exists",
                user.login
            )));
        }
        tables.users.insert(user.id, user);
        Ok(())
    }

    fn update_user(&self, user: UserRow) -> anyhow::Result<()> {
        let mut tables = self.lock();
        if !tables.users.contains_key(&user.id) {
            return Err(error::not_found(format!("no user with id {}", user.id)));
        }
        tables.users.insert(user.id, user);
        Ok(())
    }

    fn get_user(&self, id: u64) -> anyhow::Result<UserRow> {
        self.lock()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| error::not_found(format!("no user with id {id}")))
    }

    fn get_user_by_login(&self, login: &str) -> anyhow::Result<Option<UserRow>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.login == login)
            .cloned())
    }

    fn delete_user(&self, id: u64) -> anyhow::Result<()> {
        self.lock().users.shift_remove(&id);
        Ok(())
    }

    fn create_repo(&self, repo: RepoRow) -> anyhow::Result<()> {
        let mut tables = self.lock();
        // Last write wins per slug.
        tables.repos.insert(repo.slug.clone(), repo);
        Ok(())
    }

    fn get_repo_by_slug(&self, slug: &str) -> anyhow::Result<Option<RepoRow>> {
        Ok(self.lock().repos.get(slug).cloned())
    }

    fn list_repos_for_user(&self, user_id: u64) -> anyhow::Result<Vec<RepoRow>> {
        Ok(self
            .lock()
            .repos
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn delete_repo(&self, slug: &str) -> anyhow::Result<()> {
        self.lock().repos.shift_remove(slug);
        Ok(())
    }

    fn create_org(&self, org: OrgRow) -> anyhow::Result<()> {
        let mut tables = self.lock();
        if tables.orgs.contains_key(&org.owner) {
            return Err(error::bad_request(format!(
                "organization '{}' already enrolled",
                org.owner
            )));
        }
        tables.orgs.insert(org.owner.clone(), org);
        Ok(())
    }

    fn get_org_by_owner(&self, owner: &str) -> anyhow::Result<Option<OrgRow>> {
        Ok(self.lock().orgs.get(owner).cloned())
    }

    fn delete_org(&self, owner: &str) -> anyhow::Result<()> {
        self.lock().orgs.shift_remove(owner);
        Ok(())
    }

    fn upsert_slack_url(&self, row: SlackUrlRow) -> anyhow::Result<()> {
        self.lock()
            .slack_urls
            .insert((row.host_name, row.user), row.url);
        Ok(())
    }

    fn get_slack_url(&self, host_name: &str, user: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .lock()
            .slack_urls
            .get(&(host_name.to_string(), user.to_string()))
            .cloned())
    }

    fn delete_slack_url(&self, host_name: &str, user: &str) -> anyhow::Result<()> {
        self.lock()
            .slack_urls
            .shift_remove(&(host_name.to_string(), user.to_string()));
        Ok(())
    }

    fn user_allowed(&self, login: &str) -> anyhow::Result<bool> {
        let tables = self.lock();
        Ok(tables.limit_users.is_empty() || tables.limit_users.iter().any(|l| l == login))
    }

    fn org_allowed(&self, owner: &str) -> anyhow::Result<bool> {
        let tables = self.lock();
        Ok(tables.limit_orgs.is_empty() || tables.limit_orgs.iter().any(|o| o == owner))
    }

    fn applied_migrations(&self) -> Vec<String> {
        self.lock().applied.clone()
    }
}
