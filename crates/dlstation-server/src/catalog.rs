//! Transport-agnostic catalog operations.
//!
//! Everything the HTTP layer exposes lives here as plain methods returning
//! [`CatalogError`]; handlers only parse requests and serialize results.
//! Mutating file operations take a [`Principal`], which can only be obtained
//! from a validated session.

use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::session::SessionStore;
use crate::store::{
    CatalogStats, FileRecord, InitOptions, InitReport, NewFile, Store, DEFAULT_CATEGORY,
};

/// The only account that can log in.
pub const ADMIN_USERNAME: &str = "admin";

pub const MIN_PASSWORD_LEN: usize = 6;

/// An authenticated admin, produced by [`Catalog::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    username: String,
}

impl Principal {
    pub fn username(&self) -> &str {
        &self.username
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginGrant {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Raw create/update payload as clients send it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub size: Option<i64>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
}

impl FileInput {
    /// Reject missing `name`/`url` and fill in defaults for everything else.
    pub fn validate(self) -> Result<NewFile, CatalogError> {
        let name = non_empty(self.name);
        let url = non_empty(self.url);
        let (Some(name), Some(url)) = (name, url) else {
            return Err(CatalogError::MissingField("name and url"));
        };

        Ok(NewFile {
            name,
            description: self.description.unwrap_or_default(),
            url,
            category: non_empty(self.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_owned()),
            size: self.size.unwrap_or(0),
            file_type: self.file_type.unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Listing filter mirroring the public search bar.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFilter {
    /// Case-insensitive substring over name and description.
    pub q: Option<String>,
    /// Exact category; `"all"` or empty disables the filter.
    pub category: Option<String>,
}

impl FileFilter {
    fn matches(&self, file: &FileRecord) -> bool {
        if let Some(category) = self.category.as_deref() {
            if !category.is_empty() && category != "all" && file.category != category {
                return false;
            }
        }
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            return file.name.to_lowercase().contains(&q)
                || file.description.to_lowercase().contains(&q);
        }
        true
    }
}

#[derive(Clone)]
pub struct Catalog {
    store: Store,
    sessions: SessionStore,
    init: InitOptions,
}

impl Catalog {
    pub fn new(store: Store, sessions: SessionStore, init: InitOptions) -> Self {
        Self {
            store,
            sessions,
            init,
        }
    }

    // ── Accounts ──────────────────────────────────────────────────────────

    fn admin_password(&self) -> Result<String, CatalogError> {
        Ok(self
            .store
            .admin_config()?
            .map(|c| c.password)
            .unwrap_or_else(|| self.init.default_password.clone()))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<LoginGrant, CatalogError> {
        if username.is_empty() || password.is_empty() {
            return Err(CatalogError::MissingField("username and password"));
        }

        let stored = self.admin_password()?;
        // Evaluate both comparisons so timing does not reveal which one failed.
        let user_ok = constant_time_eq(username.as_bytes(), ADMIN_USERNAME.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), stored.as_bytes());
        if !(user_ok & pass_ok) {
            warn!("rejected login attempt");
            return Err(CatalogError::InvalidCredentials);
        }

        let token = self.sessions.create(ADMIN_USERNAME);
        info!(username = ADMIN_USERNAME, "audit: admin.login");
        Ok(LoginGrant {
            token,
            username: ADMIN_USERNAME.to_owned(),
        })
    }

    pub fn authenticate(&self, token: Option<&str>) -> Result<Principal, CatalogError> {
        let session = token
            .and_then(|t| self.sessions.validate(t))
            .ok_or(CatalogError::Unauthenticated)?;
        Ok(Principal {
            username: session.username,
        })
    }

    pub fn auth_status(&self, token: Option<&str>) -> AuthStatus {
        match self.authenticate(token) {
            Ok(p) => AuthStatus {
                authenticated: true,
                username: Some(p.username),
            },
            Err(_) => AuthStatus {
                authenticated: false,
                username: None,
            },
        }
    }

    pub fn logout(&self, token: Option<&str>) {
        if let Some(token) = token {
            if self.sessions.invalidate(token) {
                info!("audit: admin.logout");
            }
        }
    }

    /// Replace the admin password and end every session, including the caller's.
    pub fn change_password(
        &self,
        by: &Principal,
        current: &str,
        new: &str,
    ) -> Result<(), CatalogError> {
        if current.is_empty() || new.is_empty() {
            return Err(CatalogError::MissingField("currentPassword and newPassword"));
        }
        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(CatalogError::WeakPassword);
        }

        let stored = self.admin_password()?;
        if !constant_time_eq(current.as_bytes(), stored.as_bytes()) {
            warn!(username = %by.username(), "password change with wrong current password");
            return Err(CatalogError::InvalidCredentials);
        }

        self.store.set_admin_password(new)?;
        let cleared = self.sessions.clear_all();
        info!(username = %by.username(), cleared, "audit: admin.password_change");
        Ok(())
    }

    // ── Files ─────────────────────────────────────────────────────────────

    pub fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>, CatalogError> {
        let mut files = self.store.list_files()?;
        files.retain(|f| filter.matches(f));
        Ok(files)
    }

    pub fn get_file(&self, id: u64) -> Result<FileRecord, CatalogError> {
        self.store.get_file(id)?.ok_or(CatalogError::NotFound)
    }

    pub fn create_file(
        &self,
        by: &Principal,
        input: FileInput,
    ) -> Result<FileRecord, CatalogError> {
        let file = input.validate()?;
        let record = self.store.insert_file(file)?;
        info!(id = record.id, name = %record.name, by = %by.username(), "audit: file.create");
        Ok(record)
    }

    pub fn update_file(
        &self,
        by: &Principal,
        id: u64,
        input: FileInput,
    ) -> Result<FileRecord, CatalogError> {
        let file = input.validate()?;
        let record = self
            .store
            .replace_file(id, file)?
            .ok_or(CatalogError::NotFound)?;
        info!(id, by = %by.username(), "audit: file.update");
        Ok(record)
    }

    pub fn delete_file(&self, by: &Principal, id: u64) -> Result<(), CatalogError> {
        if !self.store.delete_file(id)? {
            return Err(CatalogError::NotFound);
        }
        info!(id, by = %by.username(), "audit: file.delete");
        Ok(())
    }

    /// Bump the download counter. Returns the new count.
    pub fn record_download(&self, id: u64) -> Result<u64, CatalogError> {
        self.store
            .increment_downloads(id)?
            .ok_or(CatalogError::NotFound)
    }

    pub fn list_categories(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.store.categories()?)
    }

    pub fn stats(&self) -> Result<CatalogStats, CatalogError> {
        Ok(self.store.stats()?)
    }

    pub fn initialize(&self) -> Result<InitReport, CatalogError> {
        Ok(self.store.initialize(&self.init)?)
    }
}
