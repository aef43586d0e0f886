//! Durable login record that lets a browser skip the OTP step on reload.
//!
//! The record is two keys, `authed` ("0"/"1") and `email`, written through an
//! [`AuthStore`]. Writes are staged until [`AuthStore::save`] is called.

use std::collections::BTreeMap;

use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use tracing::debug;

pub const AUTHED_KEY: &str = "authed";
pub const EMAIL_KEY: &str = "email";

pub trait AuthStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn delete(&mut self, key: &str);
    fn save(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedAuth {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedAuthState {
    Absent,
    Valid(PersistedAuth),
    /// Half-written or tampered record; never trusted.
    Inconsistent {
        authed_raw: Option<String>,
        email_present: bool,
    },
}

pub fn read_persisted_auth(store: &dyn AuthStore) -> PersistedAuthState {
    let authed_raw = store.get(AUTHED_KEY);
    let email = store
        .get(EMAIL_KEY)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    match (authed_raw.as_deref(), email) {
        (Some("1"), Some(email)) => PersistedAuthState::Valid(PersistedAuth { email }),
        (None | Some("0"), None) => PersistedAuthState::Absent,
        (_, email) => PersistedAuthState::Inconsistent {
            authed_raw: authed_raw.clone(),
            email_present: email.is_some(),
        },
    }
}

pub fn write_persisted_auth(store: &mut dyn AuthStore, email: &str) {
    store.set(AUTHED_KEY, "1");
    store.set(EMAIL_KEY, email);
    store.save();
}

pub fn clear_persisted_auth(store: &mut dyn AuthStore) {
    store.delete(AUTHED_KEY);
    store.delete(EMAIL_KEY);
    store.save();
}

/// In-process store. Keeps committed values apart from staged ones so callers
/// can observe whether `save` happened.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuthStore {
    saved: BTreeMap<String, String>,
    staged: BTreeMap<String, Option<String>>,
    save_count: usize,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_saved(entries: &[(&str, &str)]) -> Self {
        let saved = entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        Self {
            saved,
            ..Self::default()
        }
    }

    pub fn saved_value(&self, key: &str) -> Option<&str> {
        self.saved.get(key).map(String::as_str)
    }

    pub fn is_saved_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn save_count(&self) -> usize {
        self.save_count
    }
}

impl AuthStore for MemoryAuthStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.staged.get(key) {
            Some(change) => change.clone(),
            None => self.saved.get(key).cloned(),
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        self.staged.insert(key.to_string(), Some(value.to_string()));
    }

    fn delete(&mut self, key: &str) {
        self.staged.insert(key.to_string(), None);
    }

    fn save(&mut self) {
        for (key, change) in std::mem::take(&mut self.staged) {
            match change {
                Some(value) => {
                    self.saved.insert(key, value);
                }
                None => {
                    self.saved.remove(&key);
                }
            }
        }
        self.save_count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub prefix: String,
    pub max_age_days: i64,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            prefix: "aicp_".to_string(),
            max_age_days: 7,
        }
    }
}

impl CookieSettings {
    pub fn cookie_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Encrypted-cookie store backed by a [`PrivateCookieJar`]. Values are
/// encrypted and authenticated with the jar key; anything that fails to
/// decrypt reads as missing.
#[derive(Clone)]
pub struct CookieAuthStore {
    jar: PrivateCookieJar,
    settings: CookieSettings,
    staged: BTreeMap<String, Option<String>>,
}

impl CookieAuthStore {
    pub fn new(jar: PrivateCookieJar, settings: CookieSettings) -> Self {
        Self {
            jar,
            settings,
            staged: BTreeMap::new(),
        }
    }

    /// Returns the jar carrying every saved change; unsaved changes are dropped.
    pub fn into_jar(self) -> PrivateCookieJar {
        self.jar
    }
}

impl AuthStore for CookieAuthStore {
    fn get(&self, key: &str) -> Option<String> {
        if let Some(change) = self.staged.get(key) {
            return change.clone();
        }
        self.jar
            .get(&self.settings.cookie_name(key))
            .map(|cookie| cookie.value().to_string())
    }

    fn set(&mut self, key: &str, value: &str) {
        self.staged.insert(key.to_string(), Some(value.to_string()));
    }

    fn delete(&mut self, key: &str) {
        self.staged.insert(key.to_string(), None);
    }

    fn save(&mut self) {
        for (key, change) in std::mem::take(&mut self.staged) {
            let name = self.settings.cookie_name(&key);
            self.jar = match change {
                Some(value) => self.jar.clone().add(
                    Cookie::build((name, value))
                        .path("/")
                        .http_only(true)
                        .same_site(SameSite::Lax)
                        .max_age(time::Duration::days(self.settings.max_age_days)),
                ),
                None => self
                    .jar
                    .clone()
                    .remove(Cookie::build((name, String::new())).path("/")),
            };
        }
        debug!(
            component = "auth_store",
            event = "auth.persisted.saved",
            prefix = %self.settings.prefix
        );
    }
}
