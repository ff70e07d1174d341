//! Password gate in front of the chat screen
//!
//! This is a convenience lock, not access control: the password is compared
//! in plain text and the unlocked marker lives in local storage where anyone
//! with the account can set it.

use std::sync::Arc;

use crate::storage::{AUTH_KEY, Storage};

const UNLOCKED_MARKER: &str = "true";

/// Result of a password attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Password matched; the marker was persisted
    Unlocked,
    /// Nothing was typed
    EmptyInput,
    /// Password did not match
    Incorrect,
    /// No password is configured, so nothing can unlock the gate
    NotConfigured,
}

impl GateOutcome {
    /// Line shown under the password field
    pub fn message(&self) -> &'static str {
        match self {
            GateOutcome::Unlocked => "",
            GateOutcome::EmptyInput => "Please enter the password.",
            GateOutcome::Incorrect => "Incorrect password.",
            GateOutcome::NotConfigured => "No password is configured.",
        }
    }
}

pub struct SessionGate {
    password: Option<String>,
    storage: Arc<dyn Storage>,
    unlocked: bool,
}

impl SessionGate {
    /// Create a locked gate; call [`SessionGate::restore`] to pick up a prior unlock
    pub fn new(password: Option<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
            storage,
            unlocked: false,
        }
    }

    /// Honor a persisted marker from a previous run
    pub fn restore(&mut self) -> bool {
        self.unlocked = match self.storage.get(AUTH_KEY) {
            Ok(value) => value.as_deref() == Some(UNLOCKED_MARKER),
            Err(e) => {
                tracing::warn!("Failed to read auth marker: {}", e);
                false
            }
        };
        self.unlocked
    }

    /// Check a typed password
    pub fn attempt(&mut self, secret: &str) -> GateOutcome {
        if secret.trim().is_empty() {
            return GateOutcome::EmptyInput;
        }
        let Some(password) = &self.password else {
            tracing::warn!("Password attempt with no password configured");
            return GateOutcome::NotConfigured;
        };
        if secret != password {
            tracing::debug!("Incorrect password attempt");
            return GateOutcome::Incorrect;
        }

        if let Err(e) = self.storage.set(AUTH_KEY, UNLOCKED_MARKER) {
            // Still unlocked for this run
            tracing::warn!("Failed to persist auth marker: {}", e);
        }
        self.unlocked = true;
        tracing::info!("Session unlocked");
        GateOutcome::Unlocked
    }

    /// Forget the unlock, here and in storage
    pub fn logout(&mut self) {
        if let Err(e) = self.storage.remove(AUTH_KEY) {
            tracing::warn!("Failed to remove auth marker: {}", e);
        }
        self.unlocked = false;
        tracing::info!("Session locked");
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn is_configured(&self) -> bool {
        self.password.is_some()
    }
}

impl std::fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate")
            .field("configured", &self.password.is_some())
            .field("unlocked", &self.unlocked)
            .finish_non_exhaustive()
    }
}
