//! Project directory consulted when authenticating export calls.

mod dsn;

pub use dsn::{Dsn, DsnError};

use serde::{Deserialize, Serialize};

/// A tenant allowed to push telemetry, identified by its DSN token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u32,
    pub name: String,
    pub token: String,
}

/// Read-only, in-memory project directory; safe for concurrent lookups.
#[derive(Debug, Default)]
pub struct ProjectStore {
    projects: Vec<Project>,
}

impl ProjectStore {
    pub fn new(projects: Vec<Project>) -> Self {
        Self { projects }
    }

    pub fn find_by_token(&self, token: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.token == token)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
