//! Built-in resource types
//!
//! Every type declared in a catalog file is backed by one of these:
//! - `notify`: logs a message on every run, responds to refresh
//! - `file`: a file or directory with optional content
//! - `tidy`: removes matching files, expanded when it is applied

use declarative::{Relationship, ResourceRef, Schedule};

pub mod file;
pub mod notify;
pub mod tidy;

pub use file::File;
pub use notify::Notify;
pub use tidy::Tidy;

/// Attributes every declared resource accepts besides its own properties
#[derive(Debug, Clone, Default)]
pub struct Common {
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub relationships: Vec<Relationship>,
    pub audit: Vec<String>,
    pub noop: bool,
    pub schedule: Option<Schedule>,
}

impl Common {
    /// Name when it differs from the title
    pub fn distinct_name(&self, reference: &ResourceRef) -> Option<String> {
        self.name.clone().filter(|name| *name != reference.title)
    }
}
