//! Tidy resource - removes files matching a pattern under a directory
//!
//! The matching files are only discovered when the tidy resource itself is
//! applied: each becomes a generated `file` resource with `ensure = absent`,
//! so anything that depends on the tidy runs after every removal.

use anyhow::{Context, Result};
use declarative::property::{PropertyTable, PropertyValues};
use declarative::{Relationship, Resource, ResourceRef, Schedule, SharedResource};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

use super::{Common, File};

#[derive(Debug)]
pub struct Tidy {
    reference: ResourceRef,
    path: PathBuf,
    matches: Option<Regex>,
    recurse: bool,
    common: Common,
    table: PropertyTable,
}

impl Tidy {
    /// Tidy `path`; without a pattern every file matches
    pub fn new(
        title: &str,
        path: impl Into<PathBuf>,
        matches: Option<&str>,
        recurse: bool,
        common: Common,
    ) -> Result<Self> {
        let matches = matches
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("Invalid tidy pattern '{pattern}'"))
            })
            .transpose()?;
        Ok(Self {
            reference: ResourceRef::new("tidy", title),
            path: path.into(),
            matches,
            recurse,
            common,
            table: PropertyTable::new(),
        })
    }

    fn selected(&self, file_name: &str) -> bool {
        self.matches
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(file_name))
    }
}

impl Resource for Tidy {
    fn resource_ref(&self) -> ResourceRef {
        self.reference.clone()
    }

    fn properties(&self) -> &PropertyTable {
        &self.table
    }

    fn retrieve(&self) -> Result<PropertyValues> {
        Ok(PropertyValues::new())
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.common.relationships.clone()
    }

    fn autorequire(&self) -> Vec<ResourceRef> {
        vec![ResourceRef::new("file", self.path.display().to_string())]
    }

    fn supports_eval_generate(&self) -> bool {
        true
    }

    fn eval_generate(&self) -> Result<Vec<SharedResource>> {
        if !self.path.exists() {
            log::debug!("{}: {} does not exist", self.reference, self.path.display());
            return Ok(Vec::new());
        }

        let max_depth = if self.recurse { usize::MAX } else { 1 };
        let mut files: Vec<SharedResource> = Vec::new();
        for entry in WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("Could not walk {}", self.path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.selected(&entry.file_name().to_string_lossy()) {
                files.push(Arc::new(File::absent(entry.path(), self.common.tags.clone())));
            }
        }
        log::debug!("{}: {} file(s) to remove", self.reference, files.len());
        Ok(files)
    }

    fn tags(&self) -> Vec<String> {
        self.common.tags.clone()
    }

    fn noop(&self) -> bool {
        self.common.noop
    }

    fn schedule(&self) -> Option<Schedule> {
        self.common.schedule
    }
}
