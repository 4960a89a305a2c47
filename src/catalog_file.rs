//! Catalog files
//!
//! A catalog file is a TOML document with one `[[resource]]` table per
//! resource:
//!
//! ```toml
//! [[resource]]
//! type = "file"
//! title = "/etc/motd"
//! content = "welcome\n"
//! notify = ["Notify[motd]"]
//! ```

use anyhow::{Context, Result};
use declarative::{
    Catalog, Component, Relationship, RelationshipKind, ResourceRef, Schedule, SharedResource,
};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::resource::{Common, File, Notify, Tidy, file::Ensure};

/// Problems with the contents of a catalog file
#[derive(Debug, Error)]
pub enum CatalogFileError {
    #[error("{type_name}[{title}]: unknown resource type '{type_name}'")]
    UnknownType { type_name: String, title: String },

    #[error("{resource}: {message}")]
    BadReference { resource: String, message: String },

    #[error("{resource}: unknown attribute '{attribute}'")]
    UnknownAttribute { resource: String, attribute: String },

    #[error("{resource}: attribute '{attribute}' must be {expected}")]
    InvalidValue {
        resource: String,
        attribute: String,
        expected: &'static str,
    },

    #[error("{resource}: contains {member}, which is not declared")]
    UnknownMember { resource: String, member: String },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "resource")]
    resources: Vec<Declaration>,
}

/// One `[[resource]]` table
#[derive(Debug, Deserialize)]
pub struct Declaration {
    #[serde(rename = "type")]
    pub type_name: String,
    pub title: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub notify: Vec<String>,
    #[serde(default)]
    pub subscribe: Vec<String>,
    #[serde(default)]
    pub audit: Vec<String>,
    #[serde(default)]
    pub noop: bool,
    #[serde(default)]
    pub contains: Vec<String>,
    /// When the resource may be applied, e.g. `{ period = "daily", repeat = 2 }`
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Type-specific attributes
    #[serde(flatten)]
    pub attributes: toml::Table,
}

impl Declaration {
    fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.type_name, &self.title)
    }

    fn common(&self) -> Result<Common, CatalogFileError> {
        let kinds = [
            (RelationshipKind::Before, &self.before),
            (RelationshipKind::Require, &self.require),
            (RelationshipKind::Notify, &self.notify),
            (RelationshipKind::Subscribe, &self.subscribe),
        ];
        let mut relationships = Vec::new();
        for (kind, targets) in kinds {
            for target in targets {
                let target = target.parse::<ResourceRef>().map_err(|message| {
                    CatalogFileError::BadReference {
                        resource: self.reference().to_string(),
                        message,
                    }
                })?;
                relationships.push(Relationship::new(kind, target));
            }
        }
        Ok(Common {
            name: self.name.clone(),
            tags: self.tags.clone(),
            relationships,
            audit: self.audit.clone(),
            noop: self.noop,
            schedule: self.schedule,
        })
    }

    /// Take a string attribute out of the type-specific table
    fn take_string(&mut self, attribute: &str) -> Result<Option<String>, CatalogFileError> {
        match self.attributes.remove(attribute) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(attribute, "a string")),
        }
    }

    fn take_bool(&mut self, attribute: &str) -> Result<bool, CatalogFileError> {
        match self.attributes.remove(attribute) {
            None => Ok(false),
            Some(toml::Value::Boolean(b)) => Ok(b),
            Some(_) => Err(self.invalid(attribute, "a boolean")),
        }
    }

    fn invalid(&self, attribute: &str, expected: &'static str) -> CatalogFileError {
        CatalogFileError::InvalidValue {
            resource: self.reference().to_string(),
            attribute: attribute.to_string(),
            expected,
        }
    }

    /// Fail on attributes the type did not consume
    fn finish(&self) -> Result<(), CatalogFileError> {
        match self.attributes.keys().next() {
            Some(attribute) => Err(CatalogFileError::UnknownAttribute {
                resource: self.reference().to_string(),
                attribute: attribute.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Build the resource this declaration describes
    pub fn build(mut self) -> Result<SharedResource> {
        let common = self.common()?;
        let resource: SharedResource = match self.type_name.to_lowercase().as_str() {
            "notify" => {
                let message = self.take_string("message")?;
                Arc::new(Notify::new(&self.title, message, common))
            }
            "file" => {
                let path = self.take_string("path")?.unwrap_or_else(|| self.title.clone());
                let path = crate::config::expand_path(&path)?;
                let ensure = match self.take_string("ensure")? {
                    Some(value) => Some(
                        Ensure::parse(&value)
                            .ok_or_else(|| self.invalid("ensure", "present, file, directory or absent"))?,
                    ),
                    None => None,
                };
                let content = self.take_string("content")?;
                Arc::new(File::new(&self.title, path, ensure, content, common))
            }
            "tidy" => {
                let path = self.take_string("path")?.unwrap_or_else(|| self.title.clone());
                let path = crate::config::expand_path(&path)?;
                let matches = self.take_string("matches")?;
                let recurse = self.take_bool("recurse")?;
                Arc::new(Tidy::new(&self.title, path, matches.as_deref(), recurse, common)?)
            }
            "class" => {
                let mut class = Component::new("class", &self.title).with_tags(common.tags);
                for relationship in common.relationships {
                    class = class.with_relationship(relationship.kind, relationship.target);
                }
                Arc::new(class)
            }
            _ => {
                return Err(CatalogFileError::UnknownType {
                    type_name: self.type_name,
                    title: self.title,
                }
                .into());
            }
        };
        self.finish()?;
        Ok(resource)
    }
}

/// Read and build a catalog file
pub fn load(path: &Path) -> Result<Catalog> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid catalog {}", path.display()))
}

/// Build a catalog from TOML text
pub fn parse(content: &str) -> Result<Catalog> {
    let file: CatalogFile = toml::from_str(content)?;
    let mut catalog = Catalog::new();
    let mut containers = Vec::new();

    for declaration in file.resources {
        let reference = declaration.reference();
        let members = declaration.contains.clone();
        let id = catalog.add_resource(declaration.build()?)?;
        if !members.is_empty() {
            containers.push((reference, id, members));
        }
    }

    for (reference, id, members) in containers {
        for member in members {
            let member_ref = member.parse::<ResourceRef>().map_err(|message| {
                CatalogFileError::BadReference {
                    resource: reference.to_string(),
                    message,
                }
            })?;
            let member_id =
                catalog
                    .resource_id(&member_ref)
                    .ok_or_else(|| CatalogFileError::UnknownMember {
                        resource: reference.to_string(),
                        member: member_ref.to_string(),
                    })?;
            catalog.contain(id, member_id);
        }
    }

    log::debug!("Loaded {} resource(s)", catalog.len());
    Ok(catalog)
}
