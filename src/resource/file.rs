//! File resource - files and directories with optional content

use anyhow::{Context, Result, bail};
use declarative::property::{ENSURE, PropertyHandler, PropertyTable, PropertyValues};
use declarative::{Property, Relationship, Resource, ResourceRef, Schedule, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Common;

pub const CONTENT: &str = "content";

/// Desired state of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensure {
    /// Exists as anything (a file is created if missing)
    Present,
    File,
    Directory,
    Absent,
}

impl Ensure {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "present" => Some(Self::Present),
            "file" => Some(Self::File),
            "directory" => Some(Self::Directory),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Absent => "absent",
        }
    }
}

/// A file or directory
#[derive(Debug)]
pub struct File {
    reference: ResourceRef,
    path: PathBuf,
    common: Common,
    table: PropertyTable,
}

#[derive(Debug)]
struct EnsureHandler {
    path: PathBuf,
    content: Option<String>,
}

impl PropertyHandler for EnsureHandler {
    fn insync(&self, is: &Value, should: &Value) -> bool {
        match (is.as_str(), should.as_str()) {
            (Some(is), Some("present")) => is != "absent",
            _ => is == should,
        }
    }

    fn sync(&self, should: &Value) -> Result<()> {
        let should = should.as_str().and_then(Ensure::parse);
        match should {
            Some(Ensure::Absent) => remove(&self.path),
            Some(Ensure::Directory) => fs::create_dir(&self.path)
                .with_context(|| format!("Failed to create directory {}", self.path.display())),
            Some(Ensure::Present | Ensure::File) => {
                if self.path.is_dir() {
                    bail!("{} is a directory", self.path.display());
                }
                fs::write(&self.path, self.content.as_deref().unwrap_or_default())
                    .with_context(|| format!("Failed to write {}", self.path.display()))
            }
            None => bail!("Invalid ensure value for {}", self.path.display()),
        }
    }

    fn change_message(&self, _property: &str, is: &Value, should: &Value) -> String {
        match should.as_str() {
            Some("absent") => "removed".to_string(),
            Some("directory") => "created directory".to_string(),
            _ if is.as_str() == Some("absent") => "created".to_string(),
            _ => format!(
                "ensure changed '{}' to '{}'",
                is.as_str().unwrap_or_default(),
                should.as_str().unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug)]
struct ContentHandler {
    path: PathBuf,
}

impl PropertyHandler for ContentHandler {
    fn sync(&self, should: &Value) -> Result<()> {
        let content = should.as_str().unwrap_or_default();
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn change_message(&self, _property: &str, is: &Value, should: &Value) -> String {
        format!("content changed {} to {}", checksum(is), checksum(should))
    }

    fn recorded_value(&self, value: &Value) -> Value {
        match value.as_str() {
            Some(content) if !is_digest(content) => Value::String(digest(content)),
            _ => value.clone(),
        }
    }
}

const DIGEST_PREFIX: &str = "{blake3}";

fn digest(content: &str) -> String {
    format!("{DIGEST_PREFIX}{}", blake3::hash(content.as_bytes()).to_hex())
}

fn is_digest(content: &str) -> bool {
    content
        .strip_prefix(DIGEST_PREFIX)
        .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Short content digest for change messages
fn checksum(value: &Value) -> String {
    match value.as_str() {
        Some(content) if is_digest(content) => format!("'{}'", &content[..DIGEST_PREFIX.len() + 16]),
        Some(content) => format!("'{}'", &digest(content)[..DIGEST_PREFIX.len() + 16]),
        None => "absent".to_string(),
    }
}

fn remove(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir(path)
            .with_context(|| format!("Failed to remove directory {} (is it empty?)", path.display()))
    } else {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
    }
}

impl File {
    /// A file at `path`, titled `title`
    ///
    /// Declaring content without `ensure` implies `ensure = "file"`.
    pub fn new(
        title: &str,
        path: impl Into<PathBuf>,
        ensure: Option<Ensure>,
        content: Option<String>,
        common: Common,
    ) -> Self {
        let path = path.into();
        let ensure = ensure.or_else(|| content.as_ref().map(|_| Ensure::File));
        let mut table = PropertyTable::new();

        if let Some(ensure) = ensure {
            let handler = Arc::new(EnsureHandler {
                path: path.clone(),
                content: content.clone(),
            });
            table.insert(Property::managed(
                ENSURE,
                Value::String(ensure.as_str().to_string()),
                handler,
            ));
        }
        let content_handler = Arc::new(ContentHandler { path: path.clone() });
        match content {
            Some(content) => table.insert(Property::managed(
                CONTENT,
                Value::String(content),
                content_handler,
            )),
            None if common.audit.iter().any(|p| p == CONTENT) => {
                table.insert(Property::unmanaged(CONTENT, content_handler));
            }
            None => {}
        }

        Self {
            reference: ResourceRef::new("file", title),
            path,
            common,
            table,
        }
    }

    /// A file to remove, as generated by `tidy`
    pub fn absent(path: &Path, tags: Vec<String>) -> Self {
        let common = Common {
            tags,
            ..Common::default()
        };
        Self::new(
            &path.display().to_string(),
            path,
            Some(Ensure::Absent),
            None,
            common,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for File {
    fn resource_ref(&self) -> ResourceRef {
        self.reference.clone()
    }

    fn name(&self) -> Option<String> {
        let path = self.path.display().to_string();
        (path != self.reference.title).then_some(path)
    }

    fn properties(&self) -> &PropertyTable {
        &self.table
    }

    fn audited(&self) -> Vec<String> {
        self.common.audit.clone()
    }

    fn pre_run_check(&self) -> Result<()> {
        let manages_content = self.table.get(CONTENT).is_some_and(|p| p.should().is_some());
        if manages_content && self.path.is_dir() {
            bail!("{} is a directory; its content cannot be managed", self.path.display());
        }
        Ok(())
    }

    fn retrieve(&self) -> Result<PropertyValues> {
        let mut values = PropertyValues::new();
        let metadata = match fs::symlink_metadata(&self.path) {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Could not stat {}", self.path.display()));
            }
        };

        let ensure = match &metadata {
            None => Ensure::Absent,
            Some(m) if m.is_dir() => Ensure::Directory,
            Some(_) => Ensure::File,
        };
        values.insert(ENSURE.to_string(), Value::String(ensure.as_str().to_string()));

        let content = if ensure == Ensure::File {
            let bytes = fs::read(&self.path)
                .with_context(|| format!("Could not read {}", self.path.display()))?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Value::Null
        };
        values.insert(CONTENT.to_string(), content);
        Ok(values)
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.common.relationships.clone()
    }

    fn autorequire(&self) -> Vec<ResourceRef> {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| ResourceRef::new("file", parent.display().to_string()))
            .into_iter()
            .collect()
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

    fn ancestors(&self) -> Vec<String> {
        self.path
            .ancestors()
            .skip(1)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.display().to_string())
            .collect()
    }
}
