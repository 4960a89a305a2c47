//! State command - inspect and reset the audit store

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{FileBackend, Persistence};
use declarative::types::format_value;
use std::path::Path;

use crate::ui;

fn timestamp(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || "never".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn show(path: &Path, resource: Option<&str>) -> Result<()> {
    let data = FileBackend::new(path)
        .read()
        .with_context(|| format!("Could not read state store {}", path.display()))?;

    ui::header(&format!("State: {}", path.display()));
    let records: Vec<_> = data
        .resources
        .iter()
        .filter(|(reference, _)| resource.is_none_or(|r| r == reference.as_str()))
        .collect();

    if records.is_empty() {
        ui::dim("No recorded values");
        return Ok(());
    }

    for (reference, record) in records {
        ui::section(reference);
        for (property, value) in &record.values {
            ui::kv(property, &format_value(value));
        }
        ui::kv("checked", &timestamp(record.checked));
        ui::kv("synced", &timestamp(record.synced));
    }
    Ok(())
}

pub fn clear(path: &Path) -> Result<()> {
    if !path.exists() {
        ui::info(&format!("No state at {}", path.display()));
        return Ok(());
    }
    let mut store = Persistence::file(path);
    store.clear();
    store.save()?;
    ui::success(&format!("Cleared {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_clear_leaves_valid_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = Persistence::file(&path);
        store.set_system_value("File[/etc/motd]", "content", json!("hi"));
        store.save().unwrap();

        clear(&path).unwrap();
        let mut reloaded = Persistence::file(&path);
        reloaded.load();
        assert!(reloaded.data().resources.is_empty());
    }

    #[test]
    fn test_timestamp() {
        assert_eq!(timestamp(None), "never");
        let t = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(Some(t)), "2026-01-02 03:04:05 UTC");
    }

    #[test]
    fn test_show_does_not_move_a_corrupt_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let err = show(&path, None).unwrap_err();
        assert!(err.to_string().contains("Could not read state store"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2");
        assert!(!dir.path().join("state.json.bad").exists());
    }

    #[test]
    fn test_show_missing_store() {
        let dir = TempDir::new().unwrap();
        assert!(show(&dir.path().join("state.json"), None).is_ok());
    }
}
