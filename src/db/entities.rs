//! Entity resolution: natural-key upserts for the catalog's shared rows.
//!
//! Every function here takes a batch of candidate natural keys and returns
//! a key -> id mapping that covers all of them, creating only the missing
//! rows. The create path is a conflict-safe `INSERT OR IGNORE` followed by
//! a re-select, so repeated or interleaved calls with overlapping key sets
//! can never produce duplicate rows.

use anyhow::Result;
use rusqlite::params_from_iter;
use std::collections::{HashMap, HashSet};

use super::{placeholders, Database};
use crate::error::IngestError;

/// Natural key of a checkpoint or LoRA: the file name with any path
/// components stripped. Workflow graphs sometimes embed Windows-style
/// subdirectory prefixes.
pub fn clean_name(raw: &str) -> &str {
    raw.rsplit(['\\', '/']).next().unwrap_or(raw)
}

fn extension_of(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Id of the file-type row for `name`, creating it on first use.
pub fn get_or_create_file_type(db: &Database, name: &str) -> Result<i64> {
    let name = name.to_lowercase();
    db.conn().execute(
        "INSERT OR IGNORE INTO file_types (name) VALUES (?)",
        [&name],
    )?;
    let id = db.conn().query_row(
        "SELECT id FROM file_types WHERE name = ?",
        [&name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Shared upsert for the two name-keyed weight-file tables.
fn get_or_create_weight_files(
    db: &Database,
    table: &str,
    names: &[String],
) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::new();
    if names.is_empty() {
        return Ok(ids);
    }

    let cleaned: Vec<String> = names.iter().map(|n| clean_name(n).to_string()).collect();

    let mut processed = HashSet::new();
    for name in &cleaned {
        if !processed.insert(name.as_str()) {
            continue;
        }
        let extension = extension_of(name).ok_or_else(|| IngestError::MissingExtension {
            name: name.clone(),
        })?;
        let file_type_id = get_or_create_file_type(db, extension)?;
        db.conn().execute(
            &format!("INSERT OR IGNORE INTO {table} (name, file_type_id) VALUES (?, ?)"),
            rusqlite::params![name, file_type_id],
        )?;
    }

    let sql = format!(
        "SELECT id, name FROM {table} WHERE name IN ({})",
        placeholders(cleaned.len())
    );
    let mut stmt = db.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(cleaned.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (id, name) = row?;
        ids.insert(name, id);
    }

    Ok(ids)
}

/// Cleaned-name -> id mapping for a batch of checkpoint names.
pub fn get_or_create_checkpoints(
    db: &Database,
    names: &[String],
) -> Result<HashMap<String, i64>> {
    get_or_create_weight_files(db, "checkpoints", names)
}

/// Cleaned-name -> id mapping for a batch of LoRA names.
pub fn get_or_create_loras(db: &Database, names: &[String]) -> Result<HashMap<String, i64>> {
    get_or_create_weight_files(db, "loras", names)
}

/// Text -> id mapping for a batch of prompt texts. Two prompts with the
/// same exact text are the same entity.
pub fn get_or_create_prompts(db: &Database, texts: &[String]) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::new();
    if texts.is_empty() {
        return Ok(ids);
    }

    {
        let mut insert = db
            .conn()
            .prepare("INSERT OR IGNORE INTO prompts (text) VALUES (?)")?;
        for text in texts {
            insert.execute([text])?;
        }
    }

    let sql = format!(
        "SELECT id, text FROM prompts WHERE text IN ({})",
        placeholders(texts.len())
    );
    let mut stmt = db.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(texts.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (id, text) = row?;
        ids.insert(text, id);
    }

    Ok(ids)
}

/// Record observed ComfyUI node class types. The registry is append-only.
pub fn register_nodes<I, S>(db: &Database, class_types: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut insert = db
        .conn()
        .prepare("INSERT OR IGNORE INTO nodes (name) VALUES (?)")?;
    for class_type in class_types {
        insert.execute([class_type.as_ref()])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_clean_name_strips_path_separators() {
        assert_eq!(clean_name(r"SDXL\base\model.safetensors"), "model.safetensors");
        assert_eq!(clean_name("styles/anime.safetensors"), "anime.safetensors");
        assert_eq!(clean_name("plain.ckpt"), "plain.ckpt");
    }

    #[test]
    fn test_checkpoint_upsert_is_repeat_safe() {
        let db = test_db();
        let first =
            get_or_create_checkpoints(&db, &["a.safetensors".into(), "b.ckpt".into()]).unwrap();
        let second =
            get_or_create_checkpoints(&db, &["b.ckpt".into(), "c.safetensors".into()]).unwrap();

        assert_eq!(first["b.ckpt"], second["b.ckpt"]);
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_checkpoint_name_is_cleaned() {
        let db = test_db();
        let ids =
            get_or_create_checkpoints(&db, &[r"folder\model.safetensors".into()]).unwrap();
        assert!(ids.contains_key("model.safetensors"));
    }

    #[test]
    fn test_missing_extension_is_fatal() {
        let db = test_db();
        let err = get_or_create_loras(&db, &["noext".into()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::MissingExtension { .. })
        ));
    }

    #[test]
    fn test_file_type_created_lazily_and_shared() {
        let db = test_db();
        get_or_create_checkpoints(&db, &["a.safetensors".into()]).unwrap();
        get_or_create_loras(&db, &["b.safetensors".into()]).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM file_types WHERE name = 'safetensors'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_prompt_identity_is_exact_text() {
        let db = test_db();
        let a = get_or_create_prompts(&db, &["a cat".into(), "a dog".into()]).unwrap();
        let b = get_or_create_prompts(&db, &["a cat".into()]).unwrap();
        assert_eq!(a["a cat"], b["a cat"]);
        assert_ne!(a["a cat"], a["a dog"]);
    }

    #[test]
    fn test_node_registry_appends_without_duplicates() {
        let db = test_db();
        register_nodes(&db, ["KSampler", "VAEDecode"]).unwrap();
        register_nodes(&db, ["KSampler", "CLIPTextEncode"]).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
