//! Generation rows: insert, replace, lookups and the filtered reads used
//! by external consumers (CLI today, a dashboard tomorrow).
//!
//! Filters compose as "ALL of the given ids must be linked": each facet
//! becomes a grouped join with a `HAVING COUNT(DISTINCT ...)` guard, the
//! node facet queries the retained workflow graph through `json_each`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::OptionalExtension;

use super::{placeholders, Database};

pub const ITEMS_PER_PAGE: i64 = 32;

/// A generation row as stored.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub id: i64,
    pub file_type_id: i64,
    pub source: Option<String>,
    pub name: String,
    pub file_location: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub date_created: Option<String>,
    pub size: i64,
    pub raw_json: String,
}

/// Fields of a generation about to be inserted.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub file_type_id: i64,
    pub source: Option<String>,
    pub name: String,
    pub file_location: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub date_created: Option<DateTime<Utc>>,
    pub size: i64,
    pub raw_json: String,
}

/// Active facet filters for the list/facet reads. Every constraint is
/// conjunctive: a generation matches only when it links ALL requested ids.
#[derive(Debug, Clone, Default)]
pub struct GenerationFilter {
    /// Free-text match over the retained raw metadata.
    pub text: Option<String>,
    pub checkpoint_ids: Vec<i64>,
    pub lora_ids: Vec<i64>,
    pub node_types: Vec<String>,
}

impl GenerationFilter {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.checkpoint_ids.is_empty()
            && self.lora_ids.is_empty()
            && self.node_types.is_empty()
    }
}

const SELECT_COLUMNS: &str = "generations.id, generations.file_type_id, generations.source, \
     generations.name, generations.file_location, generations.width, generations.height, \
     generations.date_created, generations.size, generations.raw_json";

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationRecord> {
    Ok(GenerationRecord {
        id: row.get(0)?,
        file_type_id: row.get(1)?,
        source: row.get(2)?,
        name: row.get(3)?,
        file_location: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        date_created: row.get(7)?,
        size: row.get(8)?,
        raw_json: row.get(9)?,
    })
}

/// Id of the generation at `file_location`, when already cataloged.
pub fn find_by_location(db: &Database, file_location: &str) -> Result<Option<i64>> {
    let id = db
        .conn()
        .query_row(
            "SELECT id FROM generations WHERE file_location = ?",
            [file_location],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn insert_generation(db: &Database, generation: &NewGeneration) -> Result<i64> {
    db.conn().execute(
        r#"
        INSERT INTO generations (
            file_type_id, source, name, file_location,
            width, height, date_created, size, raw_json
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        rusqlite::params![
            generation.file_type_id,
            generation.source,
            generation.name,
            generation.file_location,
            generation.width,
            generation.height,
            generation.date_created.map(|d| d.to_rfc3339()),
            generation.size,
            generation.raw_json,
        ],
    )?;
    Ok(db.conn().last_insert_rowid())
}

/// Remove a generation and everything that belongs only to it: its link
/// rows and its sampler rows. Shared entities (checkpoints, loras,
/// prompts) are never touched here.
pub fn delete_generation(db: &Database, generation_id: i64) -> Result<()> {
    let conn = db.conn();
    conn.execute(
        "DELETE FROM k_sampler_positive_prompts WHERE k_sampler_id IN \
         (SELECT k_sampler_id FROM generation_k_samplers WHERE generation_id = ?)",
        [generation_id],
    )?;
    conn.execute(
        "DELETE FROM k_sampler_negative_prompts WHERE k_sampler_id IN \
         (SELECT k_sampler_id FROM generation_k_samplers WHERE generation_id = ?)",
        [generation_id],
    )?;
    conn.execute(
        "DELETE FROM k_samplers WHERE id IN \
         (SELECT k_sampler_id FROM generation_k_samplers WHERE generation_id = ?)",
        [generation_id],
    )?;
    conn.execute(
        "DELETE FROM generation_k_samplers WHERE generation_id = ?",
        [generation_id],
    )?;
    conn.execute(
        "DELETE FROM generation_checkpoints WHERE generation_id = ?",
        [generation_id],
    )?;
    conn.execute(
        "DELETE FROM generation_loras WHERE generation_id = ?",
        [generation_id],
    )?;
    conn.execute("DELETE FROM generations WHERE id = ?", [generation_id])?;
    Ok(())
}

pub fn fetch_generation(db: &Database, generation_id: i64) -> Result<Option<GenerationRecord>> {
    let record = db
        .conn()
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM generations WHERE id = ?"),
            [generation_id],
            record_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Build the join/where clauses shared by the list, count and facet reads.
fn filter_clauses(filter: &GenerationFilter) -> (String, String, Vec<Box<dyn ToSql>>) {
    let mut joins = String::new();
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if !filter.checkpoint_ids.is_empty() {
        joins.push_str(&format!(
            " JOIN (SELECT generation_id FROM generation_checkpoints \
               WHERE checkpoint_id IN ({}) \
               GROUP BY generation_id \
               HAVING COUNT(DISTINCT checkpoint_id) = {}) checkpoint_filter \
              ON generations.id = checkpoint_filter.generation_id",
            placeholders(filter.checkpoint_ids.len()),
            filter.checkpoint_ids.len(),
        ));
        for id in &filter.checkpoint_ids {
            params.push(Box::new(*id));
        }
    }

    if !filter.lora_ids.is_empty() {
        joins.push_str(&format!(
            " JOIN (SELECT generation_id FROM generation_loras \
               WHERE lora_id IN ({}) \
               GROUP BY generation_id \
               HAVING COUNT(DISTINCT lora_id) = {}) lora_filter \
              ON generations.id = lora_filter.generation_id",
            placeholders(filter.lora_ids.len()),
            filter.lora_ids.len(),
        ));
        for id in &filter.lora_ids {
            params.push(Box::new(*id));
        }
    }

    if !filter.node_types.is_empty() {
        joins.push_str(&format!(
            " JOIN (SELECT g.id AS generation_id \
               FROM generations g, json_each(g.raw_json, '$.prompt') node_entry \
               WHERE json_type(g.raw_json, '$.prompt') = 'object' \
                 AND json_extract(node_entry.value, '$.class_type') IN ({}) \
               GROUP BY g.id \
               HAVING COUNT(DISTINCT json_extract(node_entry.value, '$.class_type')) = {}) \
              node_filter ON generations.id = node_filter.generation_id",
            placeholders(filter.node_types.len()),
            filter.node_types.len(),
        ));
        for node_type in &filter.node_types {
            params.push(Box::new(node_type.clone()));
        }
    }

    if let Some(text) = &filter.text {
        conditions.push("generations.raw_json LIKE ?".to_string());
        params.push(Box::new(format!("%{text}%")));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    (joins, where_clause, params)
}

fn run_query<T>(
    db: &Database,
    sql: &str,
    params: &[Box<dyn ToSql>],
    map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = db.conn().prepare(sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(param_refs.as_slice(), map)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Page of generations matching the filter, newest first.
pub fn fetch_filtered(
    db: &Database,
    filter: &GenerationFilter,
    page: i64,
) -> Result<Vec<GenerationRecord>> {
    let (joins, where_clause, mut params) = filter_clauses(filter);
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM generations{joins}{where_clause} \
         ORDER BY generations.id DESC LIMIT ? OFFSET ?"
    );
    params.push(Box::new(ITEMS_PER_PAGE));
    params.push(Box::new((page.max(1) - 1) * ITEMS_PER_PAGE));
    run_query(db, &sql, &params, record_from_row)
}

/// Total number of generations matching the filter.
pub fn count_filtered(db: &Database, filter: &GenerationFilter) -> Result<i64> {
    let (joins, where_clause, params) = filter_clauses(filter);
    let sql = format!("SELECT COUNT(*) FROM generations{joins}{where_clause}");
    let counts = run_query(db, &sql, &params, |row| row.get::<_, i64>(0))?;
    Ok(counts.into_iter().next().unwrap_or(0))
}

pub fn total_pages(db: &Database, filter: &GenerationFilter) -> Result<i64> {
    let count = count_filtered(db, filter)?;
    Ok((count + ITEMS_PER_PAGE - 1) / ITEMS_PER_PAGE)
}

// === Links ===

pub fn link_checkpoints(db: &Database, generation_id: i64, checkpoint_ids: &[i64]) -> Result<()> {
    let mut insert = db.conn().prepare(
        "INSERT OR IGNORE INTO generation_checkpoints (generation_id, checkpoint_id) VALUES (?, ?)",
    )?;
    for checkpoint_id in checkpoint_ids {
        insert.execute(rusqlite::params![generation_id, checkpoint_id])?;
    }
    Ok(())
}

/// Link LoRAs at their observed strengths. The same adapter may appear
/// twice at different strengths; each pair gets its own link row.
pub fn link_loras(
    db: &Database,
    generation_id: i64,
    links: &[(i64, f64, f64)],
) -> Result<()> {
    let mut insert = db.conn().prepare(
        "INSERT INTO generation_loras (generation_id, lora_id, model_strength, clip_strength) \
         VALUES (?, ?, ?, ?)",
    )?;
    for (lora_id, model_strength, clip_strength) in links {
        insert.execute(rusqlite::params![
            generation_id,
            lora_id,
            model_strength,
            clip_strength
        ])?;
    }
    Ok(())
}

pub fn link_ksamplers(db: &Database, generation_id: i64, k_sampler_ids: &[i64]) -> Result<()> {
    let mut insert = db.conn().prepare(
        "INSERT OR IGNORE INTO generation_k_samplers (generation_id, k_sampler_id) VALUES (?, ?)",
    )?;
    for k_sampler_id in k_sampler_ids {
        insert.execute(rusqlite::params![generation_id, k_sampler_id])?;
    }
    Ok(())
}

pub fn checkpoint_ids(db: &Database, generation_id: i64) -> Result<Vec<i64>> {
    let mut stmt = db.conn().prepare(
        "SELECT checkpoint_id FROM generation_checkpoints WHERE generation_id = ? \
         ORDER BY checkpoint_id",
    )?;
    let ids = stmt
        .query_map([generation_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn lora_links(db: &Database, generation_id: i64) -> Result<Vec<(i64, f64, f64)>> {
    let mut stmt = db.conn().prepare(
        "SELECT lora_id, model_strength, clip_strength FROM generation_loras \
         WHERE generation_id = ? ORDER BY lora_id, model_strength",
    )?;
    let links = stmt
        .query_map([generation_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn ksampler_ids(db: &Database, generation_id: i64) -> Result<Vec<i64>> {
    let mut stmt = db.conn().prepare(
        "SELECT k_sampler_id FROM generation_k_samplers WHERE generation_id = ? \
         ORDER BY k_sampler_id",
    )?;
    let ids = stmt
        .query_map([generation_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

// === Facets ===

/// Distinct checkpoints, narrowed by the other active filters.
pub fn checkpoint_facet(db: &Database, filter: &GenerationFilter) -> Result<Vec<(i64, String)>> {
    if filter.is_empty() {
        return run_query(
            db,
            "SELECT id, name FROM checkpoints ORDER BY name",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
    }
    let (joins, where_clause, params) = filter_clauses(filter);
    let sql = format!(
        "SELECT checkpoints.id, checkpoints.name FROM generations{joins} \
         JOIN generation_checkpoints ON generations.id = generation_checkpoints.generation_id \
         JOIN checkpoints ON generation_checkpoints.checkpoint_id = checkpoints.id\
         {where_clause} GROUP BY checkpoints.id ORDER BY checkpoints.name"
    );
    run_query(db, &sql, &params, |row| Ok((row.get(0)?, row.get(1)?)))
}

/// Distinct LoRAs, narrowed by the other active filters.
pub fn lora_facet(db: &Database, filter: &GenerationFilter) -> Result<Vec<(i64, String)>> {
    if filter.is_empty() {
        return run_query(db, "SELECT id, name FROM loras ORDER BY name", &[], |row| {
            Ok((row.get(0)?, row.get(1)?))
        });
    }
    let (joins, where_clause, params) = filter_clauses(filter);
    let sql = format!(
        "SELECT loras.id, loras.name FROM generations{joins} \
         JOIN generation_loras ON generations.id = generation_loras.generation_id \
         JOIN loras ON generation_loras.lora_id = loras.id\
         {where_clause} GROUP BY loras.id ORDER BY loras.name"
    );
    run_query(db, &sql, &params, |row| Ok((row.get(0)?, row.get(1)?)))
}

/// Distinct node class types, narrowed by the other active filters.
pub fn node_facet(db: &Database, filter: &GenerationFilter) -> Result<Vec<String>> {
    if filter.is_empty() {
        return run_query(db, "SELECT name FROM nodes ORDER BY name", &[], |row| {
            row.get(0)
        });
    }
    let (joins, where_clause, params) = filter_clauses(filter);
    let condition = if where_clause.is_empty() {
        " WHERE ".to_string()
    } else {
        format!("{where_clause} AND ")
    };
    let sql = format!(
        "SELECT DISTINCT json_extract(node_entry.value, '$.class_type') AS class_type \
         FROM generations{joins}, json_each(generations.raw_json, '$.prompt') node_entry\
         {condition}json_type(generations.raw_json, '$.prompt') = 'object' \
         AND json_extract(node_entry.value, '$.class_type') IS NOT NULL \
         ORDER BY class_type"
    );
    run_query(db, &sql, &params, |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::{get_or_create_checkpoints, get_or_create_loras, register_nodes};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn sample_generation(location: &str, raw_json: &str) -> NewGeneration {
        NewGeneration {
            file_type_id: 1,
            source: Some("ComfyUI".into()),
            name: location.rsplit('/').next().unwrap().to_string(),
            file_location: location.to_string(),
            width: Some(512),
            height: Some(512),
            date_created: None,
            size: 1000,
            raw_json: raw_json.to_string(),
        }
    }

    fn insert_sample(db: &Database, location: &str, raw_json: &str) -> i64 {
        crate::db::entities::get_or_create_file_type(db, "png").unwrap();
        insert_generation(db, &sample_generation(location, raw_json)).unwrap()
    }

    #[test]
    fn test_location_is_unique() {
        let db = test_db();
        insert_sample(&db, "/images/a.png", "{}");
        assert!(insert_generation(&db, &sample_generation("/images/a.png", "{}")).is_err());
    }

    #[test]
    fn test_find_by_location() {
        let db = test_db();
        let id = insert_sample(&db, "/images/a.png", "{}");
        assert_eq!(find_by_location(&db, "/images/a.png").unwrap(), Some(id));
        assert_eq!(find_by_location(&db, "/images/b.png").unwrap(), None);
    }

    #[test]
    fn test_delete_generation_removes_links_but_not_entities() {
        let db = test_db();
        let gen_id = insert_sample(&db, "/images/a.png", "{}");
        let ckpts = get_or_create_checkpoints(&db, &["m.safetensors".into()]).unwrap();
        let loras = get_or_create_loras(&db, &["l.safetensors".into()]).unwrap();
        link_checkpoints(&db, gen_id, &[ckpts["m.safetensors"]]).unwrap();
        link_loras(&db, gen_id, &[(loras["l.safetensors"], 0.8, 0.8)]).unwrap();

        delete_generation(&db, gen_id).unwrap();

        assert!(fetch_generation(&db, gen_id).unwrap().is_none());
        assert!(checkpoint_ids(&db, gen_id).unwrap().is_empty());
        assert!(lora_links(&db, gen_id).unwrap().is_empty());
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_filter_requires_all_checkpoints() {
        let db = test_db();
        let ckpts = get_or_create_checkpoints(
            &db,
            &["a.safetensors".into(), "b.safetensors".into()],
        )
        .unwrap();
        let both = insert_sample(&db, "/images/both.png", "{}");
        let only_a = insert_sample(&db, "/images/a.png", "{}");
        link_checkpoints(&db, both, &[ckpts["a.safetensors"], ckpts["b.safetensors"]]).unwrap();
        link_checkpoints(&db, only_a, &[ckpts["a.safetensors"]]).unwrap();

        let filter = GenerationFilter {
            checkpoint_ids: vec![ckpts["a.safetensors"], ckpts["b.safetensors"]],
            ..Default::default()
        };
        let matched = fetch_filtered(&db, &filter, 1).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, both);
    }

    #[test]
    fn test_text_filter_over_raw_json() {
        let db = test_db();
        insert_sample(&db, "/images/a.png", r#"{"prompt": {"1": {"class_type": "KSampler"}}}"#);
        insert_sample(&db, "/images/b.png", r#"{"parameters": "a dog"}"#);

        let filter = GenerationFilter {
            text: Some("dog".into()),
            ..Default::default()
        };
        let matched = fetch_filtered(&db, &filter, 1).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].file_location, "/images/b.png");
    }

    #[test]
    fn test_node_type_filter_walks_raw_graph() {
        let db = test_db();
        let with_sampler = insert_sample(
            &db,
            "/images/a.png",
            r#"{"prompt": {"1": {"class_type": "KSampler", "inputs": {}},
                           "2": {"class_type": "VAEDecode", "inputs": {}}}}"#,
        );
        insert_sample(
            &db,
            "/images/b.png",
            r#"{"prompt": {"1": {"class_type": "VAEDecode", "inputs": {}}}}"#,
        );

        let filter = GenerationFilter {
            node_types: vec!["KSampler".into(), "VAEDecode".into()],
            ..Default::default()
        };
        let matched = fetch_filtered(&db, &filter, 1).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, with_sampler);
    }

    #[test]
    fn test_facets_narrow_by_other_filters() {
        let db = test_db();
        let ckpts = get_or_create_checkpoints(
            &db,
            &["a.safetensors".into(), "b.safetensors".into()],
        )
        .unwrap();
        let loras = get_or_create_loras(&db, &["l.safetensors".into()]).unwrap();
        register_nodes(&db, ["KSampler"]).unwrap();

        let g1 = insert_sample(&db, "/images/1.png", "{}");
        link_checkpoints(&db, g1, &[ckpts["a.safetensors"]]).unwrap();
        link_loras(&db, g1, &[(loras["l.safetensors"], 1.0, 1.0)]).unwrap();

        let g2 = insert_sample(&db, "/images/2.png", "{}");
        link_checkpoints(&db, g2, &[ckpts["b.safetensors"]]).unwrap();

        // Unfiltered facet lists everything.
        assert_eq!(checkpoint_facet(&db, &GenerationFilter::default()).unwrap().len(), 2);

        // Narrowed by lora: only the checkpoint co-occurring with it.
        let filter = GenerationFilter {
            lora_ids: vec![loras["l.safetensors"]],
            ..Default::default()
        };
        let facet = checkpoint_facet(&db, &filter).unwrap();
        assert_eq!(facet.len(), 1);
        assert_eq!(facet[0].1, "a.safetensors");
    }

    #[test]
    fn test_pagination() {
        let db = test_db();
        for i in 0..(ITEMS_PER_PAGE + 5) {
            insert_sample(&db, &format!("/images/{i}.png"), "{}");
        }
        let filter = GenerationFilter::default();
        assert_eq!(fetch_filtered(&db, &filter, 1).unwrap().len(), ITEMS_PER_PAGE as usize);
        assert_eq!(fetch_filtered(&db, &filter, 2).unwrap().len(), 5);
        assert_eq!(total_pages(&db, &filter).unwrap(), 2);
    }
}
