//! Sampler rows and their prompt links.
//!
//! KSampler rows are never shared: each ingestion creates fresh rows and
//! links them to exactly one generation. A sampler can carry several
//! positive or negative prompts when conditioning branches were combined
//! upstream.

use anyhow::Result;

use super::Database;

/// One sampling invocation about to be persisted.
#[derive(Debug, Clone, Default)]
pub struct NewKSampler {
    pub checkpoint_id: Option<i64>,
    pub seed: Option<i64>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub positive_prompt_ids: Vec<i64>,
    pub negative_prompt_ids: Vec<i64>,
}

/// Insert sampler rows plus their prompt links, returning the new ids in
/// input order.
pub fn insert_ksamplers(db: &Database, samplers: &[NewKSampler]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(samplers.len());

    for sampler in samplers {
        db.conn().execute(
            r#"
            INSERT INTO k_samplers (
                checkpoint_id, seed, steps, cfg, sampler_name, scheduler, denoise
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                sampler.checkpoint_id,
                sampler.seed,
                sampler.steps,
                sampler.cfg,
                sampler.sampler_name,
                sampler.scheduler,
                sampler.denoise,
            ],
        )?;
        let k_sampler_id = db.conn().last_insert_rowid();

        link_prompts(
            db,
            "k_sampler_positive_prompts",
            k_sampler_id,
            &sampler.positive_prompt_ids,
        )?;
        link_prompts(
            db,
            "k_sampler_negative_prompts",
            k_sampler_id,
            &sampler.negative_prompt_ids,
        )?;

        ids.push(k_sampler_id);
    }

    Ok(ids)
}

fn link_prompts(db: &Database, table: &str, k_sampler_id: i64, prompt_ids: &[i64]) -> Result<()> {
    let mut insert = db.conn().prepare(&format!(
        "INSERT OR IGNORE INTO {table} (k_sampler_id, prompt_id) VALUES (?, ?)"
    ))?;
    for prompt_id in prompt_ids {
        insert.execute(rusqlite::params![k_sampler_id, prompt_id])?;
    }
    Ok(())
}

/// Positive and negative prompt ids linked to one sampler.
pub fn prompt_ids(db: &Database, k_sampler_id: i64) -> Result<(Vec<i64>, Vec<i64>)> {
    let positive = query_prompt_ids(db, "k_sampler_positive_prompts", k_sampler_id)?;
    let negative = query_prompt_ids(db, "k_sampler_negative_prompts", k_sampler_id)?;
    Ok((positive, negative))
}

fn query_prompt_ids(db: &Database, table: &str, k_sampler_id: i64) -> Result<Vec<i64>> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT prompt_id FROM {table} WHERE k_sampler_id = ? ORDER BY prompt_id"
    ))?;
    let ids = stmt
        .query_map([k_sampler_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Sampler attributes read back for display.
#[derive(Debug, Clone)]
pub struct KSamplerRecord {
    pub id: i64,
    pub checkpoint_id: Option<i64>,
    pub seed: Option<i64>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
}

pub fn fetch_ksampler(db: &Database, k_sampler_id: i64) -> Result<Option<KSamplerRecord>> {
    use rusqlite::OptionalExtension;
    let record = db
        .conn()
        .query_row(
            "SELECT id, checkpoint_id, seed, steps, cfg, sampler_name, scheduler, denoise \
             FROM k_samplers WHERE id = ?",
            [k_sampler_id],
            |row| {
                Ok(KSamplerRecord {
                    id: row.get(0)?,
                    checkpoint_id: row.get(1)?,
                    seed: row.get(2)?,
                    steps: row.get(3)?,
                    cfg: row.get(4)?,
                    sampler_name: row.get(5)?,
                    scheduler: row.get(6)?,
                    denoise: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}
