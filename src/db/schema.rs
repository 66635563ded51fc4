pub const SCHEMA: &str = r#"
-- Deduplicated file-extension registry
CREATE TABLE IF NOT EXISTS file_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- Generations: one ingested image
CREATE TABLE IF NOT EXISTS generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_type_id INTEGER NOT NULL,
    source TEXT,                        -- 'ComfyUI' | 'Automatic1111' | NULL
    name TEXT NOT NULL,
    file_location TEXT NOT NULL UNIQUE, -- resolved absolute path, the dedupe key
    width INTEGER,
    height INTEGER,
    date_created TEXT,
    size INTEGER NOT NULL,
    raw_json TEXT NOT NULL,
    FOREIGN KEY (file_type_id) REFERENCES file_types(id)
);

CREATE INDEX IF NOT EXISTS idx_generations_source ON generations(source);

-- Model checkpoints, keyed by cleaned file name
CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    file_type_id INTEGER NOT NULL,
    FOREIGN KEY (file_type_id) REFERENCES file_types(id)
);

-- LoRA adapters; strengths live on the generation link, not here
CREATE TABLE IF NOT EXISTS loras (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    file_type_id INTEGER NOT NULL,
    FOREIGN KEY (file_type_id) REFERENCES file_types(id)
);

-- Prompt text, keyed by exact text
CREATE TABLE IF NOT EXISTS prompts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL UNIQUE
);

-- ComfyUI node class_type registry, append-only
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- Sampling invocations; always created fresh per generation
CREATE TABLE IF NOT EXISTS k_samplers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    checkpoint_id INTEGER,              -- NULL when unresolved
    seed INTEGER,                       -- NULL when unresolved
    steps INTEGER,
    cfg REAL,
    sampler_name TEXT,
    scheduler TEXT,
    denoise REAL,
    FOREIGN KEY (checkpoint_id) REFERENCES checkpoints(id)
);

-- Link tables
CREATE TABLE IF NOT EXISTS generation_checkpoints (
    generation_id INTEGER NOT NULL,
    checkpoint_id INTEGER NOT NULL,
    PRIMARY KEY (generation_id, checkpoint_id),
    FOREIGN KEY (generation_id) REFERENCES generations(id),
    FOREIGN KEY (checkpoint_id) REFERENCES checkpoints(id)
);

CREATE TABLE IF NOT EXISTS generation_loras (
    generation_id INTEGER NOT NULL,
    lora_id INTEGER NOT NULL,
    model_strength REAL NOT NULL,
    clip_strength REAL NOT NULL,
    FOREIGN KEY (generation_id) REFERENCES generations(id),
    FOREIGN KEY (lora_id) REFERENCES loras(id)
);

CREATE INDEX IF NOT EXISTS idx_generation_loras_generation ON generation_loras(generation_id);

CREATE TABLE IF NOT EXISTS generation_k_samplers (
    generation_id INTEGER NOT NULL,
    k_sampler_id INTEGER NOT NULL,
    PRIMARY KEY (generation_id, k_sampler_id),
    FOREIGN KEY (generation_id) REFERENCES generations(id),
    FOREIGN KEY (k_sampler_id) REFERENCES k_samplers(id)
);

CREATE TABLE IF NOT EXISTS k_sampler_positive_prompts (
    k_sampler_id INTEGER NOT NULL,
    prompt_id INTEGER NOT NULL,
    PRIMARY KEY (k_sampler_id, prompt_id),
    FOREIGN KEY (k_sampler_id) REFERENCES k_samplers(id),
    FOREIGN KEY (prompt_id) REFERENCES prompts(id)
);

CREATE TABLE IF NOT EXISTS k_sampler_negative_prompts (
    k_sampler_id INTEGER NOT NULL,
    prompt_id INTEGER NOT NULL,
    PRIMARY KEY (k_sampler_id, prompt_id),
    FOREIGN KEY (k_sampler_id) REFERENCES k_samplers(id),
    FOREIGN KEY (prompt_id) REFERENCES prompts(id)
);
"#;

/// Idempotent follow-up statements, applied on every startup. Failures are
/// ignored so re-adding an existing column does not abort initialization.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE generations ADD COLUMN rating INTEGER",
    "CREATE INDEX IF NOT EXISTS idx_generation_checkpoints_checkpoint \
     ON generation_checkpoints(checkpoint_id)",
    "CREATE INDEX IF NOT EXISTS idx_generation_loras_lora ON generation_loras(lora_id)",
];
