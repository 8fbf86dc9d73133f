use rusqlite::{params, params_from_iter, types::Value, Connection, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use super::models::{
    ArchiveStats, Joker, NewJoker, NewRound, NewRun, NewScreenshot, NewStrategy, Round, Run,
    RunListItem, RunPatch, RunStatus, Screenshot, SeedStats, Strategy, StrategyRef, StrategyStats,
    Tag,
};
use crate::accuracy;
use crate::query::RunQuery;

pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_code TEXT NOT NULL UNIQUE,
                seed TEXT,
                deck TEXT NOT NULL DEFAULT 'Red Deck',
                stake TEXT NOT NULL DEFAULT 'White',
                final_ante INTEGER NOT NULL DEFAULT 1,
                -- Derived: MAX(best_hand_score) over rounds, synced on round insert
                final_score INTEGER,
                won INTEGER NOT NULL DEFAULT 0,
                endless_ante INTEGER,
                status TEXT NOT NULL DEFAULT 'running',
                notes TEXT,
                progress TEXT,
                hands_played INTEGER NOT NULL DEFAULT 0,
                discards_used INTEGER NOT NULL DEFAULT 0,
                purchases INTEGER NOT NULL DEFAULT 0,
                joker_count INTEGER NOT NULL DEFAULT 0,
                rule_decisions INTEGER NOT NULL DEFAULT 0,
                llm_decisions INTEGER NOT NULL DEFAULT 0,
                duration_seconds INTEGER,
                llm_cost_usd REAL,
                llm_model TEXT,
                strategy_id INTEGER,
                played_at INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rounds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                ante INTEGER NOT NULL,
                blind_type TEXT NOT NULL,
                boss_name TEXT,
                target_score INTEGER,
                best_hand_score INTEGER,
                hands_played INTEGER,
                discards_used INTEGER,
                skipped INTEGER NOT NULL DEFAULT 0,
                money_after INTEGER
            );

            CREATE TABLE IF NOT EXISTS jokers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                position INTEGER NOT NULL,
                edition TEXT,
                eternal INTEGER NOT NULL DEFAULT 0,
                perishable INTEGER NOT NULL DEFAULT 0,
                rental INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS screenshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                round_id INTEGER,
                filename TEXT NOT NULL,
                original_name TEXT,
                caption TEXT,
                event_type TEXT,
                file_size INTEGER,
                width INTEGER,
                height INTEGER,
                estimated_score INTEGER,
                actual_score INTEGER,
                score_error REAL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                ante INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                code_hash TEXT,
                model TEXT,
                params TEXT,
                source_code TEXT,
                summary TEXT,
                -- Tree by convention only; the lineage walk guards against cycles
                parent_id INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rounds_run ON rounds(run_id);
            CREATE INDEX IF NOT EXISTS idx_jokers_run ON jokers(run_id);
            CREATE INDEX IF NOT EXISTS idx_screenshots_run ON screenshots(run_id);
            CREATE INDEX IF NOT EXISTS idx_tags_run ON tags(run_id);
            CREATE INDEX IF NOT EXISTS idx_runs_strategy ON runs(strategy_id);
            CREATE INDEX IF NOT EXISTS idx_runs_seed ON runs(seed);
            CREATE INDEX IF NOT EXISTS idx_strategies_parent ON strategies(parent_id);

            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // ========================================================================
    // Runs
    // ========================================================================

    const RUN_COLUMNS: &'static str = "id, run_code, seed, deck, stake, final_ante, final_score, won, endless_ante, status, notes, progress, hands_played, discards_used, purchases, joker_count, rule_decisions, llm_decisions, duration_seconds, llm_cost_usd, llm_model, strategy_id, played_at, created_at";

    fn run_columns_prefixed() -> String {
        Self::RUN_COLUMNS
            .split(", ")
            .map(|c| format!("r.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn row_to_run(row: &rusqlite::Row) -> Result<Run> {
        let status: String = row.get(9)?;
        Ok(Run {
            id: row.get(0)?,
            run_code: row.get(1)?,
            seed: row.get(2)?,
            deck: row.get(3)?,
            stake: row.get(4)?,
            final_ante: row.get(5)?,
            final_score: row.get(6)?,
            won: row.get(7)?,
            endless_ante: row.get(8)?,
            // Anything unrecognized reads as terminal
            status: RunStatus::from_str(&status).unwrap_or(RunStatus::Completed),
            notes: row.get(10)?,
            progress: row.get(11)?,
            hands_played: row.get(12)?,
            discards_used: row.get(13)?,
            purchases: row.get(14)?,
            joker_count: row.get(15)?,
            rule_decisions: row.get(16)?,
            llm_decisions: row.get(17)?,
            duration_seconds: row.get(18)?,
            llm_cost_usd: row.get(19)?,
            llm_model: row.get(20)?,
            strategy_id: row.get(21)?,
            played_at: row.get(22)?,
            created_at: row.get(23)?,
        })
    }

    /// Create a run. `run_code` and `played_at` are resolved by the caller
    /// (code generation and timestamp parsing happen at the API boundary).
    pub fn create_run(&self, new: &NewRun, run_code: &str, played_at: i64) -> Result<Run> {
        let conn = self.conn.lock().unwrap();
        let status = new.status.unwrap_or(RunStatus::Running);
        let created_at = Self::now_millis();
        conn.execute(
            "INSERT INTO runs (run_code, seed, deck, stake, final_ante, final_score, won, endless_ante, status, notes, strategy_id, llm_model, played_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run_code,
                new.seed,
                new.deck,
                new.stake,
                new.final_ante,
                new.final_score,
                new.won,
                new.endless_ante,
                status.as_str(),
                new.notes,
                new.strategy_id,
                new.llm_model,
                played_at,
                created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Run {
            id,
            run_code: run_code.to_string(),
            seed: new.seed.clone(),
            deck: new.deck.clone(),
            stake: new.stake.clone(),
            final_ante: new.final_ante,
            final_score: new.final_score,
            won: new.won,
            endless_ante: new.endless_ante,
            status,
            notes: new.notes.clone(),
            progress: None,
            hands_played: 0,
            discards_used: 0,
            purchases: 0,
            joker_count: 0,
            rule_decisions: 0,
            llm_decisions: 0,
            duration_seconds: None,
            llm_cost_usd: None,
            llm_model: new.llm_model.clone(),
            strategy_id: new.strategy_id,
            played_at: Some(played_at),
            created_at,
        })
    }

    pub fn get_run(&self, id: i64) -> Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE id = ?1",
            Self::RUN_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_run(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_run_id_by_code(&self, run_code: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM runs WHERE run_code = ?1")?;
        let mut rows = stmt.query(params![run_code])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Paginated listing. The WHERE/ORDER fragments come from the validated
    /// query; filter values travel as bound parameters.
    pub fn list_runs(&self, q: &RunQuery) -> Result<(Vec<RunListItem>, u32)> {
        let (where_sql, mut values) = q.filter.to_sql();
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM runs {}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit_idx = values.len() + 1;
        let offset_idx = values.len() + 2;
        let sql = format!(
            "SELECT {cols}, s.name AS strategy_name,
                    (SELECT COUNT(*) FROM screenshots sc WHERE sc.run_id = r.id) AS screenshot_count
             FROM runs r LEFT JOIN strategies s ON r.strategy_id = s.id
             {where_sql} {order} LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            cols = Self::run_columns_prefixed(),
            where_sql = where_sql,
            order = q.order_sql(),
        );
        values.push(Value::Integer(q.page.per_page() as i64));
        values.push(Value::Integer(q.page.offset() as i64));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(RunListItem {
                run: Self::row_to_run(row)?,
                strategy_name: row.get(24)?,
                screenshot_count: row.get(25)?,
            });
        }
        Ok((items, total as u32))
    }

    /// Apply a non-empty patch. Column names come from the closed `RunPatch`
    /// field set, never from request keys.
    pub fn patch_run(&self, id: i64, patch: &RunPatch) -> Result<Option<Run>> {
        let (sets, mut values) = patch.set_clauses();
        if sets.is_empty() {
            return self.get_run(id);
        }
        {
            let conn = self.conn.lock().unwrap();
            let sql = format!(
                "UPDATE runs SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len() + 1
            );
            values.push(Value::Integer(id));
            let affected = conn.execute(&sql, params_from_iter(values.iter()))?;
            if affected == 0 {
                return Ok(None);
            }
        }
        self.get_run(id)
    }

    /// Delete a run; child rows go with it via FK cascade. Screenshot files
    /// on disk are the caller's to clean up (it fetches filenames first).
    pub fn delete_run(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM runs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn get_runs_for_strategy(&self, strategy_id: i64) -> Result<Vec<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE strategy_id = ?1
             ORDER BY played_at DESC NULLS LAST, id DESC",
            Self::RUN_COLUMNS
        ))?;
        let mut rows = stmt.query(params![strategy_id])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(Self::row_to_run(row)?);
        }
        Ok(runs)
    }

    pub fn get_runs_for_seed(&self, seed: &str) -> Result<Vec<RunListItem>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {cols}, s.name AS strategy_name,
                    (SELECT COUNT(*) FROM screenshots sc WHERE sc.run_id = r.id) AS screenshot_count
             FROM runs r LEFT JOIN strategies s ON r.strategy_id = s.id
             WHERE r.seed = ?1
             ORDER BY r.played_at DESC NULLS LAST, r.id DESC",
            cols = Self::run_columns_prefixed(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![seed])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(RunListItem {
                run: Self::row_to_run(row)?,
                strategy_name: row.get(24)?,
                screenshot_count: row.get(25)?,
            });
        }
        Ok(items)
    }

    pub fn recent_runs(&self, limit: u32) -> Result<Vec<RunListItem>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {cols}, s.name AS strategy_name,
                    (SELECT COUNT(*) FROM screenshots sc WHERE sc.run_id = r.id) AS screenshot_count
             FROM runs r LEFT JOIN strategies s ON r.strategy_id = s.id
             ORDER BY r.played_at DESC NULLS LAST, r.id DESC LIMIT ?1",
            cols = Self::run_columns_prefixed(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![limit])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(RunListItem {
                run: Self::row_to_run(row)?,
                strategy_name: row.get(24)?,
                screenshot_count: row.get(25)?,
            });
        }
        Ok(items)
    }

    // ========================================================================
    // Rounds
    // ========================================================================

    const ROUND_COLUMNS: &'static str = "id, run_id, ante, blind_type, boss_name, target_score, best_hand_score, hands_played, discards_used, skipped, money_after";

    fn row_to_round(row: &rusqlite::Row) -> Result<Round> {
        Ok(Round {
            id: row.get(0)?,
            run_id: row.get(1)?,
            ante: row.get(2)?,
            blind_type: row.get(3)?,
            boss_name: row.get(4)?,
            target_score: row.get(5)?,
            best_hand_score: row.get(6)?,
            hands_played: row.get(7)?,
            discards_used: row.get(8)?,
            skipped: row.get(9)?,
            money_after: row.get(10)?,
        })
    }

    /// Insert rounds and resync the run's derived `final_score`, all inside
    /// one transaction so readers never see a round without the updated
    /// aggregate.
    pub fn insert_rounds(&self, run_id: i64, batch: &[NewRound]) -> Result<Vec<Round>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut out = Vec::with_capacity(batch.len());
        for r in batch {
            tx.execute(
                "INSERT INTO rounds (run_id, ante, blind_type, boss_name, target_score, best_hand_score, hands_played, discards_used, skipped, money_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_id,
                    r.ante,
                    r.blind_type,
                    r.boss_name,
                    r.target_score,
                    r.best_hand_score,
                    r.hands_played,
                    r.discards_used,
                    r.skipped,
                    r.money_after,
                ],
            )?;
            out.push(Round {
                id: tx.last_insert_rowid(),
                run_id,
                ante: r.ante,
                blind_type: r.blind_type.clone(),
                boss_name: r.boss_name.clone(),
                target_score: r.target_score,
                best_hand_score: r.best_hand_score,
                hands_played: r.hands_played,
                discards_used: r.discards_used,
                skipped: r.skipped,
                money_after: r.money_after,
            });
        }
        tx.execute(
            "UPDATE runs
             SET final_score = (SELECT MAX(best_hand_score) FROM rounds WHERE run_id = ?1)
             WHERE id = ?1",
            params![run_id],
        )?;
        tx.commit()?;
        Ok(out)
    }

    pub fn get_rounds_for_run(&self, run_id: i64) -> Result<Vec<Round>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rounds WHERE run_id = ?1 ORDER BY ante, blind_type",
            Self::ROUND_COLUMNS
        ))?;
        let mut rows = stmt.query(params![run_id])?;
        let mut rounds = Vec::new();
        while let Some(row) = rows.next()? {
            rounds.push(Self::row_to_round(row)?);
        }
        Ok(rounds)
    }

    // ========================================================================
    // Jokers
    // ========================================================================

    const JOKER_COLUMNS: &'static str = "id, run_id, name, position, edition, eternal, perishable, rental";

    fn row_to_joker(row: &rusqlite::Row) -> Result<Joker> {
        Ok(Joker {
            id: row.get(0)?,
            run_id: row.get(1)?,
            name: row.get(2)?,
            position: row.get(3)?,
            edition: row.get(4)?,
            eternal: row.get(5)?,
            perishable: row.get(6)?,
            rental: row.get(7)?,
        })
    }

    /// Insert jokers and refresh the run's denormalized joker count in the
    /// same transaction.
    pub fn insert_jokers(&self, run_id: i64, batch: &[NewJoker]) -> Result<Vec<Joker>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut out = Vec::with_capacity(batch.len());
        for j in batch {
            tx.execute(
                "INSERT INTO jokers (run_id, name, position, edition, eternal, perishable, rental)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![run_id, j.name, j.position, j.edition, j.eternal, j.perishable, j.rental],
            )?;
            out.push(Joker {
                id: tx.last_insert_rowid(),
                run_id,
                name: j.name.clone(),
                position: j.position,
                edition: j.edition.clone(),
                eternal: j.eternal,
                perishable: j.perishable,
                rental: j.rental,
            });
        }
        tx.execute(
            "UPDATE runs SET joker_count = (SELECT COUNT(*) FROM jokers WHERE run_id = ?1) WHERE id = ?1",
            params![run_id],
        )?;
        tx.commit()?;
        Ok(out)
    }

    pub fn get_jokers_for_run(&self, run_id: i64) -> Result<Vec<Joker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jokers WHERE run_id = ?1 ORDER BY position",
            Self::JOKER_COLUMNS
        ))?;
        let mut rows = stmt.query(params![run_id])?;
        let mut jokers = Vec::new();
        while let Some(row) = rows.next()? {
            jokers.push(Self::row_to_joker(row)?);
        }
        Ok(jokers)
    }

    // ========================================================================
    // Screenshots
    // ========================================================================

    const SCREENSHOT_COLUMNS: &'static str = "id, run_id, round_id, filename, original_name, caption, event_type, file_size, width, height, estimated_score, actual_score, score_error, created_at";

    fn row_to_screenshot(row: &rusqlite::Row) -> Result<Screenshot> {
        Ok(Screenshot {
            id: row.get(0)?,
            run_id: row.get(1)?,
            round_id: row.get(2)?,
            filename: row.get(3)?,
            original_name: row.get(4)?,
            caption: row.get(5)?,
            event_type: row.get(6)?,
            file_size: row.get(7)?,
            width: row.get(8)?,
            height: row.get(9)?,
            estimated_score: row.get(10)?,
            actual_score: row.get(11)?,
            score_error: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    /// Insert a screenshot. When both scores are present and the uploader
    /// supplied no error value, the stored signed relative error is derived
    /// here so every row carries the same convention.
    pub fn insert_screenshot(&self, new: &NewScreenshot) -> Result<Screenshot> {
        let score_error = new.score_error.or_else(|| match (new.estimated_score, new.actual_score) {
            (Some(est), Some(act)) => accuracy::relative_error(est, act),
            _ => None,
        });
        let created_at = Self::now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO screenshots (run_id, round_id, filename, original_name, caption, event_type, file_size, width, height, estimated_score, actual_score, score_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                new.run_id,
                new.round_id,
                new.filename,
                new.original_name,
                new.caption,
                new.event_type,
                new.file_size,
                new.width,
                new.height,
                new.estimated_score,
                new.actual_score,
                score_error,
                created_at,
            ],
        )?;
        Ok(Screenshot {
            id: conn.last_insert_rowid(),
            run_id: new.run_id,
            round_id: new.round_id,
            filename: new.filename.clone(),
            original_name: new.original_name.clone(),
            caption: new.caption.clone(),
            event_type: new.event_type.clone(),
            file_size: new.file_size,
            width: new.width,
            height: new.height,
            estimated_score: new.estimated_score,
            actual_score: new.actual_score,
            score_error,
            created_at,
        })
    }

    pub fn get_screenshot(&self, id: i64) -> Result<Option<Screenshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM screenshots WHERE id = ?1",
            Self::SCREENSHOT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_screenshot(row)?))
        } else {
            Ok(None)
        }
    }

    /// Canonical timeline order: creation time, id as tiebreak.
    pub fn get_screenshots_for_run(&self, run_id: i64) -> Result<Vec<Screenshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM screenshots WHERE run_id = ?1 ORDER BY created_at, id",
            Self::SCREENSHOT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![run_id])?;
        let mut shots = Vec::new();
        while let Some(row) = rows.next()? {
            shots.push(Self::row_to_screenshot(row)?);
        }
        Ok(shots)
    }

    pub fn get_screenshot_filenames(&self, run_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT filename FROM screenshots WHERE run_id = ?1")?;
        let mut rows = stmt.query(params![run_id])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    pub fn delete_screenshot(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM screenshots WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// All stored score errors grouped by nothing: (run_id, error) pairs for
    /// screenshots carrying both scores. The accuracy module aggregates.
    pub fn get_score_errors(&self) -> Result<Vec<(i64, f64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT run_id, score_error FROM screenshots
             WHERE estimated_score IS NOT NULL AND actual_score IS NOT NULL
               AND score_error IS NOT NULL
             ORDER BY run_id, created_at, id",
        )?;
        let mut rows = stmt.query([])?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next()? {
            pairs.push((row.get(0)?, row.get(1)?));
        }
        Ok(pairs)
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn insert_tag(&self, run_id: i64, ante: i64, name: &str) -> Result<Tag> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tags (run_id, ante, name) VALUES (?1, ?2, ?3)",
            params![run_id, ante, name],
        )?;
        Ok(Tag { id: conn.last_insert_rowid(), run_id, ante, name: name.to_string() })
    }

    pub fn get_tags_for_run(&self, run_id: i64) -> Result<Vec<Tag>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, run_id, ante, name FROM tags WHERE run_id = ?1 ORDER BY ante, id")?;
        let mut rows = stmt.query(params![run_id])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(Tag {
                id: row.get(0)?,
                run_id: row.get(1)?,
                ante: row.get(2)?,
                name: row.get(3)?,
            });
        }
        Ok(tags)
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    const STRATEGY_COLUMNS: &'static str = "id, name, code_hash, model, params, source_code, summary, parent_id, created_at";

    fn row_to_strategy(row: &rusqlite::Row) -> Result<Strategy> {
        Ok(Strategy {
            id: row.get(0)?,
            name: row.get(1)?,
            code_hash: row.get(2)?,
            model: row.get(3)?,
            params: row.get(4)?,
            source_code: row.get(5)?,
            summary: row.get(6)?,
            parent_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Register a strategy. The content hash defaults to the sha256 of the
    /// source text so derivation lineage stays content-addressed.
    pub fn insert_strategy(&self, new: &NewStrategy) -> Result<Strategy> {
        let code_hash = new.code_hash.clone().or_else(|| {
            new.source_code
                .as_ref()
                .map(|src| hex::encode(Sha256::digest(src.as_bytes())))
        });
        let created_at = Self::now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO strategies (name, code_hash, model, params, source_code, summary, parent_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.name,
                code_hash,
                new.model,
                new.params,
                new.source_code,
                new.summary,
                new.parent_id,
                created_at,
            ],
        )?;
        Ok(Strategy {
            id: conn.last_insert_rowid(),
            name: new.name.clone(),
            code_hash,
            model: new.model.clone(),
            params: new.params.clone(),
            source_code: new.source_code.clone(),
            summary: new.summary.clone(),
            parent_id: new.parent_id,
            created_at,
        })
    }

    pub fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM strategies WHERE id = ?1",
            Self::STRATEGY_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_strategy(row)?))
        } else {
            Ok(None)
        }
    }

    /// Direct children only, creation order.
    pub fn get_strategy_children(&self, id: i64) -> Result<Vec<StrategyRef>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, code_hash, created_at FROM strategies
             WHERE parent_id = ?1 ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![id])?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            children.push(StrategyRef {
                id: row.get(0)?,
                name: row.get(1)?,
                code_hash: row.get(2)?,
                created_at: row.get(3)?,
            });
        }
        Ok(children)
    }

    pub fn set_strategy_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE strategies SET parent_id = ?1 WHERE id = ?2",
            params![parent_id, id],
        )?;
        Ok(())
    }

    pub fn list_strategies_with_stats(&self) -> Result<Vec<StrategyStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.code_hash, s.model, s.params, s.source_code, s.summary, s.parent_id, s.created_at,
                    COUNT(r.id),
                    SUM(CASE WHEN r.won THEN 1 ELSE 0 END),
                    AVG(r.final_ante),
                    AVG(r.llm_cost_usd),
                    AVG(r.duration_seconds)
             FROM strategies s LEFT JOIN runs r ON r.strategy_id = s.id
             GROUP BY s.id ORDER BY s.created_at DESC, s.id DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let wins: Option<i64> = row.get(10)?;
            out.push(StrategyStats {
                strategy: Self::row_to_strategy(row)?,
                run_count: row.get(9)?,
                wins: wins.unwrap_or(0),
                avg_ante: row.get(11)?,
                avg_cost: row.get(12)?,
                avg_duration: row.get(13)?,
            });
        }
        Ok(out)
    }

    // ========================================================================
    // Seeds / stats
    // ========================================================================

    pub fn list_seeds(&self) -> Result<Vec<SeedStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seed, COUNT(*),
                    MAX(final_ante),
                    AVG(final_ante),
                    SUM(CASE WHEN won THEN 1 ELSE 0 END),
                    COUNT(DISTINCT strategy_id),
                    MIN(played_at)
             FROM runs
             WHERE seed IS NOT NULL AND seed != ''
             GROUP BY seed ORDER BY COUNT(*) DESC, MAX(final_ante) DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let wins: Option<i64> = row.get(4)?;
            out.push(SeedStats {
                seed: row.get(0)?,
                run_count: row.get(1)?,
                best_ante: row.get(2)?,
                avg_ante: row.get(3)?,
                wins: wins.unwrap_or(0),
                strategy_count: row.get(5)?,
                first_played: row.get(6)?,
            });
        }
        Ok(out)
    }

    pub fn get_stats(&self) -> Result<ArchiveStats> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN won THEN 1 ELSE 0 END),
                    SUM(CASE WHEN won THEN 0 ELSE 1 END),
                    MAX(final_ante),
                    MAX(final_score),
                    COUNT(DISTINCT deck),
                    COUNT(DISTINCT stake)
             FROM runs",
            [],
            |row| {
                let wins: Option<i64> = row.get(1)?;
                let losses: Option<i64> = row.get(2)?;
                Ok(ArchiveStats {
                    total_runs: row.get(0)?,
                    wins: wins.unwrap_or(0),
                    losses: losses.unwrap_or(0),
                    highest_ante: row.get(3)?,
                    highest_score: row.get(4)?,
                    decks_used: row.get(5)?,
                    stakes_played: row.get(6)?,
                })
            },
        )
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn backup_to(&self, dest: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut dst = Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&*conn, &mut dst)?;
        backup.run_to_completion(5, std::time::Duration::from_millis(250), None)?;
        Ok(())
    }
}

impl RunPatch {
    pub fn is_empty(&self) -> bool {
        self.set_clauses().0.is_empty()
    }

    /// SET clauses with bound values, numbered in push order. Every column
    /// name below is a compile-time literal.
    fn set_clauses(&self) -> (Vec<String>, Vec<Value>) {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        fn push(col: &str, v: Value, values: &mut Vec<Value>, sets: &mut Vec<String>) {
            values.push(v);
            sets.push(format!("{} = ?{}", col, values.len()));
        }

        if let Some(v) = &self.seed {
            push("seed", Value::Text(v.clone()), &mut values, &mut sets);
        }
        if let Some(v) = &self.deck {
            push("deck", Value::Text(v.clone()), &mut values, &mut sets);
        }
        if let Some(v) = &self.stake {
            push("stake", Value::Text(v.clone()), &mut values, &mut sets);
        }
        if let Some(v) = self.final_ante {
            push("final_ante", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.final_score {
            push("final_score", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.won {
            push("won", Value::Integer(v as i64), &mut values, &mut sets);
        }
        if let Some(v) = self.endless_ante {
            push("endless_ante", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = &self.notes {
            push("notes", Value::Text(v.clone()), &mut values, &mut sets);
        }
        if let Some(v) = &self.progress {
            push("progress", Value::Text(v.clone()), &mut values, &mut sets);
        }
        if let Some(v) = self.status {
            push("status", Value::Text(v.as_str().to_string()), &mut values, &mut sets);
        }
        if let Some(v) = self.hands_played {
            push("hands_played", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.discards_used {
            push("discards_used", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.purchases {
            push("purchases", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.rule_decisions {
            push("rule_decisions", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.llm_decisions {
            push("llm_decisions", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.duration_seconds {
            push("duration_seconds", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.llm_cost_usd {
            push("llm_cost_usd", Value::Real(v), &mut values, &mut sets);
        }
        if let Some(v) = &self.llm_model {
            push("llm_model", Value::Text(v.clone()), &mut values, &mut sets);
        }
        if let Some(v) = self.strategy_id {
            push("strategy_id", Value::Integer(v), &mut values, &mut sets);
        }
        if let Some(v) = self.played_at {
            push("played_at", Value::Integer(v), &mut values, &mut sets);
        }

        (sets, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{RunFilter, RunQuery};

    fn make_run(db: &Database, code: &str) -> Run {
        let new = NewRun {
            run_code: Some(code.to_string()),
            seed: Some("TESTSEED".to_string()),
            deck: "Red Deck".to_string(),
            stake: "White".to_string(),
            final_ante: 1,
            final_score: None,
            won: false,
            endless_ante: None,
            notes: None,
            status: None,
            strategy_id: None,
            llm_model: None,
            played_at: None,
        };
        db.create_run(&new, code, 1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_final_score_syncs_with_rounds() {
        let db = Database::in_memory().unwrap();
        let run = make_run(&db, "R1");

        let rounds: Vec<NewRound> = [1200, 3400, 2100]
            .iter()
            .enumerate()
            .map(|(i, score)| NewRound {
                ante: i as i64 + 1,
                blind_type: "small".to_string(),
                best_hand_score: Some(*score),
                ..Default::default()
            })
            .collect();
        db.insert_rounds(run.id, &rounds).unwrap();
        assert_eq!(db.get_run(run.id).unwrap().unwrap().final_score, Some(3400));

        // A lower later round leaves the max untouched
        db.insert_rounds(
            run.id,
            &[NewRound {
                ante: 4,
                blind_type: "small".to_string(),
                best_hand_score: Some(500),
                ..Default::default()
            }],
        )
        .unwrap();
        assert_eq!(db.get_run(run.id).unwrap().unwrap().final_score, Some(3400));
    }

    #[test]
    fn test_joker_count_refreshed() {
        let db = Database::in_memory().unwrap();
        let run = make_run(&db, "R1");
        let jokers = vec![
            NewJoker {
                name: "Blueprint".to_string(),
                position: 0,
                edition: None,
                eternal: false,
                perishable: false,
                rental: false,
            },
            NewJoker {
                name: "Brainstorm".to_string(),
                position: 1,
                edition: Some("Negative".to_string()),
                eternal: true,
                perishable: false,
                rental: false,
            },
        ];
        db.insert_jokers(run.id, &jokers).unwrap();
        let run = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(run.joker_count, 2);

        let loaded = db.get_jokers_for_run(run.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Blueprint");
        assert_eq!(loaded[1].edition.as_deref(), Some("Negative"));
    }

    #[test]
    fn test_cascade_delete() {
        let db = Database::in_memory().unwrap();
        let run = make_run(&db, "R1");
        db.insert_rounds(
            run.id,
            &[NewRound { ante: 1, blind_type: "small".to_string(), ..Default::default() }],
        )
        .unwrap();
        db.insert_tag(run.id, 1, "Speed").unwrap();
        db.insert_screenshot(&NewScreenshot {
            run_id: run.id,
            round_id: None,
            filename: format!("{}/abc.png", run.id),
            original_name: None,
            caption: Some("第1关 小盲".to_string()),
            event_type: None,
            file_size: None,
            width: None,
            height: None,
            estimated_score: None,
            actual_score: None,
            score_error: None,
        })
        .unwrap();

        assert!(db.delete_run(run.id).unwrap());
        assert!(db.get_run(run.id).unwrap().is_none());
        assert!(db.get_rounds_for_run(run.id).unwrap().is_empty());
        assert!(db.get_tags_for_run(run.id).unwrap().is_empty());
        assert!(db.get_screenshots_for_run(run.id).unwrap().is_empty());
    }

    #[test]
    fn test_screenshot_error_derived_on_insert() {
        let db = Database::in_memory().unwrap();
        let run = make_run(&db, "R1");
        let shot = db
            .insert_screenshot(&NewScreenshot {
                run_id: run.id,
                round_id: None,
                filename: format!("{}/abc.png", run.id),
                original_name: None,
                caption: None,
                event_type: None,
                file_size: None,
                width: None,
                height: None,
                estimated_score: Some(100),
                actual_score: Some(40),
                score_error: None,
            })
            .unwrap();
        assert_eq!(shot.score_error, Some(-0.6));

        let pairs = db.get_score_errors().unwrap();
        assert_eq!(pairs, vec![(run.id, -0.6)]);
    }

    #[test]
    fn test_list_runs_filter_and_pages() {
        let db = Database::in_memory().unwrap();
        for i in 0..5 {
            let run = make_run(&db, &format!("R{}", i));
            if i % 2 == 0 {
                db.patch_run(run.id, &RunPatch { won: Some(true), ..Default::default() }).unwrap();
            }
        }

        let q = RunQuery::parse(
            RunFilter { won: Some(true), ..Default::default() },
            None,
            None,
            Some(1),
            Some(2),
        )
        .unwrap();
        let (items, total) = db.list_runs(&q).unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        assert_eq!(q.page.total_pages(total), 2);
    }

    #[test]
    fn test_patch_run_missing_is_none() {
        let db = Database::in_memory().unwrap();
        let patch = RunPatch { deck: Some("Blue Deck".to_string()), ..Default::default() };
        assert!(db.patch_run(42, &patch).unwrap().is_none());
    }

    #[test]
    fn test_empty_patch_detected_before_storage() {
        assert!(RunPatch::default().is_empty());
        let patch = RunPatch { won: Some(false), ..Default::default() };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patch_applies_closed_fields() {
        let db = Database::in_memory().unwrap();
        let run = make_run(&db, "R1");
        let patch = RunPatch {
            status: Some(RunStatus::Completed),
            won: Some(true),
            rule_decisions: Some(7),
            llm_decisions: Some(3),
            duration_seconds: Some(720),
            llm_cost_usd: Some(0.0421),
            ..Default::default()
        };
        let updated = db.patch_run(run.id, &patch).unwrap().unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert!(updated.won);
        assert_eq!(updated.rule_decisions, 7);
        assert_eq!(updated.llm_decisions, 3);
        assert_eq!(updated.duration_seconds, Some(720));
        assert_eq!(updated.llm_cost_usd, Some(0.0421));
    }

    #[test]
    fn test_strategy_hash_defaults_to_source_digest() {
        let db = Database::in_memory().unwrap();
        let s = db
            .insert_strategy(&NewStrategy {
                name: Some("v1".to_string()),
                source_code: Some("always play flushes".to_string()),
                ..Default::default()
            })
            .unwrap();
        let expected = hex::encode(Sha256::digest(b"always play flushes"));
        assert_eq!(s.code_hash, Some(expected));

        // A caller-supplied hash wins
        let s2 = db
            .insert_strategy(&NewStrategy {
                name: Some("v2".to_string()),
                code_hash: Some("cafebabe".to_string()),
                source_code: Some("always play flushes".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(s2.code_hash.as_deref(), Some("cafebabe"));
    }

    #[test]
    fn test_run_code_unique() {
        let db = Database::in_memory().unwrap();
        make_run(&db, "R1");
        let new = NewRun {
            run_code: Some("R1".to_string()),
            seed: None,
            deck: "Red Deck".to_string(),
            stake: "White".to_string(),
            final_ante: 1,
            final_score: None,
            won: false,
            endless_ante: None,
            notes: None,
            status: None,
            strategy_id: None,
            llm_model: None,
            played_at: None,
        };
        assert!(db.create_run(&new, "R1", 0).is_err());
    }
}
