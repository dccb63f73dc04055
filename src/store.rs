// =============================================================================
// Store — rusqlite-backed transactional row store
// =============================================================================
//
// A single `Connection` guarded by a `tokio::sync::Mutex`, WAL journal mode,
// and explicit schema/index creation, grounded in the vault pattern this
// corpus uses elsewhere for embedded persistence. Multi-statement writes
// (settlement, judgment submit) run inside one `Transaction` so partial
// writes are never observable.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::types::{AgentStatus, RoundStatus};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub persona: String,
    pub prompt: String,
    pub score: i64,
    pub status: String,
    pub secret: String,
    pub claim_token: String,
    pub verification_code: String,
    pub claimed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub round_id: String,
    pub symbol: String,
    pub duration_min: i64,
    pub start_price: f64,
    pub end_price: Option<f64>,
    pub status: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub id: i64,
    pub round_id: String,
    pub agent_id: String,
    pub direction: String,
    pub confidence: i64,
    pub comment: String,
    pub timestamp: i64,
    pub intervals: String,
    pub analysis_start_time: i64,
    pub analysis_end_time: i64,
    pub reason_timeframe: String,
    pub reason_pattern: String,
    pub reason_direction: String,
    pub reason_horizon_bars: i64,
    pub reason_t_close_ms: i64,
    pub reason_target_close_ms: i64,
    pub reason_base_close: f64,
    pub reason_pattern_holds: Option<i64>,
    pub reason_target_close: Option<f64>,
    pub reason_delta_pct: Option<f64>,
    pub reason_outcome: Option<String>,
    pub reason_correct: Option<i64>,
    pub reason_evaluated_at: Option<i64>,
    pub reason_eval_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub round_id: String,
    pub result: String,
    pub delta_pct: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub id: i64,
    pub agent_id: String,
    pub round_id: String,
    pub correct: bool,
    pub confidence: i64,
    pub score_change: i64,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipCard {
    pub id: i64,
    pub round_id: String,
    pub agent_id: String,
    pub result: String,
    pub title: String,
    pub text: String,
    pub agent_name: String,
    pub confidence: i64,
    pub score_change: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaState {
    pub last_price: Option<f64>,
    pub current_price: Option<f64>,
    pub last_delta_pct: Option<f64>,
    pub last_price_at: Option<i64>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open store at {}", path.as_ref().display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        info!(path = %path.as_ref().display(), "store opened");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                persona TEXT NOT NULL DEFAULT '',
                prompt TEXT NOT NULL DEFAULT '',
                score INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                secret TEXT NOT NULL UNIQUE,
                claim_token TEXT NOT NULL,
                verification_code TEXT NOT NULL,
                claimed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS rounds (
                round_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                duration_min INTEGER NOT NULL,
                start_price REAL NOT NULL,
                end_price REAL,
                status TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rounds_status ON rounds(status);

            CREATE TABLE IF NOT EXISTS judgments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                comment TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                intervals TEXT NOT NULL,
                analysis_start_time INTEGER NOT NULL,
                analysis_end_time INTEGER NOT NULL,
                reason_timeframe TEXT NOT NULL,
                reason_pattern TEXT NOT NULL,
                reason_direction TEXT NOT NULL,
                reason_horizon_bars INTEGER NOT NULL,
                reason_t_close_ms INTEGER NOT NULL,
                reason_target_close_ms INTEGER NOT NULL,
                reason_base_close REAL NOT NULL,
                reason_pattern_holds INTEGER,
                reason_target_close REAL,
                reason_delta_pct REAL,
                reason_outcome TEXT,
                reason_correct INTEGER,
                reason_evaluated_at INTEGER,
                reason_eval_error TEXT,
                UNIQUE(round_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_judgments_round ON judgments(round_id);
            CREATE INDEX IF NOT EXISTS idx_judgments_agent ON judgments(agent_id);
            CREATE INDEX IF NOT EXISTS idx_judgments_target_close ON judgments(reason_target_close_ms);
            CREATE INDEX IF NOT EXISTS idx_judgments_correct ON judgments(reason_correct);

            CREATE TABLE IF NOT EXISTS verdicts (
                round_id TEXT PRIMARY KEY,
                result TEXT NOT NULL,
                delta_pct REAL NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_verdicts_round ON verdicts(round_id);

            CREATE TABLE IF NOT EXISTS score_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                round_id TEXT NOT NULL,
                correct INTEGER NOT NULL,
                confidence INTEGER NOT NULL,
                score_change INTEGER NOT NULL,
                reason TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_score_events_agent_round ON score_events(agent_id, round_id);

            CREATE TABLE IF NOT EXISTS flip_cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                result TEXT NOT NULL,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                score_change INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flip_cards_round_ts ON flip_cards(round_id, timestamp);

            CREATE TABLE IF NOT EXISTS meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                last_price REAL,
                current_price REAL,
                last_delta_pct REAL,
                last_price_at INTEGER
            );
            INSERT OR IGNORE INTO meta (id, last_price, current_price, last_delta_pct, last_price_at)
                VALUES (0, NULL, NULL, NULL, NULL);
            "#,
        )?;
        Ok(())
    }

    // ---- agents -------------------------------------------------------

    pub async fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agents (id, name, persona, prompt, score, status, secret, claim_token, verification_code, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                agent.id, agent.name, agent.persona, agent.prompt, agent.score,
                agent.status, agent.secret, agent.claim_token, agent.verification_code, agent.claimed_at
            ],
        )?;
        Ok(())
    }

    pub async fn get_agent_by_id(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, persona, prompt, score, status, secret, claim_token, verification_code, claimed_at
             FROM agents WHERE id = ?1",
        )?;
        stmt.query_row(params![id], Self::row_to_agent).optional().map_err(Into::into)
    }

    pub async fn get_agent_by_secret(&self, secret: &str) -> Result<Option<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, persona, prompt, score, status, secret, claim_token, verification_code, claimed_at
             FROM agents WHERE secret = ?1",
        )?;
        stmt.query_row(params![secret], Self::row_to_agent).optional().map_err(Into::into)
    }

    pub async fn get_agent_by_claim_token(&self, token: &str) -> Result<Option<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, persona, prompt, score, status, secret, claim_token, verification_code, claimed_at
             FROM agents WHERE claim_token = ?1",
        )?;
        stmt.query_row(params![token], Self::row_to_agent).optional().map_err(Into::into)
    }

    pub async fn mark_agent_claimed(&self, id: &str, claimed_at: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE agents SET status = ?1, claimed_at = ?2 WHERE id = ?3",
            params![AgentStatus::Active.to_string(), claimed_at, id],
        )?;
        Ok(())
    }

    pub async fn adjust_agent_score(&self, id: &str, delta: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE agents SET score = score + ?1 WHERE id = ?2", params![delta, id])?;
        Ok(())
    }

    pub async fn list_active_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, persona, prompt, score, status, secret, claim_token, verification_code, claimed_at
             FROM agents WHERE status = ?1",
        )?;
        let rows = stmt.query_map(params![AgentStatus::Active.to_string()], Self::row_to_agent)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn list_agents_by_score_desc(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, persona, prompt, score, status, secret, claim_token, verification_code, claimed_at
             FROM agents ORDER BY score DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_agent)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
        Ok(Agent {
            id: row.get(0)?,
            name: row.get(1)?,
            persona: row.get(2)?,
            prompt: row.get(3)?,
            score: row.get(4)?,
            status: row.get(5)?,
            secret: row.get(6)?,
            claim_token: row.get(7)?,
            verification_code: row.get(8)?,
            claimed_at: row.get(9)?,
        })
    }

    // ---- rounds ---------------------------------------------------------

    pub async fn insert_round(&self, round: &Round, round_limit: usize) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO rounds (round_id, symbol, duration_min, start_price, end_price, status, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                round.round_id, round.symbol, round.duration_min, round.start_price,
                round.end_price, round.status, round.start_time, round.end_time
            ],
        )?;
        Self::trim_rounds_tx(&tx, round_limit)?;
        tx.commit()?;
        Ok(())
    }

    pub async fn get_live_round(&self) -> Result<Option<Round>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT round_id, symbol, duration_min, start_price, end_price, status, start_time, end_time
             FROM rounds WHERE status != ?1 ORDER BY start_time DESC LIMIT 1",
        )?;
        stmt.query_row(params![RoundStatus::Settled.to_string()], Self::row_to_round)
            .optional()
            .map_err(Into::into)
    }

    pub async fn get_round(&self, round_id: &str) -> Result<Option<Round>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT round_id, symbol, duration_min, start_price, end_price, status, start_time, end_time
             FROM rounds WHERE round_id = ?1",
        )?;
        stmt.query_row(params![round_id], Self::row_to_round).optional().map_err(Into::into)
    }

    pub async fn list_recent_rounds(&self, limit: usize) -> Result<Vec<Round>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT round_id, symbol, duration_min, start_price, end_price, status, start_time, end_time
             FROM rounds ORDER BY start_time DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_round)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn lock_round(&self, round_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE rounds SET status = ?1 WHERE round_id = ?2",
            params![RoundStatus::Locked.to_string(), round_id],
        )?;
        Ok(())
    }

    /// Cancels a round with zero judgments: deletes the round row outright
    /// (judgments are already empty by construction).
    pub async fn cancel_round(&self, round_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM judgments WHERE round_id = ?1", params![round_id])?;
        tx.execute("DELETE FROM rounds WHERE round_id = ?1", params![round_id])?;
        tx.commit()?;
        Ok(())
    }

    fn trim_rounds_tx(tx: &rusqlite::Transaction<'_>, limit: usize) -> Result<()> {
        tx.execute(
            "DELETE FROM rounds WHERE round_id NOT IN (
                SELECT round_id FROM rounds ORDER BY start_time DESC LIMIT ?1
             )",
            params![limit as i64],
        )?;
        Ok(())
    }

    fn row_to_round(row: &rusqlite::Row<'_>) -> rusqlite::Result<Round> {
        Ok(Round {
            round_id: row.get(0)?,
            symbol: row.get(1)?,
            duration_min: row.get(2)?,
            start_price: row.get(3)?,
            end_price: row.get(4)?,
            status: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
        })
    }

    // ---- judgments --------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn replace_judgment(&self, j: &Judgment, judgment_limit: usize) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM judgments WHERE round_id = ?1 AND agent_id = ?2",
            params![j.round_id, j.agent_id],
        )?;
        tx.execute(
            "INSERT INTO judgments (
                round_id, agent_id, direction, confidence, comment, timestamp, intervals,
                analysis_start_time, analysis_end_time, reason_timeframe, reason_pattern,
                reason_direction, reason_horizon_bars, reason_t_close_ms, reason_target_close_ms,
                reason_base_close, reason_pattern_holds, reason_target_close, reason_delta_pct,
                reason_outcome, reason_correct, reason_evaluated_at, reason_eval_error
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
            params![
                j.round_id, j.agent_id, j.direction, j.confidence, j.comment, j.timestamp, j.intervals,
                j.analysis_start_time, j.analysis_end_time, j.reason_timeframe, j.reason_pattern,
                j.reason_direction, j.reason_horizon_bars, j.reason_t_close_ms, j.reason_target_close_ms,
                j.reason_base_close, j.reason_pattern_holds, j.reason_target_close, j.reason_delta_pct,
                j.reason_outcome, j.reason_correct, j.reason_evaluated_at, j.reason_eval_error
            ],
        )?;
        tx.execute(
            "DELETE FROM judgments WHERE id NOT IN (
                SELECT id FROM judgments ORDER BY timestamp DESC LIMIT ?1
             )",
            params![judgment_limit as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub async fn get_judgment(&self, round_id: &str, agent_id: &str) -> Result<Option<Judgment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE round_id = ?1 AND agent_id = ?2", Self::JUDGMENT_SELECT))?;
        stmt.query_row(params![round_id, agent_id], Self::row_to_judgment).optional().map_err(Into::into)
    }

    pub async fn list_judgments_for_round(&self, round_id: &str) -> Result<Vec<Judgment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE round_id = ?1", Self::JUDGMENT_SELECT))?;
        let rows = stmt.query_map(params![round_id], Self::row_to_judgment)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn count_judgments_for_round(&self, round_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM judgments WHERE round_id = ?1",
            params![round_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Rows whose horizon has reached and haven't been evaluated yet.
    pub async fn list_pending_reason_sweep(&self, now_ms: i64, max_rows: usize) -> Result<Vec<Judgment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE reason_target_close_ms <= ?1 AND reason_correct IS NULL
             ORDER BY reason_target_close_ms ASC LIMIT ?2",
            Self::JUDGMENT_SELECT
        ))?;
        let rows = stmt.query_map(params![now_ms, max_rows as i64], Self::row_to_judgment)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn update_reason_evaluation(
        &self,
        judgment_id: i64,
        target_close: Option<f64>,
        delta_pct: Option<f64>,
        outcome: Option<&str>,
        correct: Option<bool>,
        evaluated_at: i64,
        eval_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE judgments SET
                reason_target_close = ?1, reason_delta_pct = ?2, reason_outcome = ?3,
                reason_correct = ?4, reason_evaluated_at = ?5, reason_eval_error = ?6
             WHERE id = ?7",
            params![
                target_close,
                delta_pct,
                outcome,
                correct.map(|b| b as i64),
                evaluated_at,
                eval_error,
                judgment_id
            ],
        )?;
        Ok(())
    }

    const JUDGMENT_SELECT: &'static str = "SELECT id, round_id, agent_id, direction, confidence, comment, timestamp,
        intervals, analysis_start_time, analysis_end_time, reason_timeframe, reason_pattern,
        reason_direction, reason_horizon_bars, reason_t_close_ms, reason_target_close_ms,
        reason_base_close, reason_pattern_holds, reason_target_close, reason_delta_pct,
        reason_outcome, reason_correct, reason_evaluated_at, reason_eval_error
        FROM judgments";

    fn row_to_judgment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Judgment> {
        Ok(Judgment {
            id: row.get(0)?,
            round_id: row.get(1)?,
            agent_id: row.get(2)?,
            direction: row.get(3)?,
            confidence: row.get(4)?,
            comment: row.get(5)?,
            timestamp: row.get(6)?,
            intervals: row.get(7)?,
            analysis_start_time: row.get(8)?,
            analysis_end_time: row.get(9)?,
            reason_timeframe: row.get(10)?,
            reason_pattern: row.get(11)?,
            reason_direction: row.get(12)?,
            reason_horizon_bars: row.get(13)?,
            reason_t_close_ms: row.get(14)?,
            reason_target_close_ms: row.get(15)?,
            reason_base_close: row.get(16)?,
            reason_pattern_holds: row.get(17)?,
            reason_target_close: row.get(18)?,
            reason_delta_pct: row.get(19)?,
            reason_outcome: row.get(20)?,
            reason_correct: row.get(21)?,
            reason_evaluated_at: row.get(22)?,
            reason_eval_error: row.get(23)?,
        })
    }

    // ---- settlement: verdict + score_events + flip_cards + agents, atomic -

    #[allow(clippy::too_many_arguments)]
    pub async fn settle_round_atomic(
        &self,
        round_id: &str,
        end_price: f64,
        verdict: &Verdict,
        score_events: &[ScoreEvent],
        flip_cards: &[FlipCard],
        verdict_limit: usize,
        score_event_limit: usize,
        feed_limit: usize,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE rounds SET status = ?1, end_price = ?2 WHERE round_id = ?3",
            params![RoundStatus::Settled.to_string(), end_price, round_id],
        )?;

        tx.execute(
            "INSERT INTO verdicts (round_id, result, delta_pct, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![verdict.round_id, verdict.result, verdict.delta_pct, verdict.timestamp],
        )?;

        for se in score_events {
            tx.execute(
                "INSERT INTO score_events (agent_id, round_id, correct, confidence, score_change, reason, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![se.agent_id, se.round_id, se.correct as i64, se.confidence, se.score_change, se.reason, se.timestamp],
            )?;
            tx.execute(
                "UPDATE agents SET score = score + ?1 WHERE id = ?2",
                params![se.score_change, se.agent_id],
            )?;
        }

        for fc in flip_cards {
            tx.execute(
                "INSERT INTO flip_cards (round_id, agent_id, result, title, text, agent_name, confidence, score_change, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    fc.round_id, fc.agent_id, fc.result, fc.title, fc.text, fc.agent_name,
                    fc.confidence, fc.score_change, fc.timestamp
                ],
            )?;
        }

        tx.execute(
            "DELETE FROM verdicts WHERE round_id NOT IN (
                SELECT round_id FROM verdicts ORDER BY timestamp DESC LIMIT ?1
             )",
            params![verdict_limit as i64],
        )?;
        tx.execute(
            "DELETE FROM score_events WHERE id NOT IN (
                SELECT id FROM score_events ORDER BY timestamp DESC LIMIT ?1
             )",
            params![score_event_limit as i64],
        )?;
        tx.execute(
            "DELETE FROM flip_cards WHERE id NOT IN (
                SELECT id FROM flip_cards ORDER BY timestamp DESC LIMIT ?1
             )",
            params![feed_limit as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub async fn get_last_verdict(&self) -> Result<Option<Verdict>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT round_id, result, delta_pct, timestamp FROM verdicts ORDER BY timestamp DESC LIMIT 1",
        )?;
        stmt.query_row([], |row| {
            Ok(Verdict { round_id: row.get(0)?, result: row.get(1)?, delta_pct: row.get(2)?, timestamp: row.get(3)? })
        })
        .optional()
        .map_err(Into::into)
    }

    pub async fn get_flip_card(&self, round_id: &str, agent_id: &str) -> Result<Option<FlipCard>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE round_id = ?1 AND agent_id = ?2 ORDER BY timestamp DESC LIMIT 1",
            Self::FLIP_CARD_SELECT
        ))?;
        stmt.query_row(params![round_id, agent_id], Self::row_to_flip_card).optional().map_err(Into::into)
    }

    pub async fn list_recent_high_conf_failure_cards(&self, limit: usize) -> Result<Vec<FlipCard>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE result = 'FAIL' AND confidence >= 80 ORDER BY timestamp DESC LIMIT ?1",
            Self::FLIP_CARD_SELECT
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_flip_card)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn list_recent_flip_cards(&self, limit: usize) -> Result<Vec<FlipCard>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} ORDER BY timestamp DESC LIMIT ?1", Self::FLIP_CARD_SELECT))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_flip_card)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    const FLIP_CARD_SELECT: &'static str =
        "SELECT id, round_id, agent_id, result, title, text, agent_name, confidence, score_change, timestamp FROM flip_cards";

    fn row_to_flip_card(row: &rusqlite::Row<'_>) -> rusqlite::Result<FlipCard> {
        Ok(FlipCard {
            id: row.get(0)?,
            round_id: row.get(1)?,
            agent_id: row.get(2)?,
            result: row.get(3)?,
            title: row.get(4)?,
            text: row.get(5)?,
            agent_name: row.get(6)?,
            confidence: row.get(7)?,
            score_change: row.get(8)?,
            timestamp: row.get(9)?,
        })
    }

    pub async fn list_recent_score_events_for_agent(&self, agent_id: &str, limit: usize) -> Result<Vec<ScoreEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, agent_id, round_id, correct, confidence, score_change, reason, timestamp
             FROM score_events WHERE agent_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], |row| {
            Ok(ScoreEvent {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                round_id: row.get(2)?,
                correct: row.get::<_, i64>(3)? != 0,
                confidence: row.get(4)?,
                score_change: row.get(5)?,
                reason: row.get(6)?,
                timestamp: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn count_rounds_for_agent(&self, agent_id: &str, limit: usize) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(DISTINCT round_id) FROM (
                SELECT round_id FROM judgments WHERE agent_id = ?1 ORDER BY timestamp DESC LIMIT ?2
             )",
            params![agent_id, limit as i64],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    // ---- meta -------------------------------------------------------------

    pub async fn get_meta(&self) -> Result<MetaState> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT last_price, current_price, last_delta_pct, last_price_at FROM meta WHERE id = 0",
            [],
            |row| {
                Ok(MetaState {
                    last_price: row.get(0)?,
                    current_price: row.get(1)?,
                    last_delta_pct: row.get(2)?,
                    last_price_at: row.get(3)?,
                })
            },
        )
        .map_err(Into::into)
    }

    pub async fn save_meta(&self, meta: &MetaState) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE meta SET last_price = ?1, current_price = ?2, last_delta_pct = ?3, last_price_at = ?4 WHERE id = 0",
            params![meta.last_price, meta.current_price, meta.last_delta_pct, meta.last_price_at],
        )?;
        Ok(())
    }

    // ---- reason stats (plain SQL aggregation) ------------------------------

    pub async fn reason_stats(
        &self,
        since_ms: i64,
        until_ms: i64,
        limit: usize,
        agent_id: Option<&str>,
    ) -> Result<ReasonStatsRow> {
        let conn = self.conn.lock().await;
        let base_where = "reason_evaluated_at IS NOT NULL AND timestamp BETWEEN ?1 AND ?2";
        let (where_clause, agent_param): (String, Option<String>) = match agent_id {
            Some(a) => (format!("{base_where} AND agent_id = ?3"), Some(a.to_string())),
            None => (base_where.to_string(), None),
        };

        let sql = format!(
            "SELECT COUNT(*), SUM(CASE WHEN reason_pattern_holds = 1 THEN 1 ELSE 0 END),
                    AVG(reason_correct), AVG(CASE WHEN reason_pattern_holds = 1 THEN reason_correct END),
                    AVG(reason_delta_pct), AVG(ABS(reason_delta_pct))
             FROM (SELECT * FROM judgments WHERE {where_clause} ORDER BY timestamp DESC LIMIT {limit})"
        );

        let row = if let Some(a) = &agent_param {
            conn.query_row(&sql, params![since_ms, until_ms, a], Self::row_to_stats)?
        } else {
            conn.query_row(&sql, params![since_ms, until_ms], Self::row_to_stats)?
        };
        Ok(row)
    }

    fn row_to_stats(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReasonStatsRow> {
        Ok(ReasonStatsRow {
            total_evaluated: row.get(0)?,
            total_valid: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
            accuracy_all: row.get(2)?,
            accuracy_valid: row.get(3)?,
            avg_delta_pct: row.get(4)?,
            avg_abs_delta_pct: row.get(5)?,
        })
    }

    /// Grouped breakdown by either `reason_timeframe` or `reason_pattern`.
    /// `group_column` must be one of those two literal names — never
    /// interpolated from user input.
    pub async fn reason_stats_breakdown(
        &self,
        group_column: &str,
        since_ms: i64,
        until_ms: i64,
        limit: usize,
        agent_id: Option<&str>,
    ) -> Result<Vec<ReasonStatsGroup>> {
        debug_assert!(group_column == "reason_timeframe" || group_column == "reason_pattern");
        let conn = self.conn.lock().await;
        let base_where = "reason_evaluated_at IS NOT NULL AND timestamp BETWEEN ?1 AND ?2";
        let (where_clause, agent_param): (String, Option<String>) = match agent_id {
            Some(a) => (format!("{base_where} AND agent_id = ?3"), Some(a.to_string())),
            None => (base_where.to_string(), None),
        };

        let sql = format!(
            "SELECT {group_column} AS grp, COUNT(*),
                    SUM(CASE WHEN reason_pattern_holds = 1 THEN 1 ELSE 0 END),
                    AVG(reason_correct), AVG(CASE WHEN reason_pattern_holds = 1 THEN reason_correct END),
                    AVG(reason_delta_pct), AVG(ABS(reason_delta_pct))
             FROM (SELECT * FROM judgments WHERE {where_clause} ORDER BY timestamp DESC LIMIT {limit})
             GROUP BY grp"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(a) = &agent_param {
            stmt.query_map(params![since_ms, until_ms, a], Self::row_to_stats_group)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![since_ms, until_ms], Self::row_to_stats_group)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    fn row_to_stats_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReasonStatsGroup> {
        Ok(ReasonStatsGroup {
            key: row.get(0)?,
            stats: ReasonStatsRow {
                total_evaluated: row.get(1)?,
                total_valid: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                accuracy_all: row.get(3)?,
                accuracy_valid: row.get(4)?,
                avg_delta_pct: row.get(5)?,
                avg_abs_delta_pct: row.get(6)?,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonStatsGroup {
    pub key: String,
    #[serde(flatten)]
    pub stats: ReasonStatsRow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonStatsRow {
    pub total_evaluated: i64,
    pub total_valid: i64,
    pub accuracy_all: Option<f64>,
    pub accuracy_valid: Option<f64>,
    pub avg_delta_pct: Option<f64>,
    pub avg_abs_delta_pct: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(id: &str, secret: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            persona: String::new(),
            prompt: String::new(),
            score: 0,
            status: AgentStatus::Active.to_string(),
            secret: secret.to_string(),
            claim_token: "tok".to_string(),
            verification_code: "123456".to_string(),
            claimed_at: Some(1),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_agent() {
        let store = Store::open_in_memory().unwrap();
        store.insert_agent(&sample_agent("a1", "secret1")).await.unwrap();
        let fetched = store.get_agent_by_id("a1").await.unwrap().unwrap();
        assert_eq!(fetched.secret, "secret1");
        let by_secret = store.get_agent_by_secret("secret1").await.unwrap().unwrap();
        assert_eq!(by_secret.id, "a1");
    }

    #[tokio::test]
    async fn round_insert_and_live_lookup() {
        let store = Store::open_in_memory().unwrap();
        let round = Round {
            round_id: "r_20260101_0000".into(),
            symbol: "BTCUSDT".into(),
            duration_min: 30,
            start_price: 100.0,
            end_price: None,
            status: RoundStatus::Betting.to_string(),
            start_time: 0,
            end_time: 1_800_000,
        };
        store.insert_round(&round, 200).await.unwrap();
        let live = store.get_live_round().await.unwrap().unwrap();
        assert_eq!(live.round_id, "r_20260101_0000");
    }

    #[tokio::test]
    async fn cancel_round_removes_row() {
        let store = Store::open_in_memory().unwrap();
        let round = Round {
            round_id: "r_x".into(),
            symbol: "BTCUSDT".into(),
            duration_min: 30,
            start_price: 1.0,
            end_price: None,
            status: RoundStatus::Betting.to_string(),
            start_time: 0,
            end_time: 1,
        };
        store.insert_round(&round, 200).await.unwrap();
        store.cancel_round("r_x").await.unwrap();
        assert!(store.get_round("r_x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn meta_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let meta = MetaState { last_price: Some(1.0), current_price: Some(2.0), last_delta_pct: Some(0.5), last_price_at: Some(123) };
        store.save_meta(&meta).await.unwrap();
        let fetched = store.get_meta().await.unwrap();
        assert_eq!(fetched.current_price, Some(2.0));
    }
}
