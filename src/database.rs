use crate::quest::{unix_now, AssignmentStatus, NewQuest, Player, Quest, QuestError, Stats};
use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

type Result<T> = std::result::Result<T, QuestError>;

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS players (
    user_id   INTEGER PRIMARY KEY,
    username  TEXT NOT NULL,
    points    INTEGER NOT NULL DEFAULT 0,
    joined_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS quests (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    reward      INTEGER NOT NULL CHECK (reward > 0),
    created_by  INTEGER NOT NULL,
    created_at  INTEGER NOT NULL,
    archived    INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS assignments (
    user_id     INTEGER NOT NULL REFERENCES players (user_id),
    quest_id    INTEGER NOT NULL REFERENCES quests (id),
    status      TEXT NOT NULL,
    accepted_at INTEGER NOT NULL,
    finished_at INTEGER,
    PRIMARY KEY (user_id, quest_id)
);
CREATE INDEX IF NOT EXISTS idx_assignments_status ON assignments (status);
CREATE INDEX IF NOT EXISTS idx_players_points ON players (points DESC, joined_at ASC);
"#;

const QUEST_COLUMNS: &str = "id, title, description, reward, created_by, archived";

/// The process-wide SQLite connection. Every statement runs under one
/// re-entrant lock, so methods are free to call each other while holding it.
pub struct Database {
    conn: ReentrantMutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening database {} ...", path.display());
        Self::setup(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        trace!("Database schema is in place");
        Ok(Database {
            conn: ReentrantMutex::new(conn),
        })
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Inserts the player or refreshes their username. Returns `true` for a
    /// newcomer.
    pub fn register_player(&self, user_id: i64, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let existed = self.player(user_id)?.is_some();
        conn.execute(
            "INSERT INTO players (user_id, username, joined_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET username = excluded.username",
            params![user_id, username, unix_now()],
        )?;
        if !existed {
            info!("Registered player {} (@{})", user_id, username);
        }
        Ok(!existed)
    }

    pub fn player(&self, user_id: i64) -> Result<Option<Player>> {
        let conn = self.conn.lock();
        let player = conn
            .query_row(
                "SELECT user_id, username, points, joined_at FROM players WHERE user_id = ?1",
                [user_id],
                player_from_row,
            )
            .optional()?;
        Ok(player)
    }

    pub fn completed_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM assignments WHERE user_id = ?1 AND status = ?2",
            params![user_id, AssignmentStatus::Completed.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn add_quest(&self, quest: &NewQuest, author: i64) -> Result<Quest> {
        quest.validate()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO quests (title, description, reward, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![quest.title, quest.description, quest.reward, author, unix_now()],
        )?;
        let id = conn.last_insert_rowid();
        info!("Quest #{} \"{}\" created by {}", id, quest.title, author);
        self.quest(id)?.ok_or(QuestError::UnknownQuest(id))
    }

    /// Returns `false` when there was no live quest with this id.
    pub fn archive_quest(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE quests SET archived = 1 WHERE id = ?1 AND archived = 0",
            [id],
        )?;
        if changed > 0 {
            info!("Quest #{} archived", id);
        }
        Ok(changed > 0)
    }

    pub fn quest(&self, id: i64) -> Result<Option<Quest>> {
        let conn = self.conn.lock();
        let quest = conn
            .query_row(
                &format!("SELECT {} FROM quests WHERE id = ?1", QUEST_COLUMNS),
                [id],
                quest_from_row,
            )
            .optional()?;
        Ok(quest)
    }

    /// Live quests the player has neither in progress nor completed.
    pub fn available_quests(&self, user_id: i64) -> Result<Vec<Quest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quests q
             WHERE q.archived = 0 AND NOT EXISTS (
                 SELECT 1 FROM assignments a
                 WHERE a.quest_id = q.id AND a.user_id = ?1 AND a.status != ?2
             )
             ORDER BY q.id",
            QUEST_COLUMNS
        ))?;
        let quests = stmt
            .query_map(
                params![user_id, AssignmentStatus::Abandoned.as_str()],
                quest_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(quests)
    }

    pub fn active_quests(&self, user_id: i64) -> Result<Vec<Quest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT q.id, q.title, q.description, q.reward, q.created_by, q.archived
             FROM quests q JOIN assignments a ON a.quest_id = q.id
             WHERE a.user_id = ?1 AND a.status = ?2
             ORDER BY a.accepted_at, q.id",
        )?;
        let quests = stmt
            .query_map(
                params![user_id, AssignmentStatus::Active.as_str()],
                quest_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(quests)
    }

    fn status(&self, user_id: i64, quest_id: i64) -> Result<Option<AssignmentStatus>> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM assignments WHERE user_id = ?1 AND quest_id = ?2",
                [user_id, quest_id],
                |row| row.get(0),
            )
            .optional()?;
        status.map(|s| s.parse()).transpose()
    }

    pub fn accept_quest(&self, user_id: i64, quest_id: i64) -> Result<Quest> {
        let conn = self.conn.lock();
        if self.player(user_id)?.is_none() {
            return Err(QuestError::NotRegistered);
        }
        let quest = self
            .quest(quest_id)?
            .ok_or(QuestError::UnknownQuest(quest_id))?;
        if quest.archived {
            return Err(QuestError::QuestArchived(quest_id));
        }
        match self.status(user_id, quest_id)? {
            Some(AssignmentStatus::Active) => return Err(QuestError::AlreadyActive(quest_id)),
            Some(AssignmentStatus::Completed) => {
                return Err(QuestError::AlreadyCompleted(quest_id))
            }
            Some(AssignmentStatus::Abandoned) | None => {}
        }
        conn.execute(
            "INSERT INTO assignments (user_id, quest_id, status, accepted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, quest_id) DO UPDATE
             SET status = excluded.status, accepted_at = excluded.accepted_at, finished_at = NULL",
            params![
                user_id,
                quest_id,
                AssignmentStatus::Active.as_str(),
                unix_now()
            ],
        )?;
        debug!("Player {} accepted quest #{}", user_id, quest_id);
        Ok(quest)
    }

    /// Marks the quest completed and credits its reward. Returns the player's
    /// new point total.
    pub fn complete_quest(&self, user_id: i64, quest_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let quest = self
            .quest(quest_id)?
            .ok_or(QuestError::UnknownQuest(quest_id))?;
        self.ensure_active(user_id, quest_id)?;

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE assignments SET status = ?1, finished_at = ?2
             WHERE user_id = ?3 AND quest_id = ?4",
            params![
                AssignmentStatus::Completed.as_str(),
                unix_now(),
                user_id,
                quest_id
            ],
        )?;
        tx.execute(
            "UPDATE players SET points = points + ?1 WHERE user_id = ?2",
            params![quest.reward, user_id],
        )?;
        let points: i64 = tx.query_row(
            "SELECT points FROM players WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        info!(
            "Player {} completed quest #{} for {} points ({} total)",
            user_id, quest_id, quest.reward, points
        );
        Ok(points)
    }

    pub fn abandon_quest(&self, user_id: i64, quest_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        self.ensure_active(user_id, quest_id)?;
        conn.execute(
            "UPDATE assignments SET status = ?1, finished_at = ?2
             WHERE user_id = ?3 AND quest_id = ?4",
            params![
                AssignmentStatus::Abandoned.as_str(),
                unix_now(),
                user_id,
                quest_id
            ],
        )?;
        debug!("Player {} abandoned quest #{}", user_id, quest_id);
        Ok(())
    }

    fn ensure_active(&self, user_id: i64, quest_id: i64) -> Result<()> {
        match self.status(user_id, quest_id)? {
            Some(AssignmentStatus::Active) => Ok(()),
            _ => Err(QuestError::NotActive(quest_id)),
        }
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<Player>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, username, points, joined_at FROM players
             ORDER BY points DESC, joined_at ASC, user_id ASC
             LIMIT ?1",
        )?;
        let players = stmt
            .query_map([limit as i64], player_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(players)
    }

    pub fn stats(&self) -> Result<Stats> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM players),
                (SELECT COUNT(*) FROM quests WHERE archived = 0),
                (SELECT COUNT(*) FROM assignments WHERE status = ?1)",
            [AssignmentStatus::Completed.as_str()],
            |row| {
                Ok(Stats {
                    players: row.get(0)?,
                    quests: row.get(1)?,
                    completed: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        user_id: row.get(0)?,
        username: row.get(1)?,
        points: row.get(2)?,
        joined_at: row.get(3)?,
    })
}

fn quest_from_row(row: &Row<'_>) -> rusqlite::Result<Quest> {
    Ok(Quest {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        reward: row.get(3)?,
        created_by: row.get(4)?,
        archived: row.get(5)?,
    })
}
