use rusqlite::{Connection, params};

/// One row per outer training iteration.
pub struct IterationRecord {
    pub iteration: u64,
    pub timesteps_learned: u64,
    pub episodes: u64,
    pub avg_episode_reward: f32,
    pub critic_loss: f32,
    pub learning_rate: f32,
}

/// SQLite-backed training history, so runs can be compared after the fact
/// without parsing the text log.
pub struct TrainingDb {
    conn: Connection,
}

impl TrainingDb {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS iterations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                iteration INTEGER NOT NULL,
                timesteps INTEGER NOT NULL,
                episodes INTEGER NOT NULL,
                avg_reward REAL NOT NULL,
                critic_loss REAL NOT NULL,
                learning_rate REAL NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn insert_iteration(&self, rec: &IterationRecord) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO iterations (iteration, timesteps, episodes, avg_reward, critic_loss, learning_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rec.iteration as i64,
                rec.timesteps_learned as i64,
                rec.episodes as i64,
                rec.avg_episode_reward as f64,
                rec.critic_loss as f64,
                rec.learning_rate as f64,
            ],
        )?;
        Ok(())
    }

    /// Best average episode reward recorded so far, if any.
    pub fn best_avg_reward(&self) -> rusqlite::Result<Option<f32>> {
        let best: Option<f64> =
            self.conn
                .query_row("SELECT MAX(avg_reward) FROM iterations", [], |row| row.get(0))?;
        Ok(best.map(|v| v as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_query_round_trip() {
        let path = std::env::temp_dir().join("rlnet_history_test.db");
        let _ = std::fs::remove_file(&path);

        let db = TrainingDb::open(path.to_str().unwrap()).unwrap();
        assert_eq!(db.best_avg_reward().unwrap(), None);

        db.insert_iteration(&IterationRecord {
            iteration: 1,
            timesteps_learned: 4800,
            episodes: 12,
            avg_episode_reward: 21.5,
            critic_loss: 3.25,
            learning_rate: 0.005,
        })
        .unwrap();
        db.insert_iteration(&IterationRecord {
            iteration: 2,
            timesteps_learned: 9600,
            episodes: 10,
            avg_episode_reward: 34.0,
            critic_loss: 2.5,
            learning_rate: 0.0049,
        })
        .unwrap();

        let best = db.best_avg_reward().unwrap().unwrap();
        assert!((best - 34.0).abs() < 1e-6);

        drop(db);
        let _ = std::fs::remove_file(&path);
    }
}
