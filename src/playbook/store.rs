//! Playbook Store: in-memory bounded lesson collection with authority and
//! stability rules, plus an optional SQLite mirror.

use crate::error::Result;
use crate::playbook::lesson::{LessonCategory, LessonRecord, PlaybookConfig};
use chrono::Utc;
use std::sync::Mutex;

/// Result of attempting to store a lesson with authority rules applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The incoming lesson was accepted as the new incumbent.
    Replaced,
    /// The incumbent was retained; the incoming lesson's observation was
    /// folded into it instead (stability window, §8 scenario 3).
    IncumbentRetained,
    /// No incumbent existed; the incoming lesson was inserted fresh.
    Inserted,
}

/// In-memory ordered collection of Lesson Records, bounded to
/// `config.max_lessons`, with the authority/stability rules from §4.F.
pub struct PlaybookStore {
    config: PlaybookConfig,
    lessons: Mutex<Vec<LessonRecord>>,
}

impl PlaybookStore {
    pub fn new(config: PlaybookConfig) -> Self {
        Self {
            config,
            lessons: Mutex::new(Vec::new()),
        }
    }

    /// Top-K lessons by score, optionally filtered by category. Expired or
    /// low-score lessons are lazily pruned on read.
    pub fn get_top(&self, category: Option<LessonCategory>, k: usize) -> Vec<LessonRecord> {
        let mut lessons = self.lessons.lock().unwrap();
        lessons.retain(|l| l.score(&self.config) > 0.01);

        let mut candidates: Vec<&LessonRecord> = lessons
            .iter()
            .filter(|l| category.map(|c| c == l.category).unwrap_or(true))
            .collect();
        candidates.sort_by(|a, b| b.score(&self.config).partial_cmp(&a.score(&self.config)).unwrap());
        candidates.into_iter().take(k).cloned().collect()
    }

    /// Apply the authority/stability rules and insert or merge the incoming
    /// lesson against any incumbent with the same `(category, appliesWhen)`.
    pub fn store_with_authority(&self, incoming: LessonRecord) -> StoreOutcome {
        let mut lessons = self.lessons.lock().unwrap();

        let incumbent_idx = lessons.iter().position(|l| l.same_key(&incoming));

        let Some(idx) = incumbent_idx else {
            lessons.push(incoming);
            self.enforce_capacity(&mut lessons);
            return StoreOutcome::Inserted;
        };

        let outcome = {
            let incumbent = &lessons[idx];

            // Rule 4: model version changed invalidates the incumbent outright.
            if incumbent.model_version != incoming.model_version {
                StoreOutcome::Replaced
            } else {
                let age_of_incoming_vs_incumbent = incumbent.origin_timestamp - incoming.origin_timestamp;
                // Rule 1: reject incoming if it's staler than the incumbent
                // by more than the stability window.
                if age_of_incoming_vs_incumbent > self.config.stability_window {
                    StoreOutcome::IncumbentRetained
                } else {
                    let within_window = (Utc::now() - incumbent.origin_timestamp) < self.config.stability_window;
                    let weight_delta = incoming.source_weight - incumbent.source_weight;
                    let exceeds = if self.config.stability_threshold_inclusive {
                        weight_delta >= 0.5
                    } else {
                        weight_delta > 0.5
                    };

                    if within_window && !exceeds {
                        // Rule 2: incumbent wins within the window unless
                        // source weight clearly exceeds it.
                        StoreOutcome::IncumbentRetained
                    } else {
                        // Rule 3: outside the window, or weight clearly
                        // exceeds, higher score wins.
                        if incoming.score(&self.config) >= incumbent.score(&self.config) {
                            StoreOutcome::Replaced
                        } else {
                            StoreOutcome::IncumbentRetained
                        }
                    }
                }
            }
        };

        match outcome {
            StoreOutcome::Replaced => {
                lessons[idx] = incoming;
            }
            StoreOutcome::IncumbentRetained => {
                lessons[idx].observation_count += 1;
                lessons[idx].updated_at = Utc::now();
            }
            StoreOutcome::Inserted => unreachable!(),
        }

        self.enforce_capacity(&mut lessons);
        outcome
    }

    fn enforce_capacity(&self, lessons: &mut Vec<LessonRecord>) {
        while lessons.len() > self.config.max_lessons {
            let worst_idx = lessons
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.score(&self.config).partial_cmp(&b.score(&self.config)).unwrap())
                .map(|(i, _)| i);
            if let Some(i) = worst_idx {
                lessons.remove(i);
            } else {
                break;
            }
        }
    }

    /// Record an outcome against an existing lesson, identified by id.
    pub fn record_outcome(&self, lesson_id: uuid::Uuid, success: bool) {
        let mut lessons = self.lessons.lock().unwrap();
        if let Some(lesson) = lessons.iter_mut().find(|l| l.id == lesson_id) {
            lesson.record_outcome(success, &self.config);
        }
    }

    /// Inject the top-K routing-category lessons into a decorated context,
    /// returning the decorated text and the count of lessons applied.
    pub fn enhance_routing(&self, base_context: &str, k: usize) -> (String, usize) {
        let lessons = self.get_top(Some(LessonCategory::Routing), k);
        if lessons.is_empty() {
            return (base_context.to_string(), 0);
        }
        let mut decorated = String::from(base_context);
        decorated.push_str("\n\n# Applicable lessons\n");
        for lesson in &lessons {
            decorated.push_str(&format!("- {}\n", lesson.text));
        }
        (decorated, lessons.len())
    }

    pub fn len(&self) -> usize {
        self.lessons.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Optional SQLite-backed mirror for lesson persistence across restarts.
/// The Playbook Store runs without this; it is loaded on startup and
/// flushed on shutdown per the persisted-state contract.
pub struct SqlitePlaybookMirror {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqlitePlaybookMirror {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS lessons (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                category TEXT NOT NULL,
                applies_when TEXT NOT NULL,
                source_weight REAL NOT NULL,
                origin_timestamp TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                observation_count INTEGER NOT NULL,
                success_count INTEGER NOT NULL,
                failure_count INTEGER NOT NULL,
                confidence REAL NOT NULL,
                model_version TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Flush a lesson to the mirror (insert-or-replace by id).
    pub fn flush(&self, lesson: &LessonRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO lessons (
                id, text, category, applies_when, source_weight, origin_timestamp,
                updated_at, observation_count, success_count, failure_count,
                confidence, model_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                lesson.id.to_string(),
                lesson.text,
                format!("{:?}", lesson.category),
                lesson.applies_when,
                lesson.source_weight,
                lesson.origin_timestamp.to_rfc3339(),
                lesson.updated_at.to_rfc3339(),
                lesson.observation_count,
                lesson.success_count,
                lesson.failure_count,
                lesson.confidence,
                lesson.model_version,
            ],
        )?;
        Ok(())
    }

    /// Count of mirrored lessons (used by tests and startup diagnostics).
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM lessons", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
