//! The collection: single entry point owning the database handle and every
//! registry, plus the scheduler, media handle and undo log.
//!
//! Operations are split by area across `notes`, `cards`, `decks` and
//! `notetypes`; card generation, integrity repair and undo add their own
//! `impl Collection` blocks in their modules.

mod cards;
mod decks;
mod errors;
mod notes;
mod notetypes;

pub use errors::{CollectionError, Result};

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveTime, Utc};
use rusqlite::params;

use crate::cardgen::{EmptyCardPolicy, Strict};
use crate::config::{ConfigStore, KEY_DEBUG_LOG, KEY_NEXT_POS, KEY_ROLLOVER, KEY_SCHED_VER, KEY_TIME_LIMIT};
use crate::decks::DeckRegistry;
use crate::media::Media;
use crate::notetypes::{stock, ModelRegistry};
use crate::scheduler::{Scheduler, SchedulerOps};
use crate::storage::{ids2str, Db};
use crate::tags::TagRegistry;
use crate::undo::UndoLog;

/// Rows fetched per query when walking large id lists.
pub const DEFAULT_READ_CHUNK: usize = 1000;

const DEFAULT_ROLLOVER_HOUR: i64 = 4;

pub(crate) fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Creation time for a new collection: today's rollover hour, local time.
fn creation_time() -> i64 {
    let Some(rollover) = NaiveTime::from_hms_opt(DEFAULT_ROLLOVER_HOUR as u32, 0, 0) else {
        return now_secs();
    };
    Local::now()
        .date_naive()
        .and_time(rollover)
        .and_local_timezone(Local)
        .earliest()
        .map_or_else(now_secs, |start| start.timestamp())
}

/// Values of the single `col` row.
struct ColRow {
    crt: i64,
    mtime: i64,
    scm: i64,
    dty: bool,
    usn: i32,
    ls: i64,
    conf: String,
    models: String,
    decks: String,
    dconf: String,
    tags: String,
}

#[derive(Debug, Clone, Copy)]
struct Timebox {
    started: i64,
    reps: u32,
}

pub struct Collection {
    pub(crate) db: Option<Db>,
    path: PathBuf,
    server: bool,
    crt: i64,
    /// Milliseconds.
    mtime: i64,
    /// Milliseconds; a value newer than `ls` forces a full sync.
    scm: i64,
    dty: bool,
    usn: i32,
    /// Milliseconds.
    ls: i64,
    modified: bool,
    pub(crate) conf: ConfigStore,
    pub(crate) tags: TagRegistry,
    pub(crate) decks: DeckRegistry,
    models: Option<ModelRegistry>,
    /// Raw `col.models` blob until the registry is first needed.
    models_json: String,
    media: Media,
    pub(crate) sched: Scheduler,
    pub(crate) undo: UndoLog,
    pub(crate) empty_policy: Box<dyn EmptyCardPolicy + Send>,
    next_pos: i64,
    pub(crate) read_chunk: usize,
    timebox: Option<Timebox>,
    debug_log: bool,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("open", &self.db.is_some())
            .field("server", &self.server)
            .finish()
    }
}

impl Collection {
    /// Open the collection at `path`, creating and seeding it if absent.
    ///
    /// `server` selects server usn semantics: rows are stamped with the
    /// stored usn instead of `-1`.
    pub fn open(path: impl AsRef<Path>, server: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (db, created) = Db::open(&path, creation_time(), now_ms())?;

        let row = read_col(&db)?;
        let mut col = Self {
            db: Some(db),
            media: Media::for_collection(&path),
            path,
            server,
            crt: 0,
            mtime: 0,
            scm: 0,
            dty: false,
            usn: 0,
            ls: 0,
            modified: false,
            conf: ConfigStore::default(),
            tags: TagRegistry::default(),
            decks: DeckRegistry::default(),
            models: None,
            models_json: String::new(),
            sched: Scheduler::V2(crate::scheduler::SchedulerV2::new(0, DEFAULT_ROLLOVER_HOUR)),
            undo: UndoLog::default(),
            empty_policy: Box::new(Strict),
            next_pos: 1,
            read_chunk: DEFAULT_READ_CHUNK,
            timebox: None,
            debug_log: false,
        };
        col.load(row)?;

        if created {
            col.seed()?;
        }
        col.media.connect()?;

        log::info!(
            "Opened collection {:?} (scheduler v{}, created: {})",
            col.path,
            col.sched.version(),
            created
        );
        col.log("open");
        Ok(col)
    }

    fn load(&mut self, row: ColRow) -> Result<()> {
        self.crt = row.crt;
        self.mtime = row.mtime;
        self.scm = row.scm;
        self.dty = row.dty;
        self.usn = row.usn;
        self.ls = row.ls;
        self.conf = if row.conf.trim().is_empty() || row.conf.trim() == "{}" {
            ConfigStore::with_defaults()
        } else {
            ConfigStore::load(&row.conf)?
        };
        self.decks = DeckRegistry::load(&row.decks, &row.dconf)?;
        self.tags = TagRegistry::load(&row.tags)?;
        self.models = None;
        self.models_json = row.models;
        self.next_pos = self.conf.get_i64(KEY_NEXT_POS, 1);
        self.debug_log = self.conf.get_bool(KEY_DEBUG_LOG, false);
        self.select_scheduler()?;
        self.undo.clear();
        self.modified = false;
        Ok(())
    }

    fn select_scheduler(&mut self) -> Result<()> {
        let ver = self.conf.get_i64(KEY_SCHED_VER, 1);
        let rollover = self.conf.get_i64(KEY_ROLLOVER, DEFAULT_ROLLOVER_HOUR);
        self.sched = Scheduler::for_version(ver, self.crt, rollover)
            .map_err(CollectionError::UnsupportedSchedulerVersion)?;
        Ok(())
    }

    /// Defaults for a freshly created file.
    fn seed(&mut self) -> Result<()> {
        let usn = self.usn();
        let now = now_secs();
        self.decks.seed_defaults();
        let basic = {
            let models = self.models()?;
            let basic = models.add(stock::basic(), usn, now);
            models.add(stock::basic_and_reversed(), usn, now);
            models.add(stock::cloze(), usn, now);
            basic
        };
        self.conf.set(crate::config::KEY_CUR_MODEL, basic)?;
        self.modified = true;
        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    /// The database handle, or `Closed` after `close`.
    pub fn db(&self) -> Result<&Db> {
        self.db.as_ref().ok_or(CollectionError::Closed)
    }

    pub fn crt(&self) -> i64 {
        self.crt
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn scm(&self) -> i64 {
        self.scm
    }

    pub fn ls(&self) -> i64 {
        self.ls
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    pub fn conf(&self) -> &ConfigStore {
        &self.conf
    }

    pub fn conf_mut(&mut self) -> &mut ConfigStore {
        &mut self.conf
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn sched(&self) -> &Scheduler {
        &self.sched
    }

    pub fn sched_mut(&mut self) -> &mut Scheduler {
        &mut self.sched
    }

    pub fn set_empty_card_policy(&mut self, policy: Box<dyn EmptyCardPolicy + Send>) {
        self.empty_policy = policy;
    }

    pub fn set_read_chunk(&mut self, rows: usize) {
        self.read_chunk = rows.max(1);
    }

    // ==================== Saving ====================

    fn has_unsaved_changes(&self) -> bool {
        self.modified
            || self.conf.is_changed()
            || self.tags.is_changed()
            || self.decks.is_changed()
            || self.models.as_ref().map_or(false, ModelRegistry::is_changed)
    }

    /// Flush registries and the `col` row, then commit.
    pub fn save(&mut self) -> Result<()> {
        self.save_with_mod(None)
    }

    /// Like [`save`](Self::save), stamping `mod_ms` as the modification time
    /// instead of now.
    pub fn save_with_mod(&mut self, mod_ms: Option<i64>) -> Result<()> {
        if self.has_unsaved_changes() {
            self.mtime = mod_ms.unwrap_or_else(now_ms);
            self.flush()?;
        }
        self.db()?.commit()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.conf.get_i64(KEY_NEXT_POS, 1) != self.next_pos {
            self.conf.set(KEY_NEXT_POS, self.next_pos)?;
        }
        let conf = self.conf.to_json()?;
        let (decks, dconf) = self.decks.to_json()?;
        let tags = self.tags.to_json()?;
        let models = match &self.models {
            Some(registry) => registry.to_json()?,
            None => self.models_json.clone(),
        };

        self.db()?.execute(
            "UPDATE col SET crt = ?1, mod = ?2, scm = ?3, dty = ?4, usn = ?5, ls = ?6,
             conf = ?7, models = ?8, decks = ?9, dconf = ?10, tags = ?11",
            params![
                self.crt, self.mtime, self.scm, self.dty, self.usn, self.ls, conf, models, decks,
                dconf, tags
            ],
        )?;

        self.conf.mark_flushed();
        self.decks.mark_flushed();
        self.tags.mark_flushed();
        if let Some(registry) = self.models.as_mut() {
            registry.mark_flushed();
        }
        self.modified = false;
        Ok(())
    }

    /// Close the database. Safe to call more than once.
    pub fn close(&mut self, save: bool) -> Result<()> {
        if self.db.is_none() {
            return Ok(());
        }
        if save {
            self.save()?;
        } else {
            self.db()?.rollback()?;
        }
        self.log("close");
        self.media.close();
        self.db = None;
        log::info!("Closed collection {:?}", self.path);
        Ok(())
    }

    /// Reopen after `close`. No-op while open.
    pub fn reopen(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }
        let (db, _) = Db::open(&self.path, creation_time(), now_ms())?;
        let row = read_col(&db)?;
        self.db = Some(db);
        self.load(row)?;
        self.media.connect()?;
        log::info!("Reopened collection {:?}", self.path);
        Ok(())
    }

    /// Run `f` inside a transaction, unless one is already open.
    pub(crate) fn transact<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let own = !self.db()?.in_transaction();
        if own {
            self.db()?.begin()?;
        }
        let result = f(self);
        if own {
            match &result {
                Ok(_) => self.db()?.commit()?,
                Err(_) => self.db()?.rollback()?,
            }
        }
        result
    }

    // ==================== Sync state ====================

    /// Mark the `col` row as needing a write on the next save.
    pub fn set_mod(&mut self) {
        self.modified = true;
    }

    /// Usn to stamp on changed rows: `-1` on clients, the stored usn on
    /// servers.
    pub fn usn(&self) -> i32 {
        if self.server {
            self.usn
        } else {
            -1
        }
    }

    /// Require a full sync for the next sync. With `check`, fail with
    /// `ConfirmModSchema` unless a full sync is already pending, so the caller
    /// can ask the user first and then call
    /// [`mod_schema_no_check`](Self::mod_schema_no_check).
    pub fn mod_schema(&mut self, check: bool) -> Result<()> {
        if check && !self.schema_changed() {
            return Err(CollectionError::ConfirmModSchema);
        }
        self.mod_schema_no_check();
        Ok(())
    }

    pub fn mod_schema_no_check(&mut self) {
        // must land after the last sync even within the same millisecond
        self.scm = now_ms().max(self.ls + 1);
        self.set_mod();
    }

    /// True if the schema changed since the last sync.
    pub fn schema_changed(&self) -> bool {
        self.scm > self.ls
    }

    /// Prepare for a full upload: mark everything synced, drop graves,
    /// compact and close.
    pub fn before_upload(&mut self) -> Result<()> {
        {
            let db = self.db()?;
            for table in ["notes", "cards", "revlog"] {
                db.execute(&format!("UPDATE {} SET usn = 0 WHERE usn = -1", table), [])?;
            }
            db.execute("DELETE FROM graves", [])?;
        }
        self.usn += 1;
        self.models()?.before_upload();
        self.tags.before_upload();
        self.decks.before_upload();
        self.mod_schema_no_check();
        self.ls = self.scm;
        self.save()?;
        self.db()?.optimize()?;
        self.close(false)
    }

    // ==================== Counts and checks ====================

    pub fn is_empty(&self) -> Result<bool> {
        let any: Option<i64> = self.db()?.scalar_opt("SELECT 1 FROM cards LIMIT 1", [])?;
        Ok(any.is_none())
    }

    pub fn card_count(&self) -> Result<i64> {
        Ok(self.db()?.scalar("SELECT count() FROM cards", [])?)
    }

    pub fn note_count(&self) -> Result<i64> {
        Ok(self.db()?.scalar("SELECT count() FROM notes", [])?)
    }

    /// Quick structural check used before syncing: no orphan cards or notes,
    /// no notes of unknown models, no out-of-range template ordinals.
    pub fn basic_check(&mut self) -> Result<bool> {
        let models: Vec<_> = self.models()?.all().into_iter().cloned().collect();
        let mids: Vec<i64> = models.iter().map(|m| m.id).collect();
        let db = self.db()?;

        let orphan_card: Option<i64> = db.scalar_opt(
            "SELECT 1 FROM cards WHERE nid NOT IN (SELECT id FROM notes) LIMIT 1",
            [],
        )?;
        if orphan_card.is_some() {
            return Ok(false);
        }

        let orphan_note: Option<i64> = db.scalar_opt(
            &format!(
                "SELECT 1 FROM notes WHERE id NOT IN (SELECT DISTINCT nid FROM cards)
                 OR mid NOT IN {} LIMIT 1",
                ids2str(&mids)
            ),
            [],
        )?;
        if orphan_note.is_some() {
            return Ok(false);
        }

        for model in models.iter().filter(|m| !m.is_cloze()) {
            let ords: Vec<i64> = model.template_ords().into_iter().map(|o| o as i64).collect();
            let bad: Option<i64> = db.scalar_opt(
                &format!(
                    "SELECT 1 FROM cards WHERE ord NOT IN {} AND nid IN
                     (SELECT id FROM notes WHERE mid = ?1) LIMIT 1",
                    ids2str(&ords)
                ),
                [model.id],
            )?;
            if bad.is_some() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ==================== Ids and positions ====================

    /// Millisecond-clock id unused in `table`.
    pub fn timestamp_id(&self, table: &str) -> Result<i64> {
        Ok(self.db()?.timestamp_id(table)?)
    }

    /// Take the next new-card position.
    pub(crate) fn next_position(&mut self) -> i64 {
        let pos = self.next_pos;
        self.next_pos += 1;
        self.modified = true;
        pos
    }

    pub(crate) fn set_next_position(&mut self, pos: i64) {
        if self.next_pos != pos {
            self.next_pos = pos;
            self.modified = true;
        }
    }

    pub fn next_pos(&self) -> i64 {
        self.next_pos
    }

    // ==================== Timebox ====================

    pub fn start_timebox(&mut self) {
        self.timebox = Some(Timebox {
            started: now_secs(),
            reps: self.sched.reps(),
        });
    }

    /// Once the configured limit (`timeLim` seconds, `0` disables) has
    /// passed, the elapsed seconds and reviews done since the timebox
    /// started. Callers restart the timebox after reading a result.
    pub fn check_timebox(&self) -> Option<(i64, u32)> {
        let limit = self.conf.get_i64(KEY_TIME_LIMIT, 0);
        if limit <= 0 {
            return None;
        }
        let timebox = self.timebox?;
        let elapsed = now_secs() - timebox.started;
        if elapsed > limit {
            Some((elapsed, self.sched.reps().saturating_sub(timebox.reps)))
        } else {
            None
        }
    }

    // ==================== Scheduler version ====================

    /// Switch scheduler versions, migrating card states. A schema change, so
    /// it fails with `ConfirmModSchema` unless one is already pending.
    pub fn change_scheduler_version(&mut self, ver: i64) -> Result<()> {
        if ver == self.sched.version() as i64 {
            return Ok(());
        }
        if ver != 1 && ver != 2 {
            return Err(CollectionError::UnsupportedSchedulerVersion(ver));
        }
        self.mod_schema(true)?;
        self.clear_undo();

        let rollover = self.conf.get_i64(KEY_ROLLOVER, DEFAULT_ROLLOVER_HOUR);
        let next = Scheduler::for_version(ver, self.crt, rollover)
            .map_err(CollectionError::UnsupportedSchedulerVersion)?;

        self.transact(|col| {
            for did in col.decks.all_dynamic_ids() {
                col.empty_filtered(did)?;
            }
            let usn = col.usn();
            let db = col.db()?;
            if ver == 1 {
                next.move_to_v1(db, usn, now_secs())?;
            } else {
                next.move_to_v2(db, usn, now_secs())?;
            }
            Ok(())
        })?;

        self.conf.set(KEY_SCHED_VER, ver)?;
        self.sched = next;
        log::info!("Switched to scheduler v{}", ver);
        self.save()
    }

    // ==================== Debug log ====================

    pub fn set_debug_log(&mut self, enabled: bool) -> Result<()> {
        self.conf.set(KEY_DEBUG_LOG, enabled)?;
        self.debug_log = enabled;
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".log");
        PathBuf::from(name)
    }

    /// Log through the `log` facade and, when debug logging is on, append a
    /// timestamped line to the collection's log file.
    pub(crate) fn log(&self, msg: &str) {
        log::debug!("{}", msg);
        if !self.debug_log {
            return;
        }
        let line = format!("[{}] {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), msg);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            log::warn!("Failed to write collection log: {}", e);
        }
    }
}

fn read_col(db: &Db) -> Result<ColRow> {
    Ok(db.conn().query_row(
        "SELECT crt, mod, scm, dty, usn, ls, conf, models, decks, dconf, tags FROM col",
        [],
        |row| {
            Ok(ColRow {
                crt: row.get(0)?,
                mtime: row.get(1)?,
                scm: row.get(2)?,
                dty: row.get(3)?,
                usn: row.get(4)?,
                ls: row.get(5)?,
                conf: row.get(6)?,
                models: row.get(7)?,
                decks: row.get(8)?,
                dconf: row.get(9)?,
                tags: row.get(10)?,
            })
        },
    )?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn open_test_collection() -> (Collection, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let col = Collection::open(temp_dir.path().join("collection.anki2"), false).unwrap();
        (col, temp_dir)
    }

    #[test]
    fn test_new_collection_is_seeded() {
        let (mut col, _temp) = open_test_collection();
        assert!(col.is_empty().unwrap());
        assert!(col.decks.get(1).is_some());
        assert_eq!(col.models().unwrap().count(), 3);
        assert_eq!(col.sched.version(), 2);
        assert!(col.media().is_connected());
        assert_eq!(col.usn(), -1);
    }

    #[test]
    fn test_close_is_idempotent_and_reopen_reloads() {
        let (mut col, _temp) = open_test_collection();
        col.conf_mut().set("customKey", 42).unwrap();
        col.close(true).unwrap();
        col.close(true).unwrap();
        assert!(!col.is_open());
        assert!(matches!(col.card_count(), Err(CollectionError::Closed)));

        col.reopen().unwrap();
        assert_eq!(col.conf().get_i64("customKey", 0), 42);
        assert_eq!(col.models().unwrap().count(), 3);
    }

    #[test]
    fn test_unsaved_changes_dropped_on_close_without_save() {
        let (mut col, _temp) = open_test_collection();
        col.conf_mut().set("customKey", 1).unwrap();
        col.close(false).unwrap();
        col.reopen().unwrap();
        assert!(!col.conf().has("customKey"));
    }

    #[test]
    fn test_unsupported_scheduler_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("collection.anki2");
        let mut col = Collection::open(&path, false).unwrap();
        col.conf_mut().set(KEY_SCHED_VER, 7).unwrap();
        col.close(true).unwrap();

        let err = Collection::open(&path, false).unwrap_err();
        assert!(matches!(err, CollectionError::UnsupportedSchedulerVersion(7)));
    }

    #[test]
    fn test_mod_schema_needs_confirmation_after_sync() {
        let (mut col, _temp) = open_test_collection();
        // never synced: a full sync is already due
        assert!(col.schema_changed());
        col.mod_schema(true).unwrap();

        col.ls = col.scm;
        assert!(!col.schema_changed());
        assert!(matches!(col.mod_schema(true), Err(CollectionError::ConfirmModSchema)));
        col.mod_schema_no_check();
        assert!(col.scm >= col.ls);
    }

    #[test]
    fn test_server_usn() {
        let temp_dir = TempDir::new().unwrap();
        let col = Collection::open(temp_dir.path().join("server.anki2"), true).unwrap();
        assert_eq!(col.usn(), 0);
    }

    #[test]
    fn test_timebox() {
        let (mut col, _temp) = open_test_collection();
        col.start_timebox();
        assert!(col.check_timebox().is_none());

        col.conf_mut().set(KEY_TIME_LIMIT, 60).unwrap();
        assert!(col.check_timebox().is_none());

        if let Some(timebox) = col.timebox.as_mut() {
            timebox.started -= 120;
        }
        let (elapsed, reps) = col.check_timebox().unwrap();
        assert!(elapsed >= 120);
        assert_eq!(reps, 0);
    }

    #[test]
    fn test_change_scheduler_version_clears_undo() {
        let (mut col, _temp) = open_test_collection();
        col.checkpoint("something");
        col.change_scheduler_version(1).unwrap();
        assert_eq!(col.sched.version(), 1);
        assert!(!col.undo_available());
        assert!(matches!(
            col.change_scheduler_version(5),
            Err(CollectionError::UnsupportedSchedulerVersion(5))
        ));
    }

    #[test]
    fn test_debug_log_file() {
        let (mut col, _temp) = open_test_collection();
        col.set_debug_log(true).unwrap();
        col.log("hello");
        let contents = std::fs::read_to_string(col.log_path()).unwrap();
        assert!(contents.contains("hello"));
    }

    #[test]
    fn test_before_upload_closes_and_marks_synced() {
        let (mut col, _temp) = open_test_collection();
        col.before_upload().unwrap();
        assert!(!col.is_open());
        col.reopen().unwrap();
        assert!(!col.schema_changed());
        let graves: i64 = col.db().unwrap().scalar("SELECT count() FROM graves", []).unwrap();
        assert_eq!(graves, 0);
    }
}
