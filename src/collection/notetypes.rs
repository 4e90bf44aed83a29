use rusqlite::params;

use super::{now_secs, Collection, CollectionError, Result};
use crate::config::KEY_CUR_MODEL;
use crate::notes::{join_fields, split_fields};
use crate::notetypes::{Model, ModelRegistry, Template};
use crate::storage::ids2str;

impl Collection {
    /// The model registry, parsed from the `col` row on first use.
    pub fn models(&mut self) -> Result<&mut ModelRegistry> {
        let registry = match self.models.take() {
            Some(registry) => registry,
            None => {
                let registry = ModelRegistry::load(&self.models_json)?;
                self.models_json.clear();
                log::debug!("Loaded {} note types", registry.count());
                registry
            }
        };
        Ok(self.models.insert(registry))
    }

    /// A copy of model `mid`.
    pub fn model(&mut self, mid: i64) -> Result<Model> {
        self.models()?
            .get(mid)
            .cloned()
            .ok_or(CollectionError::ModelNotFound(mid))
    }

    /// The model selected for new notes.
    pub fn current_model(&mut self) -> Result<Model> {
        let conf = self.conf.clone();
        self.models()?
            .current(&conf)
            .cloned()
            .ok_or(CollectionError::ModelNotFound(0))
    }

    pub fn set_current_model(&mut self, mid: i64) -> Result<()> {
        if !self.models()?.have(mid) {
            return Err(CollectionError::ModelNotFound(mid));
        }
        self.conf.set(KEY_CUR_MODEL, mid)?;
        Ok(())
    }

    /// Add a new model, returning its id.
    pub fn add_model(&mut self, model: Model) -> Result<i64> {
        let usn = self.usn();
        Ok(self.models()?.add(model, usn, now_secs()))
    }

    /// Store non-structural changes to a model (template text, css, deck) and
    /// generate any cards the new templates call for.
    pub fn save_model(&mut self, model: Model) -> Result<()> {
        let mid = model.id;
        let usn = self.usn();
        if !self.models()?.have(mid) {
            return Err(CollectionError::ModelNotFound(mid));
        }
        self.models()?.save(model, usn, now_secs());
        self.regenerate_model(mid)
    }

    fn regenerate_model(&mut self, mid: i64) -> Result<()> {
        let nids = self.model_nids(mid)?;
        if !nids.is_empty() {
            self.generate_cards(&nids, mid, None)?;
        }
        Ok(())
    }

    pub(crate) fn model_nids(&mut self, mid: i64) -> Result<Vec<i64>> {
        self.models()?;
        match (self.db.as_ref(), self.models.as_ref()) {
            (Some(db), Some(registry)) => Ok(registry.nids(db, mid)?),
            _ => Err(CollectionError::Closed),
        }
    }

    /// Delete a model with all its notes and cards.
    pub fn rem_model(&mut self, mid: i64) -> Result<()> {
        self.model(mid)?;
        self.mod_schema(true)?;
        self.transact(|col| {
            let cids: Vec<i64> = col.db()?.list(
                "SELECT id FROM cards WHERE nid IN (SELECT id FROM notes WHERE mid = ?1)",
                [mid],
            )?;
            col.rem_cards(&cids, true)?;
            let leftover = col.model_nids(mid)?;
            col.rem_notes_raw(&leftover)?;
            col.models()?.remove_entry(mid);
            Ok(())
        })?;

        let conf = self.conf.clone();
        let fallback = self.models()?.current(&conf).map(|m| m.id);
        if conf.get::<i64>(KEY_CUR_MODEL) == Some(mid) {
            match fallback {
                Some(other) => self.conf.set(KEY_CUR_MODEL, other)?,
                None => {
                    self.conf.remove(KEY_CUR_MODEL);
                }
            }
        }
        log::info!("Removed note type {}", mid);
        Ok(())
    }

    pub fn add_field(&mut self, mid: i64, name: &str) -> Result<()> {
        let mut model = self.model(mid)?;
        if model.field_map().contains_key(name) {
            return Err(CollectionError::InvalidOperation(format!(
                "field \"{}\" already exists",
                name
            )));
        }
        self.mod_schema(true)?;
        model.add_field_entry(name);

        let usn = self.usn();
        self.transact(|col| {
            col.db()?.execute(
                "UPDATE notes SET flds = flds || ?1, mod = ?2, usn = ?3 WHERE mid = ?4",
                params![crate::notes::FIELD_SEPARATOR.to_string(), now_secs(), usn, mid],
            )?;
            col.models()?.save(model, usn, now_secs());
            Ok(())
        })
    }

    /// Remove field `ord` from a model and from every note using it.
    pub fn rem_field(&mut self, mid: i64, ord: usize) -> Result<()> {
        let mut model = self.model(mid)?;
        if ord >= model.flds.len() {
            return Err(CollectionError::InvalidOperation(format!("no field {}", ord)));
        }
        if model.flds.len() == 1 {
            return Err(CollectionError::InvalidOperation(
                "a note type needs at least one field".to_string(),
            ));
        }
        self.mod_schema(true)?;

        model.flds.remove(ord);
        if model.sortf == ord {
            model.sortf = 0;
        } else if model.sortf > ord {
            model.sortf -= 1;
        }
        model.renumber();

        let usn = self.usn();
        self.transact(|col| {
            let rows: Vec<(i64, String)> = col.db()?.query_map(
                "SELECT id, flds FROM notes WHERE mid = ?1",
                [mid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let nids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
            {
                let mut stmt = col
                    .db()?
                    .conn()
                    .prepare("UPDATE notes SET flds = ?1, mod = ?2, usn = ?3 WHERE id = ?4")?;
                for (nid, flds) in rows {
                    let mut fields = split_fields(&flds);
                    if ord < fields.len() {
                        fields.remove(ord);
                    }
                    stmt.execute(params![join_fields(&fields), now_secs(), usn, nid])?;
                }
            }
            col.models()?.save(model, usn, now_secs());
            col.update_field_cache(&nids)
        })
    }

    /// Add a card template and generate its cards.
    pub fn add_template(&mut self, mid: i64, tmpl: Template) -> Result<()> {
        let mut model = self.model(mid)?;
        if model.is_cloze() {
            return Err(CollectionError::InvalidOperation(
                "cloze note types have a single template".to_string(),
            ));
        }
        self.mod_schema(true)?;
        model.add_template_entry(tmpl);
        let usn = self.usn();
        self.models()?.save(model, usn, now_secs());
        self.transact(|col| col.regenerate_model(mid))
    }

    /// Remove template `ord` and its cards. Returns false, changing nothing,
    /// when some note would be left without cards.
    pub fn rem_template(&mut self, mid: i64, ord: usize) -> Result<bool> {
        let mut model = self.model(mid)?;
        if model.is_cloze() || model.tmpls.len() < 2 || ord >= model.tmpls.len() {
            return Ok(false);
        }

        let cids: Vec<i64> = self.db()?.list(
            "SELECT c.id FROM cards c, notes n WHERE c.nid = n.id AND n.mid = ?1 AND c.ord = ?2",
            params![mid, ord as i64],
        )?;
        let orphaning: Option<i64> = self.db()?.scalar_opt(
            &format!(
                "SELECT nid FROM cards WHERE nid IN (SELECT nid FROM cards WHERE id IN {})
                 GROUP BY nid HAVING count() < 2 LIMIT 1",
                ids2str(&cids)
            ),
            [],
        )?;
        if orphaning.is_some() {
            return Ok(false);
        }

        self.mod_schema(true)?;
        model.tmpls.remove(ord);
        model.renumber();

        let usn = self.usn();
        self.transact(|col| {
            col.rem_cards(&cids, false)?;
            col.db()?.execute(
                "UPDATE cards SET ord = ord - 1, usn = ?1, mod = ?2
                 WHERE nid IN (SELECT id FROM notes WHERE mid = ?3) AND ord > ?4",
                params![usn, now_secs(), mid, ord as i64],
            )?;
            col.models()?.save(model, usn, now_secs());
            Ok(())
        })?;
        Ok(true)
    }

    /// Choose the sort field and rebuild the cached sort values.
    pub fn set_sort_field(&mut self, mid: i64, idx: usize) -> Result<()> {
        let mut model = self.model(mid)?;
        if idx >= model.flds.len() {
            return Err(CollectionError::InvalidOperation(format!("no field {}", idx)));
        }
        model.sortf = idx;
        let usn = self.usn();
        self.models()?.save(model, usn, now_secs());
        let nids = self.model_nids(mid)?;
        self.transact(|col| col.update_field_cache(&nids))
    }
}
