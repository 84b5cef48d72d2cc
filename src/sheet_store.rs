use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assign::RefreshObserver;
use crate::db;
use crate::error::Result;
use crate::filter::{filter_unassigned, AssignedKeys, UnassignedView};
use crate::model::CustomerDraft;

const SHEET_CACHE_KEY: &str = "sheet.cache";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Persisted {
    layout: String,
    imported_at: String,
    rows: Vec<CustomerDraft>,
}

/// Staged spreadsheet rows for the current workspace.
///
/// Loaded when a workspace opens and written back on every mutation, so a
/// restarted sidecar sees the same staging area.
#[derive(Debug, Default)]
pub struct SheetStore {
    staged: Persisted,
    unassigned: Option<UnassignedView>,
}

impl SheetStore {
    pub fn load(conn: &Connection) -> anyhow::Result<SheetStore> {
        let staged = match db::settings_get_json(conn, SHEET_CACHE_KEY)? {
            Some(v) => serde_json::from_value(v)?,
            None => Persisted::default(),
        };
        debug!(rows = staged.rows.len(), "sheet store loaded");
        Ok(SheetStore {
            staged,
            unassigned: None,
        })
    }

    pub fn replace(
        &mut self,
        conn: &Connection,
        layout: &str,
        rows: Vec<CustomerDraft>,
    ) -> anyhow::Result<()> {
        let staged = Persisted {
            layout: layout.to_string(),
            imported_at: db::now_rfc3339(),
            rows,
        };
        db::settings_set_json(conn, SHEET_CACHE_KEY, &serde_json::to_value(&staged)?)?;
        info!(layout, rows = staged.rows.len(), "sheet staged");
        self.staged = staged;
        self.unassigned = None;
        Ok(())
    }

    pub fn clear(&mut self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_delete(conn, SHEET_CACHE_KEY)?;
        self.staged = Persisted::default();
        self.unassigned = None;
        Ok(())
    }

    pub fn rows(&self) -> &[CustomerDraft] {
        &self.staged.rows
    }

    pub fn layout(&self) -> &str {
        &self.staged.layout
    }

    pub fn imported_at(&self) -> &str {
        &self.staged.imported_at
    }

    #[cfg(test)]
    pub fn is_view_cached(&self) -> bool {
        self.unassigned.is_some()
    }

    /// Staged rows not yet held by an owner, computed once per refresh.
    pub fn unassigned(&mut self, conn: &Connection) -> Result<&UnassignedView> {
        if self.unassigned.is_none() {
            let keys = AssignedKeys::load(conn)?;
            self.unassigned = Some(filter_unassigned(&self.staged.rows, &keys)?);
        }
        Ok(self.unassigned.get_or_insert_with(UnassignedView::default))
    }
}

impl RefreshObserver for SheetStore {
    fn assignments_changed(&mut self) {
        self.unassigned = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn d(rid: &str, acc: &str) -> CustomerDraft {
        CustomerDraft {
            record_id: rid.into(),
            account_number: acc.into(),
            branch: "Main".into(),
            customer_name: "X".into(),
            ..Default::default()
        }
    }

    #[test]
    fn persists_across_reload() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let mut store = SheetStore::load(&conn).unwrap();
        assert!(store.rows().is_empty());
        store
            .replace(&conn, "canonical", vec![d("C1", "A1"), d("C2", "A2")])
            .unwrap();

        let reloaded = SheetStore::load(&conn).unwrap();
        assert_eq!(reloaded.rows().len(), 2);
        assert_eq!(reloaded.layout(), "canonical");

        store.clear(&conn).unwrap();
        assert!(SheetStore::load(&conn).unwrap().rows().is_empty());
    }

    #[test]
    fn view_is_cached_until_refresh() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let mut store = SheetStore::load(&conn).unwrap();
        store.replace(&conn, "canonical", vec![d("C1", "A1")]).unwrap();
        assert!(!store.is_view_cached());
        assert_eq!(store.unassigned(&conn).unwrap().customers.len(), 1);
        assert!(store.is_view_cached());
        store.assignments_changed();
        assert!(!store.is_view_cached());
    }
}
