use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::sheet_store::SheetStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sheets: SheetStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            config,
            workspace: None,
            db: None,
            sheets: SheetStore::default(),
        }
    }

    /// Open (or create) the workspace database and reload its staged sheet.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        let sheets = SheetStore::load(&conn)?;
        info!(workspace = %path.display(), staged = sheets.rows().len(), "workspace opened");
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        self.sheets = sheets;
        Ok(())
    }
}
