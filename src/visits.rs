use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::customers::validate_coordinates;
use crate::db::now_rfc3339;
use crate::error::{RecoveryError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub visit_id: String,
    pub record_id: String,
    pub owner_id: Option<String>,
    pub feedback_text: String,
    pub image_url: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub visit_date: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewVisit {
    pub record_id: String,
    pub owner_id: Option<String>,
    pub feedback_text: String,
    pub image_url: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

pub fn create_visit(conn: &Connection, v: &NewVisit) -> Result<Visit> {
    if v.feedback_text.trim().is_empty() || v.record_id.trim().is_empty() {
        return Err(RecoveryError::validation(
            "Please provide feedback text and customer ID",
        ));
    }
    validate_coordinates(v.lat, v.lng)?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM customers WHERE record_id = ?",
            [&v.record_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(RecoveryError::NotFound("Customer not found".into()));
    }

    let visit = Visit {
        visit_id: Uuid::new_v4().to_string(),
        record_id: v.record_id.clone(),
        owner_id: v.owner_id.clone(),
        feedback_text: v.feedback_text.trim().to_string(),
        image_url: v.image_url.clone(),
        lat: v.lat,
        lng: v.lng,
        visit_date: now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO visits(id, record_id, owner_id, feedback_text, image_url, lat, lng, visit_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            visit.visit_id,
            visit.record_id,
            visit.owner_id,
            visit.feedback_text,
            visit.image_url,
            visit.lat,
            visit.lng,
            visit.visit_date,
        ],
    )?;
    Ok(visit)
}

#[derive(Debug, Clone)]
pub enum VisitScope {
    Customer(String),
    Owner(String),
}

/// Newest first. Dates bound the range inclusively at day granularity.
pub fn list_visits(
    conn: &Connection,
    scope: &VisitScope,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<Vec<Visit>> {
    let (mut sql, mut binds) = match scope {
        VisitScope::Customer(id) => (
            String::from("SELECT id, record_id, owner_id, feedback_text, image_url, lat, lng, visit_date FROM visits WHERE record_id = ?"),
            vec![Value::Text(id.clone())],
        ),
        VisitScope::Owner(id) => (
            String::from("SELECT id, record_id, owner_id, feedback_text, image_url, lat, lng, visit_date FROM visits WHERE owner_id = ?"),
            vec![Value::Text(id.clone())],
        ),
    };
    if let (Some(start), Some(end)) = (start_date, end_date) {
        sql.push_str(" AND substr(visit_date, 1, 10) BETWEEN ? AND ?");
        binds.push(Value::Text(start.to_string()));
        binds.push(Value::Text(end.to_string()));
    }
    sql.push_str(" ORDER BY visit_date DESC, id");

    let mut stmt = conn.prepare(&sql)?;
    let visits = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            Ok(Visit {
                visit_id: r.get(0)?,
                record_id: r.get(1)?,
                owner_id: r.get(2)?,
                feedback_text: r.get(3)?,
                image_url: r.get(4)?,
                lat: r.get(5)?,
                lng: r.get(6)?,
                visit_date: r.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(visits)
}
