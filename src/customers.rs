use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::now_rfc3339;
use crate::error::{RecoveryError, Result};
use crate::model::{Actor, CustomerDraft, CustomerRecord, GeoPoint, Role};
use crate::owners;
use crate::upsert::{self, UpsertAction};

const SELECT_COLUMNS: &str = "record_id, account_number, sr_no, branch, customer_name,
    product_type, scheme_code, sanction_limit, date_of_npa, outstanding_balance,
    principal_overdue, interest_overdue, net_balance, provision, asset_classification,
    contact_no, address, assigned_owner_id, is_recovered, recovery_date, recovered_by,
    created_at, updated_at";

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<CustomerRecord> {
    Ok(CustomerRecord {
        record_id: r.get(0)?,
        account_number: r.get(1)?,
        sr_no: r.get(2)?,
        branch: r.get(3)?,
        customer_name: r.get(4)?,
        product_type: r.get(5)?,
        scheme_code: r.get(6)?,
        sanction_limit: r.get(7)?,
        date_of_npa: r.get(8)?,
        outstanding_balance: r.get(9)?,
        principal_overdue: r.get(10)?,
        interest_overdue: r.get(11)?,
        net_balance: r.get(12)?,
        provision: r.get(13)?,
        asset_classification: r.get(14)?,
        contact_no: r.get(15)?,
        address: r.get(16)?,
        assigned_owner_id: r.get(17)?,
        is_recovered: r.get::<_, i64>(18)? != 0,
        recovery_date: r.get(19)?,
        recovered_by: r.get(20)?,
        created_at: r.get(21)?,
        updated_at: r.get(22)?,
        location_history: None,
    })
}

pub fn get_customer(conn: &Connection, record_id: &str) -> Result<Option<CustomerRecord>> {
    let sql = format!("SELECT {} FROM customers WHERE record_id = ?", SELECT_COLUMNS);
    let rec = conn.query_row(&sql, [record_id], row_to_record).optional()?;
    let Some(mut rec) = rec else {
        return Ok(None);
    };
    rec.location_history = Some(locations(conn, record_id)?);
    Ok(Some(rec))
}

pub fn require_customer(conn: &Connection, record_id: &str) -> Result<CustomerRecord> {
    get_customer(conn, record_id)?
        .ok_or_else(|| RecoveryError::NotFound("Customer not found".into()))
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub page: i64,
    pub limit: i64,
    pub branch: Option<String>,
    pub is_recovered: Option<bool>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub descending: bool,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub customers: Vec<serde_json::Value>,
    pub total_pages: i64,
    pub current_page: i64,
    pub total_customers: i64,
}

fn sort_column(sort_by: Option<&str>) -> Result<&'static str> {
    match sort_by.unwrap_or("dateOfNpa") {
        "dateOfNpa" => Ok("date_of_npa"),
        "customerName" => Ok("customer_name"),
        "accountNumber" => Ok("account_number"),
        "recordId" => Ok("record_id"),
        "branch" => Ok("branch"),
        "outstandingBalance" => Ok("outstanding_balance"),
        "sanctionLimit" => Ok("sanction_limit"),
        "createdAt" => Ok("created_at"),
        "updatedAt" => Ok("updated_at"),
        other => Err(RecoveryError::validation(format!(
            "unsupported sortBy: {}",
            other
        ))),
    }
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Paginated listing. Managers are pinned to their branch and users to
/// the records they hold, whatever the query asks for.
pub fn list_customers(conn: &Connection, q: &ListQuery, actor: &Actor) -> Result<ListPage> {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    match actor.role {
        Role::Admin => {
            if let Some(b) = q.branch.as_deref().filter(|b| !b.is_empty()) {
                clauses.push("branch = ?".into());
                binds.push(Value::Text(b.to_string()));
            }
            if let Some(o) = q.owner_id.as_deref().filter(|o| !o.is_empty()) {
                clauses.push("assigned_owner_id = ?".into());
                binds.push(Value::Text(o.to_string()));
            }
        }
        Role::Manager => {
            clauses.push("branch = ?".into());
            binds.push(Value::Text(actor.branch.clone()));
        }
        Role::User => {
            clauses.push("assigned_owner_id = ?".into());
            binds.push(Value::Text(actor.owner_id.clone().unwrap_or_default()));
        }
    }

    if let Some(r) = q.is_recovered {
        clauses.push("is_recovered = ?".into());
        binds.push(Value::Integer(r as i64));
    }
    if let Some(term) = q.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        clauses.push(
            "(customer_name LIKE ? ESCAPE '\\' OR account_number LIKE ? ESCAPE '\\' OR record_id LIKE ? ESCAPE '\\')"
                .into(),
        );
        let pat = like_pattern(term);
        for _ in 0..3 {
            binds.push(Value::Text(pat.clone()));
        }
    }
    if let Some(from) = q.date_from.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("date_of_npa >= ?".into());
        binds.push(Value::Text(from.to_string()));
    }
    if let Some(to) = q.date_to.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("date_of_npa <= ?".into());
        binds.push(Value::Text(to.to_string()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM customers{}", where_sql),
        params_from_iter(binds.iter()),
        |r| r.get(0),
    )?;

    let column = sort_column(q.sort_by.as_deref())?;
    let dir = if q.descending { "DESC" } else { "ASC" };
    let page = q.page.max(1);
    let limit = q.limit.max(1);
    let sql = format!(
        "SELECT {} FROM customers{} ORDER BY {} {}, record_id ASC LIMIT ? OFFSET ?",
        SELECT_COLUMNS, where_sql, column, dir
    );
    let mut page_binds = binds.clone();
    page_binds.push(Value::Integer(limit));
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| RecoveryError::validation(format!("page {} is out of range", page)))?;
    page_binds.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&sql)?;
    let customers = stmt
        .query_map(params_from_iter(page_binds.iter()), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .iter()
        .map(CustomerRecord::to_json)
        .collect();

    Ok(ListPage {
        customers,
        total_pages: (total + limit - 1) / limit,
        current_page: page,
        total_customers: total,
    })
}

/// Single create. Unlike the bulk path an existing key is a conflict.
pub fn create_customer(conn: &Connection, draft: &CustomerDraft) -> Result<CustomerRecord> {
    draft.validate()?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM customers WHERE account_number = ? OR record_id = ?",
            (draft.account_number.trim(), draft.effective_record_id()),
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(RecoveryError::Conflict("Duplicate entry found".into()));
    }
    let (record_id, action) = upsert::upsert_one(conn, draft)?;
    debug_assert_eq!(action, UpsertAction::Inserted);
    require_customer(conn, &record_id)
}

/// Editable fields. Keys, owner and location history are not patchable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomerPatch {
    pub sr_no: Option<String>,
    pub branch: Option<String>,
    pub customer_name: Option<String>,
    pub product_type: Option<String>,
    pub scheme_code: Option<String>,
    pub sanction_limit: Option<f64>,
    pub date_of_npa: Option<String>,
    pub outstanding_balance: Option<f64>,
    pub principal_overdue: Option<f64>,
    pub interest_overdue: Option<f64>,
    pub net_balance: Option<f64>,
    pub provision: Option<String>,
    pub asset_classification: Option<String>,
    pub contact_no: Option<String>,
    pub address: Option<String>,
    pub is_recovered: Option<bool>,
    pub recovery_date: Option<String>,
}

/// Last write wins: there is no version check between concurrent editors.
pub fn update_customer(
    conn: &Connection,
    record_id: &str,
    patch: &CustomerPatch,
    actor: &Actor,
) -> Result<CustomerRecord> {
    let current = require_customer(conn, record_id)?;
    actor.require_branch(&current.branch)?;

    let mut d = CustomerDraft {
        record_id: current.record_id.clone(),
        account_number: current.account_number.clone(),
        sr_no: patch.sr_no.clone().unwrap_or(current.sr_no),
        branch: patch.branch.clone().unwrap_or(current.branch),
        customer_name: patch.customer_name.clone().unwrap_or(current.customer_name),
        product_type: patch.product_type.clone().unwrap_or(current.product_type),
        scheme_code: patch.scheme_code.clone().unwrap_or(current.scheme_code),
        sanction_limit: patch.sanction_limit.unwrap_or(current.sanction_limit),
        date_of_npa: patch
            .date_of_npa
            .clone()
            .or(current.date_of_npa)
            .unwrap_or_default(),
        outstanding_balance: patch
            .outstanding_balance
            .unwrap_or(current.outstanding_balance),
        principal_overdue: patch.principal_overdue.unwrap_or(current.principal_overdue),
        interest_overdue: patch.interest_overdue.unwrap_or(current.interest_overdue),
        net_balance: patch.net_balance.unwrap_or(current.net_balance),
        provision: patch.provision.clone().unwrap_or(current.provision),
        asset_classification: patch
            .asset_classification
            .clone()
            .unwrap_or(current.asset_classification),
        contact_no: patch.contact_no.clone().unwrap_or(current.contact_no),
        address: patch.address.clone().unwrap_or(current.address),
    };
    d.date_of_npa = d.date_of_npa.trim().to_string();
    d.validate()?;

    let (is_recovered, recovery_date, recovered_by) = match patch.is_recovered {
        Some(true) => (
            true,
            Some(
                patch
                    .recovery_date
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string()),
            ),
            actor.owner_id.clone().or(current.recovered_by),
        ),
        Some(false) => (false, None, None),
        None => (
            current.is_recovered,
            patch.recovery_date.clone().or(current.recovery_date),
            current.recovered_by,
        ),
    };

    conn.execute(
        "UPDATE customers SET
           sr_no = ?, branch = ?, customer_name = ?, product_type = ?, scheme_code = ?,
           sanction_limit = ?, date_of_npa = ?, outstanding_balance = ?,
           principal_overdue = ?, interest_overdue = ?, net_balance = ?, provision = ?,
           asset_classification = ?, contact_no = ?, address = ?, is_recovered = ?,
           recovery_date = ?, recovered_by = ?, updated_at = ?
         WHERE record_id = ?",
        rusqlite::params![
            d.sr_no,
            d.branch,
            d.customer_name,
            d.product_type,
            d.scheme_code,
            d.sanction_limit,
            Some(d.date_of_npa.as_str()).filter(|s| !s.is_empty()),
            d.outstanding_balance,
            d.principal_overdue,
            d.interest_overdue,
            d.net_balance,
            d.provision,
            d.asset_classification,
            d.contact_no,
            d.address,
            is_recovered as i64,
            recovery_date,
            recovered_by,
            now_rfc3339(),
            record_id,
        ],
    )?;
    require_customer(conn, record_id)
}

/// Hard delete; locations and visits go with the customer.
pub fn delete_customer(conn: &Connection, record_id: &str) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM customers WHERE record_id = ?",
            [record_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(RecoveryError::NotFound("Customer not found".into()));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM visits WHERE record_id = ?", [record_id])?;
    tx.execute(
        "DELETE FROM customer_locations WHERE record_id = ?",
        [record_id],
    )?;
    tx.execute("DELETE FROM customers WHERE record_id = ?", [record_id])?;
    tx.commit()?;
    info!(record_id, "customer deleted");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignSummary {
    pub modified_count: usize,
    /// Already held by the requested owner.
    pub unchanged: Vec<String>,
    /// Held by a different owner; left untouched.
    pub already_assigned: Vec<String>,
    pub missing: Vec<String>,
}

fn require_owner(conn: &Connection, owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(RecoveryError::validation("missing userId"));
    }
    if owners::get_owner(conn, owner_id)?.is_none() {
        return Err(RecoveryError::NotFound(format!(
            "owner {} not found",
            owner_id
        )));
    }
    Ok(())
}

/// Bind unassigned records to an owner in one transaction.
pub fn assign_ids(conn: &Connection, owner_id: &str, ids: &[String]) -> Result<AssignSummary> {
    require_owner(conn, owner_id)?;
    let tx = conn.unchecked_transaction()?;
    let now = now_rfc3339();
    let mut summary = AssignSummary::default();
    for id in ids {
        let current: Option<Option<String>> = tx
            .query_row(
                "SELECT assigned_owner_id FROM customers WHERE record_id = ?",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        match current {
            None => summary.missing.push(id.clone()),
            Some(Some(o)) if o == owner_id => summary.unchanged.push(id.clone()),
            Some(Some(_)) => summary.already_assigned.push(id.clone()),
            Some(None) => {
                tx.execute(
                    "UPDATE customers SET assigned_owner_id = ?, updated_at = ?
                     WHERE record_id = ? AND assigned_owner_id IS NULL",
                    (owner_id, &now, id),
                )?;
                summary.modified_count += 1;
            }
        }
    }
    tx.commit()?;
    info!(
        owner_id,
        modified = summary.modified_count,
        already_assigned = summary.already_assigned.len(),
        missing = summary.missing.len(),
        "customers assigned"
    );
    Ok(summary)
}

/// Set the owner of every record in a branch. Zero matches is not an error.
pub fn assign_branch(conn: &Connection, owner_id: &str, branch: &str) -> Result<usize> {
    if branch.trim().is_empty() {
        return Err(RecoveryError::validation("missing branch"));
    }
    require_owner(conn, owner_id)?;
    let modified = conn.execute(
        "UPDATE customers SET assigned_owner_id = ?1, updated_at = ?2
         WHERE branch = ?3 AND (assigned_owner_id IS NULL OR assigned_owner_id <> ?1)",
        (owner_id, now_rfc3339(), branch.trim()),
    )?;
    info!(owner_id, branch, modified, "branch assigned");
    Ok(modified)
}

pub fn locations(conn: &Connection, record_id: &str) -> Result<Vec<GeoPoint>> {
    let mut stmt = conn.prepare(
        "SELECT lat, lng, captured_at, captured_by FROM customer_locations
         WHERE record_id = ? ORDER BY id",
    )?;
    let points = stmt
        .query_map([record_id], |r| {
            Ok(GeoPoint {
                lat: r.get(0)?,
                lng: r.get(1)?,
                captured_at: r.get(2)?,
                captured_by: r.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(points)
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(RecoveryError::validation("lat must be between -90 and 90"));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(RecoveryError::validation("lng must be between -180 and 180"));
    }
    Ok(())
}

pub fn append_location(
    conn: &Connection,
    record_id: &str,
    lat: f64,
    lng: f64,
    captured_by: Option<&str>,
) -> Result<GeoPoint> {
    validate_coordinates(lat, lng)?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM customers WHERE record_id = ?",
            [record_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(RecoveryError::NotFound("Customer not found".into()));
    }
    let point = GeoPoint {
        lat,
        lng,
        captured_at: now_rfc3339(),
        captured_by: captured_by.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO customer_locations(record_id, lat, lng, captured_at, captured_by)
         VALUES(?, ?, ?, ?, ?)",
        (record_id, point.lat, point.lng, &point.captured_at, &point.captured_by),
    )?;
    Ok(point)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_customers: i64,
    pub total_outstanding: f64,
    pub total_recovered: f64,
    pub recovered_count: i64,
}

pub fn stats(conn: &Connection, branch: Option<&str>) -> Result<Stats> {
    let sql = "SELECT COUNT(*),
                COALESCE(SUM(outstanding_balance), 0),
                COALESCE(SUM(CASE WHEN is_recovered = 1 THEN net_balance ELSE 0 END), 0),
                COALESCE(SUM(is_recovered), 0)
             FROM customers";
    let map = |r: &Row<'_>| {
        Ok(Stats {
            total_customers: r.get(0)?,
            total_outstanding: r.get(1)?,
            total_recovered: r.get(2)?,
            recovered_count: r.get(3)?,
        })
    };
    let s = match branch {
        Some(b) => conn.query_row(&format!("{} WHERE branch = ?", sql), [b], map)?,
        None => conn.query_row(sql, [], map)?,
    };
    Ok(s)
}
