//! Bulk upsert keyed by account number.
//!
//! Every candidate is validated and written in its own transaction; a bad
//! candidate becomes a [`FailedEntry`] and never affects its siblings.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::now_rfc3339;
use crate::error::{is_unique_violation, ErrorKind, RecoveryError, Result};
use crate::model::CustomerDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Duplicate,
    Validation,
    Internal,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Conflict => FailureKind::Duplicate,
            ErrorKind::Validation => FailureKind::Validation,
            _ => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    /// Offending input, echoed back as received.
    pub customer: serde_json::Value,
    pub index: usize,
    pub reason: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub customer_ids: Vec<String>,
    pub inserted_count: usize,
    pub updated_count: usize,
    pub failed_entries: Vec<FailedEntry>,
}

impl BulkOutcome {
    pub fn success_count(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_entries.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_entries.is_empty()
    }

    pub fn fail(&mut self, index: usize, customer: serde_json::Value, err: &RecoveryError) {
        let kind = FailureKind::from(err.kind());
        let reason = match kind {
            FailureKind::Duplicate => format!("Duplicate entry: {}", err),
            _ => err.to_string(),
        };
        warn!(index, reason = %reason, "bulk upsert entry rejected");
        self.failed_entries.push(FailedEntry {
            customer,
            index,
            reason,
            kind,
        });
    }

    pub fn to_json(&self) -> serde_json::Value {
        if self.is_partial() {
            serde_json::json!({
                "status": "partial",
                "message": "Some entries were not processed due to errors",
                "failedEntries": self.failed_entries,
                "successCount": self.success_count(),
                "failedCount": self.failed_count(),
                "insertedCount": self.inserted_count,
                "updatedCount": self.updated_count,
                "customerIds": self.customer_ids,
            })
        } else {
            serde_json::json!({
                "status": "created",
                "message": "All customers processed successfully",
                "successCount": self.success_count(),
                "insertedCount": self.inserted_count,
                "updatedCount": self.updated_count,
                "customerIds": self.customer_ids,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
}

/// Upsert typed drafts; failures echo the draft itself.
pub fn bulk_upsert(conn: &Connection, drafts: &[CustomerDraft]) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for (i, d) in drafts.iter().enumerate() {
        apply(conn, &mut outcome, i, d, || {
            serde_json::to_value(d).unwrap_or(serde_json::Value::Null)
        });
    }
    outcome
}

/// Upsert untyped JSON candidates; malformed elements fail individually.
pub fn bulk_upsert_json(conn: &Connection, items: &[serde_json::Value]) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value::<CustomerDraft>(item.clone()) {
            Ok(d) => apply(conn, &mut outcome, i, &d, || item.clone()),
            Err(e) => outcome.fail(
                i,
                item.clone(),
                &RecoveryError::validation(format!("malformed customer: {}", e)),
            ),
        }
    }
    outcome
}

fn apply(
    conn: &Connection,
    outcome: &mut BulkOutcome,
    index: usize,
    draft: &CustomerDraft,
    echo: impl FnOnce() -> serde_json::Value,
) {
    match upsert_one(conn, draft) {
        Ok((record_id, action)) => {
            debug!(index, record_id = %record_id, ?action, "customer upserted");
            match action {
                UpsertAction::Inserted => outcome.inserted_count += 1,
                UpsertAction::Updated => outcome.updated_count += 1,
            }
            outcome.customer_ids.push(record_id);
        }
        Err(e) => outcome.fail(index, echo(), &e),
    }
}

/// Validate and persist one draft. Existing owner, recovery status and
/// location history are left untouched.
pub fn upsert_one(conn: &Connection, draft: &CustomerDraft) -> Result<(String, UpsertAction)> {
    draft.validate()?;
    let account_number = draft.account_number.trim().to_string();
    let record_id = draft.effective_record_id();

    let tx = conn.unchecked_transaction()?;

    let by_account: Option<String> = tx
        .query_row(
            "SELECT record_id FROM customers WHERE account_number = ?",
            [&account_number],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = &by_account {
        if *existing != record_id {
            return Err(RecoveryError::Conflict(format!(
                "account number {} already belongs to customer {}",
                account_number, existing
            )));
        }
    }

    let by_record: Option<String> = tx
        .query_row(
            "SELECT account_number FROM customers WHERE record_id = ?",
            [&record_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = &by_record {
        if *existing != account_number {
            return Err(RecoveryError::Conflict(format!(
                "customer id {} already used by account {}",
                record_id, existing
            )));
        }
    }

    let now = now_rfc3339();
    let date = Some(draft.date_of_npa.trim()).filter(|s| !s.is_empty());
    let res = tx.execute(
        "INSERT INTO customers(
            record_id, account_number, sr_no, branch, customer_name, product_type,
            scheme_code, sanction_limit, date_of_npa, outstanding_balance,
            principal_overdue, interest_overdue, net_balance, provision,
            asset_classification, contact_no, address, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)
         ON CONFLICT(account_number) DO UPDATE SET
           sr_no = excluded.sr_no,
           branch = excluded.branch,
           customer_name = excluded.customer_name,
           product_type = excluded.product_type,
           scheme_code = excluded.scheme_code,
           sanction_limit = excluded.sanction_limit,
           date_of_npa = excluded.date_of_npa,
           outstanding_balance = excluded.outstanding_balance,
           principal_overdue = excluded.principal_overdue,
           interest_overdue = excluded.interest_overdue,
           net_balance = excluded.net_balance,
           provision = excluded.provision,
           asset_classification = excluded.asset_classification,
           contact_no = excluded.contact_no,
           address = excluded.address,
           updated_at = excluded.updated_at",
        rusqlite::params![
            record_id,
            account_number,
            draft.sr_no.trim(),
            draft.branch.trim(),
            draft.customer_name.trim(),
            draft.product_type.trim(),
            draft.scheme_code.trim(),
            draft.sanction_limit,
            date,
            draft.outstanding_balance,
            draft.principal_overdue,
            draft.interest_overdue,
            draft.net_balance,
            draft.provision.trim(),
            draft.asset_classification.trim(),
            draft.contact_no.trim(),
            draft.address.trim(),
            now,
        ],
    );
    match res {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(RecoveryError::Conflict(format!(
                "customer id {} or account number {} already exists",
                record_id, account_number
            )));
        }
        Err(e) => return Err(e.into()),
    }
    tx.commit()?;

    let action = if by_account.is_some() {
        UpsertAction::Updated
    } else {
        UpsertAction::Inserted
    };
    Ok((record_id, action))
}
