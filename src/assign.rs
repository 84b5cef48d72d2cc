//! Two-phase assignment: create staged rows as unassigned customers, then
//! bind the created ids to an owner in a separate request.
//!
//! The phases are not wrapped in one transaction. A failed
//! create stops the run before any assignment; a failed assign leaves the
//! created records in place so the assign step alone can be retried.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::customers::{self, AssignSummary};
use crate::error::{RecoveryError, Result};
use crate::model::CustomerDraft;
use crate::upsert::{self, BulkOutcome};

/// Persisted-state operations the orchestrator depends on.
pub trait RecordService {
    fn bulk_upsert(&mut self, batch: &[CustomerDraft]) -> Result<BulkOutcome>;
    fn assign_ids(&mut self, owner_id: &str, ids: &[String]) -> Result<AssignSummary>;
}

/// Told when assignments change so cached unassigned views can be dropped.
pub trait RefreshObserver {
    fn assignments_changed(&mut self);
}

/// Service backed by the sidecar's own database connection.
pub struct LocalService<'a> {
    conn: &'a Connection,
}

impl<'a> LocalService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        LocalService { conn }
    }
}

impl RecordService for LocalService<'_> {
    fn bulk_upsert(&mut self, batch: &[CustomerDraft]) -> Result<BulkOutcome> {
        Ok(upsert::bulk_upsert(self.conn, batch))
    }

    fn assign_ids(&mut self, owner_id: &str, ids: &[String]) -> Result<AssignSummary> {
        customers::assign_ids(self.conn, owner_id, ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Individually picked rows, by account number.
    Accounts(Vec<String>),
    /// Every staged row of one branch.
    Branch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Staging,
    Create,
    Created,
    Assign,
    Completed,
    PartialCreateFailure,
    AssignFailed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "phase")]
pub enum AssignmentOutcome {
    #[serde(rename = "completed")]
    Completed {
        created: BulkOutcome,
        assigned: AssignSummary,
    },
    #[serde(rename = "partial_create_failure")]
    PartialCreateFailure { created: BulkOutcome },
    #[serde(rename = "assign_failed")]
    AssignFailed {
        created: BulkOutcome,
        reason: String,
    },
}

impl AssignmentOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            AssignmentOutcome::Completed { .. } => Phase::Completed,
            AssignmentOutcome::PartialCreateFailure { .. } => Phase::PartialCreateFailure,
            AssignmentOutcome::AssignFailed { .. } => Phase::AssignFailed,
        }
    }
}

/// Pick the staged rows a selection refers to, in staged order.
pub fn select_rows(staged: &[CustomerDraft], selection: &Selection) -> Vec<CustomerDraft> {
    match selection {
        Selection::Accounts(accounts) => staged
            .iter()
            .filter(|d| accounts.iter().any(|a| a.trim() == d.account_number.trim()))
            .cloned()
            .collect(),
        Selection::Branch(branch) => staged
            .iter()
            .filter(|d| d.branch.trim() == branch.trim())
            .cloned()
            .collect(),
    }
}

/// Run both phases. Staging problems (no owner, nothing selected) are
/// returned as `Err`; phase outcomes, including failures, are data.
pub fn run(
    service: &mut dyn RecordService,
    observer: &mut dyn RefreshObserver,
    staged: &[CustomerDraft],
    selection: &Selection,
    owner_id: &str,
) -> Result<AssignmentOutcome> {
    if owner_id.trim().is_empty() {
        return Err(RecoveryError::validation("select an owner first"));
    }
    let rows = select_rows(staged, selection);
    if rows.is_empty() {
        return Err(RecoveryError::validation("No customers selected"));
    }
    info!(phase = ?Phase::Staging, rows = rows.len(), owner_id, "assignment staged");

    info!(phase = ?Phase::Create, "creating customers");
    let created = service.bulk_upsert(&rows)?;
    if created.is_partial() {
        warn!(
            phase = ?Phase::PartialCreateFailure,
            failed = created.failed_count(),
            succeeded = created.success_count(),
            "create phase reported failures, assignment skipped"
        );
        return Ok(AssignmentOutcome::PartialCreateFailure { created });
    }
    info!(phase = ?Phase::Created, count = created.success_count(), "customers created");

    let outcome = assign_created(service, observer, created, owner_id);
    Ok(outcome)
}

/// Assign phase on its own, for retrying after an assign failure.
pub fn retry_assign(
    service: &mut dyn RecordService,
    observer: &mut dyn RefreshObserver,
    ids: Vec<String>,
    owner_id: &str,
) -> Result<AssignmentOutcome> {
    if ids.is_empty() {
        return Err(RecoveryError::validation("No customers selected"));
    }
    let created = BulkOutcome {
        customer_ids: ids,
        ..Default::default()
    };
    Ok(assign_created(service, observer, created, owner_id))
}

fn assign_created(
    service: &mut dyn RecordService,
    observer: &mut dyn RefreshObserver,
    created: BulkOutcome,
    owner_id: &str,
) -> AssignmentOutcome {
    info!(phase = ?Phase::Assign, count = created.customer_ids.len(), "assigning customers");
    match service.assign_ids(owner_id, &created.customer_ids) {
        Ok(assigned) => {
            observer.assignments_changed();
            if !assigned.already_assigned.is_empty() || !assigned.missing.is_empty() {
                let reason = RecoveryError::Assignment(format!(
                    "{} of {} records were not bound (already assigned: [{}], missing: [{}])",
                    assigned.already_assigned.len() + assigned.missing.len(),
                    created.customer_ids.len(),
                    assigned.already_assigned.join(", "),
                    assigned.missing.join(", ")
                ))
                .to_string();
                warn!(phase = ?Phase::AssignFailed, reason = %reason, "assign phase incomplete");
                return AssignmentOutcome::AssignFailed { created, reason };
            }
            info!(
                phase = ?Phase::Completed,
                modified = assigned.modified_count,
                "assignment completed"
            );
            AssignmentOutcome::Completed { created, assigned }
        }
        Err(e) => {
            let reason = RecoveryError::Assignment(e.to_string()).to_string();
            warn!(phase = ?Phase::AssignFailed, reason = %reason, "assign phase rejected");
            AssignmentOutcome::AssignFailed { created, reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::model::Role;
    use crate::owners::create_owner;
    use crate::upsert::{FailedEntry, FailureKind};

    #[derive(Default)]
    struct FakeService {
        fail_create_for: Option<String>,
        reject_assign: bool,
        held_elsewhere: Vec<String>,
        upsert_calls: usize,
        assign_calls: Vec<(String, Vec<String>)>,
    }

    impl RecordService for FakeService {
        fn bulk_upsert(&mut self, batch: &[CustomerDraft]) -> Result<BulkOutcome> {
            self.upsert_calls += 1;
            let mut out = BulkOutcome::default();
            for (i, d) in batch.iter().enumerate() {
                if self.fail_create_for.as_deref() == Some(d.account_number.as_str()) {
                    out.failed_entries.push(FailedEntry {
                        customer: serde_json::to_value(d).unwrap(),
                        index: i,
                        reason: "Duplicate entry".into(),
                        kind: FailureKind::Duplicate,
                    });
                } else {
                    out.customer_ids.push(d.effective_record_id());
                    out.inserted_count += 1;
                }
            }
            Ok(out)
        }

        fn assign_ids(&mut self, owner_id: &str, ids: &[String]) -> Result<AssignSummary> {
            self.assign_calls.push((owner_id.to_string(), ids.to_vec()));
            if self.reject_assign {
                return Err(RecoveryError::NotFound("owner not found".into()));
            }
            let (held, free): (Vec<String>, Vec<String>) = ids
                .iter()
                .cloned()
                .partition(|id| self.held_elsewhere.contains(id));
            Ok(AssignSummary {
                modified_count: free.len(),
                already_assigned: held,
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        refreshes: usize,
    }

    impl RefreshObserver for CountingObserver {
        fn assignments_changed(&mut self) {
            self.refreshes += 1;
        }
    }

    fn staged() -> Vec<CustomerDraft> {
        [("C1", "A1", "Main"), ("C2", "A2", "Main"), ("C3", "A3", "North")]
            .iter()
            .map(|(r, a, b)| CustomerDraft {
                record_id: r.to_string(),
                account_number: a.to_string(),
                branch: b.to_string(),
                customer_name: format!("Customer {}", r),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn create_failure_never_invokes_assign() {
        let mut svc = FakeService {
            fail_create_for: Some("A2".into()),
            ..Default::default()
        };
        let mut obs = CountingObserver::default();
        let out = run(
            &mut svc,
            &mut obs,
            &staged(),
            &Selection::Branch("Main".into()),
            "u1",
        )
        .unwrap();
        assert_eq!(out.phase(), Phase::PartialCreateFailure);
        assert_eq!(svc.upsert_calls, 1);
        assert_eq!(svc.assign_calls.len(), 0);
        assert_eq!(obs.refreshes, 0);
    }

    #[test]
    fn completed_run_assigns_exactly_the_created_ids_and_refreshes() {
        let mut svc = FakeService::default();
        let mut obs = CountingObserver::default();
        let selection = Selection::Accounts(vec!["A3".into(), "A1".into()]);
        let out = run(&mut svc, &mut obs, &staged(), &selection, "u1").unwrap();
        assert_eq!(out.phase(), Phase::Completed);
        assert_eq!(
            svc.assign_calls,
            vec![("u1".to_string(), vec!["C1".to_string(), "C3".to_string()])]
        );
        assert_eq!(obs.refreshes, 1);
    }

    #[test]
    fn assign_rejection_is_distinct_and_keeps_created_ids() {
        let mut svc = FakeService {
            reject_assign: true,
            ..Default::default()
        };
        let mut obs = CountingObserver::default();
        let out = run(
            &mut svc,
            &mut obs,
            &staged(),
            &Selection::Branch("North".into()),
            "ghost",
        )
        .unwrap();
        match out {
            AssignmentOutcome::AssignFailed { created, reason } => {
                assert_eq!(created.customer_ids, vec!["C3"]);
                assert!(reason.starts_with("assignment rejected"));
            }
            other => panic!("unexpected outcome {:?}", other.phase()),
        }
        assert_eq!(obs.refreshes, 0);

        svc.reject_assign = false;
        let retried = retry_assign(&mut svc, &mut obs, vec!["C3".into()], "u1").unwrap();
        assert_eq!(retried.phase(), Phase::Completed);
        assert_eq!(svc.upsert_calls, 1);
    }

    #[test]
    fn records_bound_elsewhere_keep_the_run_from_completing() {
        let mut svc = FakeService {
            held_elsewhere: vec!["C2".into()],
            ..Default::default()
        };
        let mut obs = CountingObserver::default();
        let out = run(
            &mut svc,
            &mut obs,
            &staged(),
            &Selection::Branch("Main".into()),
            "u1",
        )
        .unwrap();
        match out {
            AssignmentOutcome::AssignFailed { created, reason } => {
                assert_eq!(created.customer_ids, vec!["C1", "C2"]);
                assert!(reason.contains("already assigned: [C2]"));
            }
            other => panic!("unexpected outcome {:?}", other.phase()),
        }
        // C1 did change owner, so cached views still have to go.
        assert_eq!(obs.refreshes, 1);
    }

    #[test]
    fn staging_errors_are_returned() {
        let mut svc = FakeService::default();
        let mut obs = CountingObserver::default();
        let e = run(
            &mut svc,
            &mut obs,
            &staged(),
            &Selection::Branch("Nowhere".into()),
            "u1",
        )
        .unwrap_err();
        assert_eq!(e.to_string(), "No customers selected");
        assert!(run(&mut svc, &mut obs, &staged(), &Selection::Branch("Main".into()), " ").is_err());
        assert_eq!(svc.upsert_calls, 0);
    }

    #[test]
    fn local_service_runs_both_phases_against_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let owner = create_owner(&conn, "agent", Role::User, "Main").unwrap();
        let mut obs = CountingObserver::default();
        let mut svc = LocalService::new(&conn);
        let out = run(
            &mut svc,
            &mut obs,
            &staged(),
            &Selection::Branch("Main".into()),
            &owner.owner_id,
        )
        .unwrap();
        assert_eq!(out.phase(), Phase::Completed);
        let held: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM customers WHERE assigned_owner_id = ?",
                [&owner.owner_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(held, 2);
    }
}
