use std::collections::{BTreeSet, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::error::{RecoveryError, Result};
use crate::model::CustomerDraft;

/// Keys of persisted records that already have an owner.
#[derive(Debug, Default, Clone)]
pub struct AssignedKeys {
    pub record_ids: HashSet<String>,
    pub account_numbers: HashSet<String>,
}

impl AssignedKeys {
    pub fn load(conn: &Connection) -> Result<AssignedKeys> {
        let mut stmt = conn.prepare(
            "SELECT record_id, account_number FROM customers WHERE assigned_owner_id IS NOT NULL",
        )?;
        let mut keys = AssignedKeys::default();
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        for row in rows {
            let (rid, acc) = row?;
            keys.record_ids.insert(rid);
            keys.account_numbers.insert(acc);
        }
        Ok(keys)
    }

    fn contains(&self, d: &CustomerDraft) -> bool {
        self.record_ids.contains(&d.effective_record_id())
            || self.account_numbers.contains(d.account_number.trim())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedView {
    pub customers: Vec<CustomerDraft>,
    pub branches: Vec<String>,
}

/// Keep only records whose id and account number are both free.
///
/// Advisory only: assignment re-checks ownership against the database.
pub fn filter_unassigned(records: &[CustomerDraft], assigned: &AssignedKeys) -> Result<UnassignedView> {
    let mut customers = Vec::with_capacity(records.len());
    for (i, d) in records.iter().enumerate() {
        if d.record_id.trim().is_empty() && d.account_number.trim().is_empty() {
            return Err(RecoveryError::validation(format!(
                "row {} has neither a customer id nor an account number",
                i + 1
            )));
        }
        if !assigned.contains(d) {
            customers.push(d.clone());
        }
    }

    let branches: BTreeSet<String> = customers
        .iter()
        .map(|d| d.branch.trim())
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();

    Ok(UnassignedView {
        customers,
        branches: branches.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(rid: &str, acc: &str, branch: &str) -> CustomerDraft {
        CustomerDraft {
            record_id: rid.into(),
            account_number: acc.into(),
            branch: branch.into(),
            ..Default::default()
        }
    }

    fn keys(rids: &[&str], accs: &[&str]) -> AssignedKeys {
        AssignedKeys {
            record_ids: rids.iter().map(|s| s.to_string()).collect(),
            account_numbers: accs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_assigned_set_keeps_everything() {
        let rows = vec![d("C1", "A1", "Main"), d("C2", "A2", "North"), d("C3", "A3", "")];
        let view = filter_unassigned(&rows, &AssignedKeys::default()).unwrap();
        assert_eq!(view.customers, rows);
        assert_eq!(view.branches, vec!["Main", "North"]);
    }

    #[test]
    fn either_key_excludes() {
        let rows = vec![d("C1", "A1", "Main"), d("C2", "A2", "North"), d("C3", "A3", "South")];
        let view = filter_unassigned(&rows, &keys(&["C1"], &["A3"])).unwrap();
        let ids: Vec<&str> = view.customers.iter().map(|c| c.record_id.as_str()).collect();
        assert_eq!(ids, vec!["C2"]);
        assert_eq!(view.branches, vec!["North"]);
    }

    #[test]
    fn result_is_a_subset_in_input_order() {
        let rows: Vec<CustomerDraft> = (0..20)
            .map(|i| d(&format!("C{}", i), &format!("A{}", i), "B"))
            .collect();
        let assigned = keys(&["C3", "C7"], &["A11", "A19"]);
        let view = filter_unassigned(&rows, &assigned).unwrap();
        assert_eq!(view.customers.len(), 16);
        let mut last = None;
        for c in &view.customers {
            let pos = rows.iter().position(|r| r == c).expect("subset");
            assert!(last.map_or(true, |l| pos > l));
            last = Some(pos);
        }
    }

    #[test]
    fn generated_record_id_is_matched() {
        let rows = vec![d("", "A9", "Main")];
        let view = filter_unassigned(&rows, &keys(&["CUST-A9"], &[])).unwrap();
        assert!(view.customers.is_empty());
    }

    #[test]
    fn keyless_row_fails_fast() {
        let rows = vec![d("C1", "A1", "Main"), d("", " ", "Main")];
        let e = filter_unassigned(&rows, &AssignedKeys::default()).unwrap_err();
        assert!(e.to_string().contains("row 2"));
    }
}
