use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};

/// Tolerance used when flagging outstanding != principal + interest.
const BALANCE_EPSILON: f64 = 0.01;

/// Candidate customer as produced by the sheet normalizer or sent to
/// `customers.bulkUpsert`. Only canonical camelCase names are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CustomerDraft {
    pub record_id: String,
    pub account_number: String,
    pub sr_no: String,
    pub branch: String,
    pub customer_name: String,
    pub product_type: String,
    pub scheme_code: String,
    pub sanction_limit: f64,
    pub date_of_npa: String,
    pub outstanding_balance: f64,
    pub principal_overdue: f64,
    pub interest_overdue: f64,
    pub net_balance: f64,
    pub provision: String,
    pub asset_classification: String,
    pub contact_no: String,
    pub address: String,
}

impl CustomerDraft {
    /// Record id to persist under: the given one, or `CUST-<accountNumber>`.
    pub fn effective_record_id(&self) -> String {
        let rid = self.record_id.trim();
        if rid.is_empty() {
            format!("CUST-{}", self.account_number.trim())
        } else {
            rid.to_string()
        }
    }

    /// Full field validation applied before a draft is persisted.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.account_number.trim().is_empty() {
            missing.push("accountNumber");
        }
        if self.customer_name.trim().is_empty() {
            missing.push("customerName");
        }
        if self.branch.trim().is_empty() {
            missing.push("branch");
        }
        if !missing.is_empty() {
            return Err(RecoveryError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        for (name, v) in [
            ("sanctionLimit", self.sanction_limit),
            ("outstandingBalance", self.outstanding_balance),
            ("principalOverdue", self.principal_overdue),
            ("interestOverdue", self.interest_overdue),
            ("netBalance", self.net_balance),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(RecoveryError::validation(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }

        let date = self.date_of_npa.trim();
        if !date.is_empty() && chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(RecoveryError::validation(format!(
                "dateOfNpa must be YYYY-MM-DD, got {:?}",
                date
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub captured_at: String,
    pub captured_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub record_id: String,
    pub account_number: String,
    pub sr_no: String,
    pub branch: String,
    pub customer_name: String,
    pub product_type: String,
    pub scheme_code: String,
    pub sanction_limit: f64,
    pub date_of_npa: Option<String>,
    pub outstanding_balance: f64,
    pub principal_overdue: f64,
    pub interest_overdue: f64,
    pub net_balance: f64,
    pub provision: String,
    pub asset_classification: String,
    pub contact_no: String,
    pub address: String,
    pub assigned_owner_id: Option<String>,
    pub is_recovered: bool,
    pub recovery_date: Option<String>,
    pub recovered_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_history: Option<Vec<GeoPoint>>,
}

impl CustomerRecord {
    /// Data-quality flag only; the relation is never enforced.
    pub fn balance_mismatch(&self) -> bool {
        (self.outstanding_balance - (self.principal_overdue + self.interest_overdue)).abs()
            > BALANCE_EPSILON
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(obj) = v.as_object_mut() {
            obj.insert(
                "balanceMismatch".into(),
                serde_json::Value::Bool(self.balance_mismatch()),
            );
        }
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub owner_id: String,
    pub username: String,
    pub role: Role,
    pub branch: String,
}

/// Caller identity attached to a request. Authentication happens outside
/// this process; the sidecar only applies role and branch gates.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub owner_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub branch: String,
}

impl Actor {
    /// Stand-in for requests without an actor: the local trusted caller.
    pub fn local_admin() -> Actor {
        Actor {
            owner_id: None,
            role: Role::Admin,
            branch: String::new(),
        }
    }

    pub fn require(&self, allowed: &[Role]) -> Result<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(RecoveryError::Unauthorized(format!(
                "role {} is not allowed to perform this action",
                self.role.as_str()
            )))
        }
    }

    /// Non-admins may only touch records of their own branch.
    pub fn require_branch(&self, branch: &str) -> Result<()> {
        if self.role == Role::Admin || self.branch == branch {
            Ok(())
        } else {
            Err(RecoveryError::Unauthorized(
                "not authorized for this customer's branch".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> CustomerDraft {
        CustomerDraft {
            account_number: "A1".into(),
            customer_name: "John Doe".into(),
            branch: "Main".into(),
            date_of_npa: "2024-01-15".into(),
            ..Default::default()
        }
    }

    #[test]
    fn record_id_falls_back_to_account_number() {
        let mut d = draft();
        assert_eq!(d.effective_record_id(), "CUST-A1");
        d.record_id = " C1 ".into();
        assert_eq!(d.effective_record_id(), "C1");
    }

    #[test]
    fn validate_reports_all_missing_required_fields() {
        let d = CustomerDraft::default();
        let e = d.validate().unwrap_err();
        assert_eq!(
            e.to_string(),
            "missing required fields: accountNumber, customerName, branch"
        );
    }

    #[test]
    fn validate_rejects_negative_amounts_and_bad_dates() {
        let mut d = draft();
        d.interest_overdue = -1.0;
        assert!(d.validate().unwrap_err().to_string().contains("interestOverdue"));

        let mut d = draft();
        d.date_of_npa = "15/01/2024".into();
        assert!(d.validate().unwrap_err().to_string().contains("dateOfNpa"));

        let mut d = draft();
        d.date_of_npa = String::new();
        assert!(d.validate().is_ok());
    }

    #[test]
    fn drafts_reject_non_canonical_field_names() {
        let r: std::result::Result<CustomerDraft, _> =
            serde_json::from_value(json!({ "ACC_NO": "A1" }));
        assert!(r.is_err());
        let d: CustomerDraft =
            serde_json::from_value(json!({ "accountNumber": "A1", "sanctionLimit": 5.5 }))
                .unwrap();
        assert_eq!(d.account_number, "A1");
        assert_eq!(d.sanction_limit, 5.5);
    }

    #[test]
    fn actor_gates() {
        let manager = Actor {
            owner_id: Some("m1".into()),
            role: Role::Manager,
            branch: "North".into(),
        };
        assert!(manager.require(&[Role::Admin, Role::Manager]).is_ok());
        assert!(manager.require(&[Role::Admin]).is_err());
        assert!(manager.require_branch("North").is_ok());
        assert!(manager.require_branch("South").is_err());
        assert!(Actor::local_admin().require_branch("South").is_ok());
    }
}
