//! Spreadsheet row normalization.
//!
//! Rows arrive as `label -> cell` maps, either from a JSON export of the
//! first worksheet or from a CSV file. A [`ColumnMap`] names the labels a
//! layout must carry and which canonical field each one feeds; it is the
//! only place where source column names are known.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{RecoveryError, Result};
use crate::model::CustomerDraft;

pub type RawRow = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SrNo,
    Branch,
    RecordId,
    AccountNumber,
    CustomerName,
    SchemeCode,
    ProductType,
    SanctionLimit,
    DateOfNpa,
    OutstandingBalance,
    PrincipalOverdue,
    InterestOverdue,
    NetBalance,
    Provision,
    Anomalies,
    AssetClassification,
    AssetTagging,
    ContactNo,
    Address,
}

#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub name: &'static str,
    /// Label of the sequence-number column used to spot header rows.
    pub sequence_label: &'static str,
    /// Literal text the sequence column carries on a header row.
    pub sequence_header: &'static str,
    pub columns: Vec<(&'static str, Field)>,
}

impl ColumnMap {
    /// Annexure-I export: one titled column, the rest unnamed.
    pub fn annexure() -> ColumnMap {
        ColumnMap {
            name: "annexure",
            sequence_label: "Annexure-I",
            sequence_header: "Sr No.",
            columns: vec![
                ("Annexure-I", Field::SrNo),
                ("__EMPTY", Field::Branch),
                ("__EMPTY_1", Field::RecordId),
                ("__EMPTY_2", Field::AccountNumber),
                ("__EMPTY_3", Field::CustomerName),
                ("__EMPTY_4", Field::SchemeCode),
                ("__EMPTY_5", Field::ProductType),
                ("__EMPTY_6", Field::SanctionLimit),
                ("__EMPTY_7", Field::DateOfNpa),
                ("__EMPTY_8", Field::OutstandingBalance),
                ("__EMPTY_9", Field::PrincipalOverdue),
                ("__EMPTY_10", Field::InterestOverdue),
                ("__EMPTY_11", Field::NetBalance),
                ("__EMPTY_12", Field::Provision),
                ("__EMPTY_13", Field::Anomalies),
                ("__EMPTY_14", Field::AssetClassification),
                ("__EMPTY_15", Field::AssetTagging),
                ("__EMPTY_16", Field::ContactNo),
                ("__EMPTY_17", Field::Address),
            ],
        }
    }

    /// Upper-snake-case template columns.
    pub fn canonical() -> ColumnMap {
        ColumnMap {
            name: "canonical",
            sequence_label: "SR_NO",
            sequence_header: "SR_NO",
            columns: vec![
                ("SR_NO", Field::SrNo),
                ("BRANCH", Field::Branch),
                ("CUST_ID", Field::RecordId),
                ("ACC_NO", Field::AccountNumber),
                ("CUSTOMER_NAME", Field::CustomerName),
                ("SCHEME_CODE", Field::SchemeCode),
                ("PRODUCT_TYPE", Field::ProductType),
                ("SANCTION_LIMIT", Field::SanctionLimit),
                ("DATE_OF_NPA", Field::DateOfNpa),
                ("OUTSTANDING_BALANCE", Field::OutstandingBalance),
                ("PRINCIPLE_OVERDUE", Field::PrincipalOverdue),
                ("INTEREST_OVERDUE", Field::InterestOverdue),
                ("NET_BALANCE", Field::NetBalance),
                ("PROVISION", Field::Provision),
                ("ANOMALIES", Field::Anomalies),
                ("ASSET_CLASSIFICATION", Field::AssetClassification),
                ("ASSET_TAGGING", Field::AssetTagging),
                ("CONTACT_NO", Field::ContactNo),
                ("ADDRESS", Field::Address),
            ],
        }
    }

    pub fn by_name(name: &str) -> Option<ColumnMap> {
        match name {
            "annexure" => Some(ColumnMap::annexure()),
            "canonical" => Some(ColumnMap::canonical()),
            _ => None,
        }
    }

    fn is_data_row(&self, row: &RawRow) -> bool {
        let Some(seq) = row.get(self.sequence_label) else {
            return false;
        };
        let seq = seq.trim();
        !seq.is_empty()
            && seq != self.sequence_header
            && seq.parse::<f64>().map(f64::is_finite).unwrap_or(false)
    }
}

/// Map raw rows to canonical drafts, dropping header/decoration rows.
pub fn normalize_rows(rows: &[RawRow], map: &ColumnMap) -> Result<Vec<CustomerDraft>> {
    let data_rows: Vec<&RawRow> = rows.iter().filter(|r| map.is_data_row(r)).collect();

    let first = data_rows
        .iter()
        .find(|r| r.values().any(|v| !v.trim().is_empty()))
        .ok_or_else(|| RecoveryError::validation("no data rows found in sheet"))?;

    let missing: Vec<&str> = map
        .columns
        .iter()
        .map(|(label, _)| *label)
        .filter(|label| !first.contains_key(*label))
        .collect();
    if !missing.is_empty() {
        return Err(RecoveryError::validation(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    Ok(data_rows.into_iter().map(|r| to_draft(r, map)).collect())
}

fn to_draft(row: &RawRow, map: &ColumnMap) -> CustomerDraft {
    let mut d = CustomerDraft::default();
    for (label, field) in &map.columns {
        let cell = row.get(*label).map(|s| s.trim()).unwrap_or("");
        match field {
            Field::SrNo => d.sr_no = cell.to_string(),
            Field::Branch => d.branch = cell.to_string(),
            Field::RecordId => d.record_id = cell.to_string(),
            Field::AccountNumber => d.account_number = cell.to_string(),
            Field::CustomerName => d.customer_name = cell.to_string(),
            Field::SchemeCode => d.scheme_code = cell.to_string(),
            Field::ProductType => d.product_type = cell.to_string(),
            Field::SanctionLimit => d.sanction_limit = parse_amount(cell),
            Field::DateOfNpa => d.date_of_npa = normalize_date(cell),
            Field::OutstandingBalance => d.outstanding_balance = parse_amount(cell),
            Field::PrincipalOverdue => d.principal_overdue = parse_amount(cell),
            Field::InterestOverdue => d.interest_overdue = parse_amount(cell),
            Field::NetBalance => d.net_balance = parse_amount(cell),
            Field::Provision => d.provision = cell.to_string(),
            Field::AssetClassification => d.asset_classification = cell.to_string(),
            Field::ContactNo => d.contact_no = cell.to_string(),
            Field::Address => d.address = cell.to_string(),
            // Carried by the sheet but not stored.
            Field::Anomalies | Field::AssetTagging => {}
        }
    }
    d
}

/// Amount cell to number; separators are stripped, garbage becomes 0.
pub fn parse_amount(cell: &str) -> f64 {
    let cleaned: String = cell
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}'))
        .collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Date cell to `YYYY-MM-DD`. Unrecognised text is returned unchanged so
/// validation can report it.
pub fn normalize_date(cell: &str) -> String {
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%y", "%m/%d/%Y"];
    let t = cell.trim();
    if t.is_empty() {
        return String::new();
    }
    // Timestamps like 2024-01-15T00:00:00.000Z keep only the date part.
    let head = t.split('T').next().unwrap_or(t);
    for fmt in FORMATS {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(head, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    t.to_string()
}

/// Convert JSON rows (objects of label -> scalar) into raw rows.
pub fn rows_from_json(value: &serde_json::Value) -> Result<Vec<RawRow>> {
    let Some(arr) = value.as_array() else {
        return Err(RecoveryError::validation("rows must be an array"));
    };
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(RecoveryError::validation(format!(
                "row at index {} must be an object",
                i
            )));
        };
        let row = obj
            .iter()
            .map(|(k, v)| {
                let cell = match v {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), cell)
            })
            .collect();
        out.push(row);
    }
    Ok(out)
}

/// Read a CSV export. Blank and repeated headers get the names a
/// sheet-to-JSON export would give them.
pub fn rows_from_csv(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = sheet_headers(reader.headers()?.iter());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn sheet_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.map(|h| {
        let base = if h.trim().is_empty() {
            "__EMPTY".to_string()
        } else {
            h.trim().to_string()
        };
        let n = seen.entry(base.clone()).or_insert(0);
        let name = if *n == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, n)
        };
        *n += 1;
        name
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canonical_row(seq: &str, cust: &str, acc: &str, branch: &str) -> RawRow {
        let mut r = RawRow::new();
        for (label, _) in ColumnMap::canonical().columns {
            r.insert(label.to_string(), String::new());
        }
        r.insert("SR_NO".into(), seq.into());
        r.insert("CUST_ID".into(), cust.into());
        r.insert("ACC_NO".into(), acc.into());
        r.insert("BRANCH".into(), branch.into());
        r.insert("CUSTOMER_NAME".into(), format!("Name {}", cust));
        r
    }

    #[test]
    fn header_and_decoration_rows_are_dropped() {
        let rows = vec![
            canonical_row("SR_NO", "CUST_ID", "ACC_NO", "BRANCH"),
            canonical_row("", "", "", ""),
            canonical_row("Total", "", "", ""),
            canonical_row("1", "C1", "A1", "Main"),
            canonical_row("2", "C2", "A2", "North"),
        ];
        let out = normalize_rows(&rows, &ColumnMap::canonical()).unwrap();
        let ids: Vec<&str> = out.iter().map(|d| d.record_id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "C2"]);
        assert_eq!(out[1].branch, "North");
    }

    #[test]
    fn non_finite_sequence_cells_are_not_data() {
        let rows = vec![
            canonical_row("NaN", "CX", "AX", "Main"),
            canonical_row("inf", "CY", "AY", "Main"),
            canonical_row("-Infinity", "CZ", "AZ", "Main"),
            canonical_row("3", "C3", "A3", "Main"),
        ];
        let out = normalize_rows(&rows, &ColumnMap::canonical()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record_id, "C3");
    }

    #[test]
    fn annexure_header_label_row_is_skipped() {
        let mut header = RawRow::new();
        let mut data = RawRow::new();
        for (label, _) in ColumnMap::annexure().columns {
            header.insert(label.to_string(), "x".into());
            data.insert(label.to_string(), String::new());
        }
        header.insert("Annexure-I".into(), "Sr No.".into());
        data.insert("Annexure-I".into(), "1".into());
        data.insert("__EMPTY_2".into(), "191467310000967".into());
        data.insert("__EMPTY_8".into(), "7,11,618.08".into());
        data.insert("__EMPTY_7".into(), "1/15/24".into());

        let out = normalize_rows(&[header, data], &ColumnMap::annexure()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].account_number, "191467310000967");
        assert_eq!(out[0].outstanding_balance, 711618.08);
        assert_eq!(out[0].date_of_npa, "2024-01-15");
    }

    #[test]
    fn missing_columns_are_named() {
        let mut row = canonical_row("1", "C1", "A1", "Main");
        row.remove("ADDRESS");
        row.remove("CONTACT_NO");
        let e = normalize_rows(&[row], &ColumnMap::canonical()).unwrap_err();
        assert_eq!(
            e.to_string(),
            "missing required columns: CONTACT_NO, ADDRESS"
        );
    }

    #[test]
    fn empty_sheet_is_a_validation_error() {
        let e = normalize_rows(&[], &ColumnMap::canonical()).unwrap_err();
        assert_eq!(e.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn blank_cells_default_to_empty_and_zero() {
        let mut row = canonical_row("1", "C1", "A1", "Main");
        row.insert("SANCTION_LIMIT".into(), "n/a".into());
        let out = normalize_rows(&[row], &ColumnMap::canonical()).unwrap();
        assert_eq!(out[0].sanction_limit, 0.0);
        assert_eq!(out[0].product_type, "");
        assert_eq!(out[0].date_of_npa, "");
    }

    #[test]
    fn dates_are_canonicalised_or_kept() {
        assert_eq!(normalize_date("2024-01-15"), "2024-01-15");
        assert_eq!(normalize_date("15-01-2024"), "2024-01-15");
        assert_eq!(normalize_date("15/01/2024"), "2024-01-15");
        assert_eq!(normalize_date("2024-01-15T00:00:00.000Z"), "2024-01-15");
        assert_eq!(normalize_date("someday"), "someday");
    }

    #[test]
    fn json_rows_accept_scalars() {
        let rows = rows_from_json(&json!([{ "SR_NO": 1, "ACC_NO": "A1", "X": null }])).unwrap();
        assert_eq!(rows[0]["SR_NO"], "1");
        assert_eq!(rows[0]["X"], "");
        assert!(rows_from_json(&json!({})).is_err());
        assert!(rows_from_json(&json!([1])).is_err());
    }

    #[test]
    fn csv_blank_headers_follow_sheet_export_naming() {
        let names = sheet_headers(["Annexure-I", "", "", " ", "A", "A"].into_iter());
        assert_eq!(
            names,
            vec!["Annexure-I", "__EMPTY", "__EMPTY_1", "__EMPTY_2", "A", "A_1"]
        );
    }

    #[test]
    fn csv_file_is_read_with_headers() {
        let path = std::env::temp_dir().join(format!("recoveryd-sheet-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, "SR_NO,ACC_NO\n1,A1\n2,A2\n").unwrap();
        let rows = rows_from_csv(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["ACC_NO"], "A2");
    }
}
