//! Print history, shop earnings and the customer expense tracker.

use crate::models::{PrintJob, PrintType};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;

/// One completed print as recorded by the shop
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: PrintType,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub copies: u32,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
}

/// Earnings summary for the shop desk
#[derive(Debug, Clone, PartialEq)]
pub struct ShopStats {
    pub total_earnings: f64,
    pub today_earnings: f64,
    pub total_prints: usize,
}

impl ShopStats {
    /// Summarise `entries`; "today" is the given local calendar day
    pub fn from_entries(entries: &[HistoryEntry], today: NaiveDate) -> Self {
        let total_earnings = entries.iter().map(|e| e.cost).sum();
        let today_earnings = entries
            .iter()
            .filter(|e| e.date.with_timezone(&Local).date_naive() == today)
            .map(|e| e.cost)
            .sum();

        Self {
            total_earnings,
            today_earnings,
            total_prints: entries.len(),
        }
    }
}

/// Most recent entries, as the server ordered them
pub fn recent(entries: &[HistoryEntry], n: usize) -> &[HistoryEntry] {
    &entries[..entries.len().min(n)]
}

/// Customer spending split by whether the shop has printed the job yet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expenses {
    pub spent: f64,
    pub pending: f64,
    pub printed_jobs: usize,
    pub pending_jobs: usize,
}

impl Expenses {
    pub fn from_jobs(jobs: &[PrintJob]) -> Self {
        let mut expenses = Self::default();
        for job in jobs {
            if job.status.is_terminal() {
                expenses.spent += job.total_cost;
                expenses.printed_jobs += 1;
            } else {
                expenses.pending += job.total_cost;
                expenses.pending_jobs += 1;
            }
        }
        expenses
    }
}

pub fn format_rupees(amount: f64) -> String {
    format!("₹{:.2}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn entry(date: DateTime<Utc>, cost: f64) -> HistoryEntry {
        HistoryEntry {
            date,
            kind: PrintType::Private,
            cost,
            pages: 3,
            copies: 1,
            code: Some("AB12CD".to_string()),
        }
    }

    #[test]
    fn test_history_entry_decodes() {
        let e: HistoryEntry = serde_json::from_value(json!({
            "date": "2026-03-01T10:15:00Z",
            "type": "queue",
            "cost": 12.5,
            "pages": 5,
            "copies": 2,
            "code": null
        }))
        .unwrap();
        assert_eq!(e.kind, PrintType::Queue);
        assert_eq!(e.pages, 5);
        assert!(e.code.is_none());
    }

    #[test]
    fn test_stats_split_today() {
        let now = Utc::now();
        let long_ago = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap();
        let entries = vec![entry(now, 10.0), entry(long_ago, 4.0), entry(now, 2.5)];

        let today = now.with_timezone(&Local).date_naive();
        let stats = ShopStats::from_entries(&entries, today);
        assert_eq!(stats.total_prints, 3);
        assert!((stats.total_earnings - 16.5).abs() < 1e-9);
        assert!((stats.today_earnings - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_recent_caps_length() {
        let now = Utc::now();
        let entries: Vec<_> = (0..8).map(|i| entry(now, i as f64)).collect();
        assert_eq!(recent(&entries, 5).len(), 5);
        assert_eq!(recent(&entries[..2], 5).len(), 2);
    }

    #[test]
    fn test_expenses_split_by_status() {
        let jobs: Vec<PrintJob> = serde_json::from_value(json!([
            { "id": 1, "print_type": "private", "code": "AAAAAA", "total_cost": 6.0, "status": "downloaded" },
            { "id": 2, "print_type": "private", "code": "BBBBBB", "total_cost": 4.0, "status": "uploaded" },
            { "id": 3, "print_type": "queue", "shop_id": 5, "queue_position": 1, "total_cost": 3.0, "status": "pending" }
        ]))
        .unwrap();
        let expenses = Expenses::from_jobs(&jobs);
        assert_eq!(expenses.spent, 6.0);
        assert_eq!(expenses.pending, 7.0);
        assert_eq!(expenses.printed_jobs, 1);
        assert_eq!(expenses.pending_jobs, 2);
    }

    #[test]
    fn test_format_rupees() {
        assert_eq!(format_rupees(6.0), "₹6.00");
        assert_eq!(format_rupees(12.5), "₹12.50");
    }
}
