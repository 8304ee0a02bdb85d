//! Key namespace. Every persisted record lives under one of these
//! prefixes; nothing else writes to the backend.

use chrono::NaiveDate;
use uuid::Uuid;

pub fn conv(id: Uuid) -> String {
    format!("conv:{id}")
}

pub fn turn(conv_id: Uuid, seq: u32) -> String {
    format!("turn:{conv_id}:{seq}")
}

pub fn turnlist(conv_id: Uuid) -> String {
    format!("turnlist:{conv_id}")
}

pub fn cost_daily(date: NaiveDate) -> String {
    format!("cost:daily:{}", date.format("%Y-%m-%d"))
}

pub fn cost_conv(conv_id: Uuid) -> String {
    format!("cost:conv:{conv_id}")
}

/// Per-conversation cost record detail (append-only list).
pub fn cost_records(conv_id: Uuid) -> String {
    format!("cost:records:{conv_id}")
}

pub fn approval(id: Uuid) -> String {
    format!("approval:{id}")
}

/// Circuit breaker alert history (append-only list).
pub fn circuit_alerts() -> String {
    "alert:circuit".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        let id = Uuid::nil();
        assert_eq!(conv(id), "conv:00000000-0000-0000-0000-000000000000");
        assert_eq!(turn(id, 3), "turn:00000000-0000-0000-0000-000000000000:3");
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert_eq!(cost_daily(date), "cost:daily:2025-08-01");
    }
}
