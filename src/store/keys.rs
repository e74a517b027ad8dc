//! Object key layout, spec.md §4.1.

use chrono::{DateTime, Utc};

use crate::ids::{FileId, TaskId};

pub fn upload_key(owner_id: &str, created_at: DateTime<Utc>, file_id: FileId, filename: &str) -> String {
    format!(
        "uploads/{owner_id}/{}/{file_id}/{filename}",
        created_at.format("%Y-%m")
    )
}

pub fn result_key(owner_id: &str, task_id: TaskId, ext: &str) -> String {
    format!("results/{owner_id}/{task_id}/result.{ext}")
}

pub fn version_key(task_id: TaskId, version_number: i32) -> String {
    format!("versions/{task_id}/{version_number}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn upload_key_has_year_month_segment() {
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let key = upload_key("U1", at, FileId::new(), "invoice.pdf");
        assert!(key.starts_with("uploads/U1/2026-07/"));
        assert!(key.ends_with("/invoice.pdf"));
    }

    #[test]
    fn result_key_uses_task_id_and_extension() {
        let task = TaskId::new();
        let key = result_key("U1", task, "html");
        assert_eq!(key, format!("results/U1/{task}/result.html"));
    }
}
