//! CSV export of report rows to a directory on disk.

use async_trait::async_trait;
use coachline_core::{error::CoachlineError, shellexpand, traits::Exporter};
use std::path::PathBuf;
use tracing::info;

/// Writes one CSV file per export under `dir`.
pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    pub fn new(dir: &str) -> Self {
        Self {
            dir: PathBuf::from(shellexpand(dir)),
        }
    }
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn file_name(name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{clean}.csv")
}

/// Render headers and rows as CSV text.
pub fn to_csv(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = headers
        .iter()
        .map(|h| quote(h))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&row.iter().map(|f| quote(f)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    out
}

#[async_trait]
impl Exporter for CsvExporter {
    async fn export(
        &self,
        name: &str,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> Result<String, CoachlineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name(name));
        tokio::fs::write(&path, to_csv(headers, rows)).await?;
        info!("exported {} rows to {}", rows.len(), path.display());
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_csv_quotes_when_needed() {
        let csv = to_csv(
            &["date", "habit"],
            &[
                vec!["2024-03-01".into(), "Water, filtered".into()],
                vec!["2024-03-02".into(), "Say \"hi\"".into()],
            ],
        );
        assert_eq!(
            csv,
            "date,habit\n2024-03-01,\"Water, filtered\"\n2024-03-02,\"Say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn test_file_name_is_sanitized() {
        assert_eq!(file_name("monthly AB12C/2024-03"), "monthly_AB12C_2024-03.csv");
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let dir = std::env::temp_dir().join(format!("coachline-export-{}", uuid::Uuid::new_v4()));
        let exporter = CsvExporter::new(&dir.display().to_string());
        let path = exporter
            .export("report", &["a", "b"], &[vec!["1".into(), "2".into()]])
            .await
            .unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "a,b\n1,2\n");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
