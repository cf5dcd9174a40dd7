use anyhow::Result;
use chrono::{DateTime, Utc};
use persistence_models::{PersistenceAction, GROUP, VERSION};
use persistence_operator::names::STATUS_RESOURCE;
use reqwest::StatusCode;

use crate::config::Config;

pub async fn run_status(config: &Config, namespace: &str, name: &str, output: &str) -> Result<()> {
    let url = format!(
        "{}/apis/{}/{}/namespaces/{}/{}/{}/status",
        config.api_url.trim_end_matches('/'),
        GROUP,
        VERSION,
        namespace,
        STATUS_RESOURCE,
        name
    );

    let response = reqwest::get(&url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to API: {}", e))?;

    if response.status() == StatusCode::NOT_FOUND {
        anyhow::bail!("PersistenceAction '{}/{}' not found", namespace, name);
    }

    if !response.status().is_success() {
        anyhow::bail!("API error: {}", response.status());
    }

    if output == "json" {
        let action: serde_json::Value = response.json().await?;
        println!("{}", serde_json::to_string_pretty(&action)?);
    } else {
        let action: PersistenceAction = response.json().await?;
        println!("{}", describe(&action));
    }

    Ok(())
}

fn describe(action: &PersistenceAction) -> String {
    let status = action.status.clone().unwrap_or_default();
    let time = |time: Option<DateTime<Utc>>| {
        time.map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    };

    let mut lines = vec![
        format!(
            "PersistenceAction: {}/{}",
            action.metadata.namespace.as_deref().unwrap_or("-"),
            action.metadata.name.as_deref().unwrap_or("-")
        ),
        "=".repeat(60),
        String::new(),
        "Status:".to_string(),
        format!("  Applied:            {}", status.applied),
        format!("  Execution Time:     {}", time(status.execution_time)),
        format!("  Completion Time:    {}", time(status.completion_time)),
        String::new(),
        "Schedule:".to_string(),
        format!("  Application Time:   {}", time(action.spec.application_time)),
        String::new(),
        "Actions:".to_string(),
    ];
    for (name, statement) in &action.spec.actions {
        lines.push(format!("  {:<20} {}", name, statement));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use persistence_models::{PersistenceActionSpec, PersistenceActionStatus};
    use std::collections::BTreeMap;

    #[test]
    fn test_describe() {
        let mut action = PersistenceAction::new(
            "vacuum",
            PersistenceActionSpec {
                actions: BTreeMap::from([("01-vacuum".to_string(), "VACUUM".to_string())]),
                ..Default::default()
            },
        );
        action.metadata.namespace = Some("db".to_string());
        action.status = Some(PersistenceActionStatus {
            applied: true,
            execution_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap()),
            completion_time: None,
        });

        let text = describe(&action);
        assert!(text.starts_with("PersistenceAction: db/vacuum"));
        assert!(text.contains("Applied:            true"));
        assert!(text.contains("2024-05-01T02:00:00+00:00"));
        assert!(text.contains("Completion Time:    -"));
        assert!(text.contains("01-vacuum"));
    }
}
