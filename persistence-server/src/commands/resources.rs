use anyhow::{Context, Result};
use kube::api::ListParams;
use kube::ResourceExt;
use persistence_models::{PersistenceAction, PersistenceInstance};
use persistence_operator::bootstrap::persistence_kinds;
use persistence_operator::k8s_client::{get_k8s_client, PersistenceActions, PersistenceInstances};

use crate::config::Config;

/// Print every custom resource definition as a multi-document YAML stream
pub fn print_crds() -> Result<()> {
    for kind in persistence_kinds() {
        let yaml = serde_yaml::to_string(&kind.definition)
            .with_context(|| format!("Failed to encode {}", kind.name()))?;
        println!("---");
        print!("{}", yaml);
    }
    Ok(())
}

pub async fn list_actions(config: &Config, namespace: Option<String>, output: &str) -> Result<()> {
    let client = get_k8s_client(config.apiserver.as_deref(), config.tls_insecure).await?;
    let api = match &namespace {
        Some(namespace) => PersistenceActions::namespaced(client, namespace),
        None => PersistenceActions::all(client),
    };
    let listing = api
        .list(&ListParams::default())
        .await
        .context("Failed to list PersistenceActions")?;

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&listing.items)?);
    } else {
        println!("{}", action_table(&listing.items));
    }
    Ok(())
}

pub async fn list_instances(config: &Config, namespace: Option<String>, output: &str) -> Result<()> {
    let client = get_k8s_client(config.apiserver.as_deref(), config.tls_insecure).await?;
    let api = match &namespace {
        Some(namespace) => PersistenceInstances::namespaced(client, namespace),
        None => PersistenceInstances::all(client),
    };
    let listing = api
        .list(&ListParams::default())
        .await
        .context("Failed to list PersistenceInstances")?;

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&listing.items)?);
    } else {
        println!("{}", instance_table(&listing.items));
    }
    Ok(())
}

fn action_table(actions: &[PersistenceAction]) -> String {
    let mut lines = vec![
        format!(
            "{:<15} {:<25} {:<8} {:<22} {}",
            "NAMESPACE", "NAME", "APPLIED", "APPLICATION TIME", "ACTIONS"
        ),
        "-".repeat(80),
    ];
    for action in actions {
        let application_time = action
            .spec
            .application_time
            .map(|time| time.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{:<15} {:<25} {:<8} {:<22} {}",
            action.namespace().unwrap_or_default(),
            action.name_any(),
            action.spec.applied,
            application_time,
            action.spec.actions.len()
        ));
    }
    lines.push(String::new());
    lines.push(format!("{} action(s) found", actions.len()));
    lines.join("\n")
}

fn instance_table(instances: &[PersistenceInstance]) -> String {
    let mut lines = vec![
        format!(
            "{:<15} {:<25} {:<10} {}",
            "NAMESPACE", "NAME", "TYPE", "ENDPOINT"
        ),
        "-".repeat(80),
    ];
    for instance in instances {
        lines.push(format!(
            "{:<15} {:<25} {:<10} {}:{}",
            instance.namespace().unwrap_or_default(),
            instance.name_any(),
            instance.spec.persistence_type,
            instance.spec.url,
            instance.spec.port
        ));
    }
    lines.push(String::new());
    lines.push(format!("{} instance(s) found", instances.len()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use persistence_models::{PersistenceActionSpec, PersistenceInstanceSpec, PersistenceKind};

    #[test]
    fn test_action_table() {
        let mut action = PersistenceAction::new(
            "vacuum",
            PersistenceActionSpec {
                application_time: Some(Utc.with_ymd_and_hms(2024, 3, 9, 4, 30, 0).unwrap()),
                ..Default::default()
            },
        );
        action.metadata.namespace = Some("db".to_string());

        let table = action_table(&[action]);
        let row = table.lines().nth(2).unwrap();
        assert!(row.starts_with("db "));
        assert!(row.contains("vacuum"));
        assert!(row.contains("2024-03-09 04:30 UTC"));
        assert!(table.ends_with("1 action(s) found"));
    }

    #[test]
    fn test_instance_table() {
        let instance = PersistenceInstance::new(
            "orders",
            PersistenceInstanceSpec {
                persistence_type: PersistenceKind::MySql,
                username_secret: None,
                password_secret: None,
                url: "orders.db.svc".to_string(),
                port: 3306,
            },
        );

        let table = instance_table(&[instance]);
        assert!(table.contains("MySQL"));
        assert!(table.contains("orders.db.svc:3306"));
    }
}
