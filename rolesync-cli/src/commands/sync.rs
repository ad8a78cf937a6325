//! Role mapping sync
//!
//! Builds the AWS-backed collaborators, prints the plan and, with `--update`,
//! writes every cluster and prints the per-cluster report.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use colored::Colorize;
use rolesync_core::kubernetes::{AwsCliTokenIssuer, EksClusterDescriber};
use rolesync_core::{
    ClusterApplyStatus, EksClusterAuthClient, IamRoleDiscovery, MappingPlan, ReconcileReport,
    ReconcileSettings, Reconciler, RolesyncConfig, RunStatus,
};
use std::sync::Arc;
use tabled::Tabled;
use tracing::debug;

#[derive(Tabled)]
struct MappingRow {
    cluster: String,
    role_arn: String,
    username: String,
    groups: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    cluster: String,
    mappings: usize,
    status: String,
}

fn mapping_rows(plan: &MappingPlan) -> Vec<MappingRow> {
    plan.clusters
        .values()
        .flat_map(|set| {
            set.canonical().into_iter().map(move |mapping| MappingRow {
                cluster: set.cluster.clone(),
                role_arn: mapping.role_arn,
                username: mapping.username,
                groups: mapping.groups.join(","),
            })
        })
        .collect()
}

fn outcome_rows(report: &ReconcileReport) -> Vec<OutcomeRow> {
    report
        .clusters
        .iter()
        .map(|outcome| OutcomeRow {
            cluster: outcome.cluster.clone(),
            mappings: outcome.mappings,
            status: match &outcome.status {
                ClusterApplyStatus::Failed { .. } => outcome.status.to_string().red().to_string(),
                ClusterApplyStatus::Unchanged => outcome.status.to_string().dimmed().to_string(),
                _ => outcome.status.to_string().green().to_string(),
            },
        })
        .collect()
}

pub async fn handle_sync_command(
    config: &RolesyncConfig,
    update: bool,
    format: OutputFormat,
) -> Result<RunStatus> {
    let sdk_config = config.aws.load_sdk_config().await;
    debug!(region = ?sdk_config.region(), update, "Loaded AWS configuration");

    let discovery = IamRoleDiscovery::from_sdk_config(&sdk_config, config.discovery.max_tags);
    let describer = EksClusterDescriber::from_sdk_config(&sdk_config);
    let tokens = AwsCliTokenIssuer::new(config.aws.cli_command.clone())
        .with_region(config.aws.region.clone())
        .with_profile(config.aws.profile.clone());
    let clusters = EksClusterAuthClient::new(Arc::new(describer), Arc::new(tokens));

    let reconciler = Reconciler::new(
        Arc::new(discovery),
        Arc::new(clusters),
        ReconcileSettings::from(config),
    );

    let plan = match reconciler.plan().await {
        Ok(plan) => plan,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(RunStatus::failed(&e));
        }
    };

    if !output::print_structured(&plan, format)? {
        println!("EKS account: {}", plan.account_id.bold());
        println!(
            "Role mappings: {} across {} cluster(s) from {} role(s)",
            plan.mapping_count(),
            plan.clusters.len(),
            plan.role_count
        );
        output::print_table(mapping_rows(&plan));
    }

    if !update {
        output::print_info("Skipping update (pass --update to write aws-auth)");
        return Ok(RunStatus::Done);
    }

    let report = reconciler.apply(&plan).await;
    if !output::print_structured(&report, format)? {
        output::print_table(outcome_rows(&report));
    }

    let status = report.status();
    match &status {
        RunStatus::Done => output::print_success(&format!(
            "aws-auth up to date on {} cluster(s)",
            report.clusters.len()
        )),
        RunStatus::PartialFailure { failed } => output::print_warning(&format!(
            "aws-auth update failed on: {}",
            failed.join(", ")
        )),
        RunStatus::Failed { error } => output::print_error(error),
    }

    Ok(status)
}
