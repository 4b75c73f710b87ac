//! Execution role and region resolution.

use crate::error::{TrainingError, TrainingResult};
use crate::process::{CommandRunner, CommandSpec};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Environment variable consulted when no role is configured.
pub const ROLE_ENV: &str = "SAGEDET_ROLE_ARN";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    #[serde(default)]
    pub user_id: String,
}

pub async fn caller_identity(runner: &dyn CommandRunner) -> TrainingResult<CallerIdentity> {
    let spec = CommandSpec::new("aws").args(["sts", "get-caller-identity", "--output", "json"]);
    let stdout = runner
        .run(&spec)
        .await
        .map_err(|e| TrainingError::Credentials(format!("failed to query caller identity: {e}")))?;
    Ok(serde_json::from_str(&stdout)?)
}

/// Resolves the role the training job runs as.
///
/// Order: configured ARN, then `SAGEDET_ROLE_ARN`, then the role behind the
/// current caller identity.
pub async fn resolve_execution_role(runner: &dyn CommandRunner, configured: Option<&str>) -> TrainingResult<String> {
    let from_env = std::env::var(ROLE_ENV).ok();
    resolve_role_with(runner, configured, from_env.as_deref()).await
}

async fn resolve_role_with(
    runner: &dyn CommandRunner,
    configured: Option<&str>,
    from_env: Option<&str>,
) -> TrainingResult<String> {
    if let Some(role) = configured.map(str::trim).filter(|r| !r.is_empty()) {
        debug!(role, "using configured execution role");
        return Ok(role.to_string());
    }
    if let Some(role) = from_env.map(str::trim).filter(|r| !r.is_empty()) {
        debug!(role, "using execution role from {ROLE_ENV}");
        return Ok(role.to_string());
    }

    let identity = caller_identity(runner).await?;
    match parse_caller_arn(&identity.arn) {
        Some(CallerArn::Role(arn)) => Ok(arn),
        Some(CallerArn::AssumedRole { partition, account, role_name }) => {
            let spec = CommandSpec::new("aws").args([
                "iam",
                "get-role",
                "--role-name",
                role_name.as_str(),
                "--query",
                "Role.Arn",
                "--output",
                "text",
            ]);
            match runner.run(&spec).await {
                Ok(arn) if !arn.trim().is_empty() => {
                    info!(role = arn.trim(), "resolved execution role from caller identity");
                    Ok(arn.trim().to_string())
                }
                Ok(_) | Err(_) => {
                    let arn = format!("arn:{partition}:iam::{account}:role/{role_name}");
                    warn!(role = %arn, "iam get-role unavailable, assuming role has no path");
                    Ok(arn)
                }
            }
        }
        None => Err(TrainingError::Credentials(format!(
            "caller identity `{}` is not a role; set aws.role_arn or {ROLE_ENV}",
            identity.arn
        ))),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CallerArn {
    Role(String),
    AssumedRole { partition: String, account: String, role_name: String },
}

fn parse_caller_arn(arn: &str) -> Option<CallerArn> {
    // arn:<partition>:<service>::<account>:<resource>
    let mut parts = arn.splitn(6, ':');
    let (_, partition, service, _, account, resource) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?, parts.next()?, parts.next()?);

    match service {
        "iam" if resource.starts_with("role/") => Some(CallerArn::Role(arn.to_string())),
        "sts" => {
            let rest = resource.strip_prefix("assumed-role/")?;
            let role_name = rest.split('/').next().filter(|n| !n.is_empty())?;
            Some(CallerArn::AssumedRole {
                partition: partition.to_string(),
                account: account.to_string(),
                role_name: role_name.to_string(),
            })
        }
        _ => None,
    }
}

/// Resolves the region: configured, then `AWS_REGION`/`AWS_DEFAULT_REGION`, then the CLI profile.
pub async fn resolve_region(runner: &dyn CommandRunner, configured: Option<&str>) -> TrainingResult<String> {
    if let Some(region) = configured.map(str::trim).filter(|r| !r.is_empty()) {
        return Ok(region.to_string());
    }
    for var in ["AWS_REGION", "AWS_DEFAULT_REGION"] {
        if let Ok(region) = std::env::var(var) {
            if !region.trim().is_empty() {
                return Ok(region.trim().to_string());
            }
        }
    }

    let spec = CommandSpec::new("aws").args(["configure", "get", "region"]);
    let region = runner
        .run(&spec)
        .await
        .map_err(|e| TrainingError::Credentials(format!("no region configured: {e}")))?;
    let region = region.trim();
    if region.is_empty() {
        return Err(TrainingError::Credentials("no region configured".to_string()));
    }
    Ok(region.to_string())
}
