//! Cluster credentials
//!
//! Endpoint and CA come from EKS `DescribeCluster`; the bearer token comes
//! from `aws eks get-token`, the same credential plugin kubectl uses.

use super::error::{ClusterError, ClusterResult};
use async_trait::async_trait;
use aws_sdk_eks::error::DisplayErrorContext;
use serde::Deserialize;
use tokio::process::Command;

/// Network endpoint and root of trust of a cluster's API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    pub endpoint: String,
    /// Base64-encoded PEM bundle, as EKS returns it
    pub certificate_authority_data: String,
}

/// Resolves a cluster id to its API endpoint
#[async_trait]
pub trait ClusterDescriber: Send + Sync {
    async fn describe(&self, cluster: &str) -> ClusterResult<ClusterEndpoint>;
}

/// Issues short-lived bearer tokens for a cluster
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, cluster: &str) -> ClusterResult<String>;
}

/// `DescribeCluster` lookups through the EKS API
#[derive(Clone, Debug)]
pub struct EksClusterDescriber {
    eks: aws_sdk_eks::Client,
}

impl EksClusterDescriber {
    pub fn new(eks: aws_sdk_eks::Client) -> Self {
        Self { eks }
    }

    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_eks::Client::new(config))
    }
}

#[async_trait]
impl ClusterDescriber for EksClusterDescriber {
    async fn describe(&self, cluster: &str) -> ClusterResult<ClusterEndpoint> {
        let output = self
            .eks
            .describe_cluster()
            .name(cluster)
            .send()
            .await
            .map_err(|e| ClusterError::connect(cluster, DisplayErrorContext(&e)))?;

        let details = output
            .cluster()
            .ok_or_else(|| ClusterError::connect(cluster, "DescribeCluster returned no cluster"))?;

        let endpoint = details
            .endpoint()
            .ok_or_else(|| ClusterError::connect(cluster, "cluster has no endpoint yet"))?;

        let certificate_authority_data = details
            .certificate_authority()
            .and_then(|ca| ca.data())
            .ok_or_else(|| ClusterError::connect(cluster, "cluster has no certificate authority data"))?;

        Ok(ClusterEndpoint {
            endpoint: endpoint.to_string(),
            certificate_authority_data: certificate_authority_data.to_string(),
        })
    }
}

/// Token issuance by running the AWS CLI
#[derive(Clone, Debug)]
pub struct AwsCliTokenIssuer {
    command: String,
    region: Option<String>,
    profile: Option<String>,
}

impl AwsCliTokenIssuer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            region: None,
            profile: None,
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    fn args(&self, cluster: &str) -> Vec<String> {
        let mut args = vec![
            "eks".to_string(),
            "get-token".to_string(),
            "--cluster-name".to_string(),
            cluster.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];

        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }

        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }

        args
    }
}

#[async_trait]
impl TokenIssuer for AwsCliTokenIssuer {
    async fn issue_token(&self, cluster: &str) -> ClusterResult<String> {
        let output = Command::new(&self.command)
            .args(self.args(cluster))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClusterError::connect(cluster, format!("Failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::connect(
                cluster,
                format!("{} eks get-token failed: {}", self.command, stderr.trim()),
            ));
        }

        parse_token_output(&output.stdout).map_err(|e| ClusterError::connect(cluster, e))
    }
}

#[derive(Deserialize)]
struct ExecCredential {
    status: ExecCredentialStatus,
}

#[derive(Deserialize)]
struct ExecCredentialStatus {
    token: String,
}

/// Extract `status.token` from an ExecCredential document
pub fn parse_token_output(stdout: &[u8]) -> Result<String, String> {
    let credential: ExecCredential = serde_json::from_slice(stdout)
        .map_err(|e| format!("Failed to parse get-token output: {}", e))?;

    if credential.status.token.is_empty() {
        return Err("get-token returned an empty token".to_string());
    }

    Ok(credential.status.token)
}
