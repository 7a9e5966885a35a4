//! Structured error codes attached to extension errors and health conditions.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorCode {
    #[serde(rename = "ERR_INFRA_UNAUTHENTICATED")]
    InfraUnauthenticated,
    #[serde(rename = "ERR_INFRA_UNAUTHORIZED")]
    InfraUnauthorized,
    #[serde(rename = "ERR_INFRA_QUOTA_EXCEEDED")]
    InfraQuotaExceeded,
    #[serde(rename = "ERR_INFRA_RATE_LIMITS_EXCEEDED")]
    InfraRateLimitsExceeded,
    #[serde(rename = "ERR_INFRA_DEPENDENCIES")]
    InfraDependencies,
    #[serde(rename = "ERR_RETRYABLE_INFRA_DEPENDENCIES")]
    RetryableInfraDependencies,
    #[serde(rename = "ERR_INFRA_RESOURCES_DEPLETED")]
    InfraResourcesDepleted,
    #[serde(rename = "ERR_CLEANUP_CLUSTER_RESOURCES")]
    CleanupClusterResources,
    #[serde(rename = "ERR_CONFIGURATION_PROBLEM")]
    ConfigurationProblem,
    #[serde(rename = "ERR_RETRYABLE_CONFIGURATION_PROBLEM")]
    RetryableConfigurationProblem,
    #[serde(rename = "ERR_PROBLEMATIC_WEBHOOK")]
    ProblematicWebhook,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InfraUnauthenticated => "ERR_INFRA_UNAUTHENTICATED",
            Self::InfraUnauthorized => "ERR_INFRA_UNAUTHORIZED",
            Self::InfraQuotaExceeded => "ERR_INFRA_QUOTA_EXCEEDED",
            Self::InfraRateLimitsExceeded => "ERR_INFRA_RATE_LIMITS_EXCEEDED",
            Self::InfraDependencies => "ERR_INFRA_DEPENDENCIES",
            Self::RetryableInfraDependencies => "ERR_RETRYABLE_INFRA_DEPENDENCIES",
            Self::InfraResourcesDepleted => "ERR_INFRA_RESOURCES_DEPLETED",
            Self::CleanupClusterResources => "ERR_CLEANUP_CLUSTER_RESOURCES",
            Self::ConfigurationProblem => "ERR_CONFIGURATION_PROBLEM",
            Self::RetryableConfigurationProblem => "ERR_RETRYABLE_CONFIGURATION_PROBLEM",
            Self::ProblematicWebhook => "ERR_PROBLEMATIC_WEBHOOK",
        }
    }

    /// Codes for which another attempt cannot succeed without user intervention.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InfraUnauthenticated
                | Self::InfraUnauthorized
                | Self::InfraDependencies
                | Self::InfraQuotaExceeded
                | Self::ConfigurationProblem
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn has_non_retryable(codes: &[ErrorCode]) -> bool {
    codes.iter().any(|c| !c.is_retryable())
}

// Order matters: the first matching table entries win when a message hits several.
static PATTERNS: Lazy<Vec<(Regex, ErrorCode)>> = Lazy::new(|| {
    let table: &[(&str, ErrorCode)] = &[
        (
            r"(?i)(invalidauthenticationtokentenant|authentication failed|authfailure|invalid_client|invalidaccesskeyid|invalidsecretaccesskey|cannot fetch token|invalidsubscriptionid)",
            ErrorCode::InfraUnauthenticated,
        ),
        (
            r"(?i)(unauthorized|invalidclienttokenid|signaturedoesnotmatch|authorizationfailed|invalid_grant|not authorized|accessdenied|operationnotallowed|error 403)",
            ErrorCode::InfraUnauthorized,
        ),
        (
            r"(?i)(requestlimitexceeded|throttling|too many requests|rate limit)",
            ErrorCode::InfraRateLimitsExceeded,
        ),
        (
            r"(?i)(quota.*exceeded|exceeded quota|quota has been met|vcpulimitexceeded|instancelimitexceeded|volumelimitexceeded)",
            ErrorCode::InfraQuotaExceeded,
        ),
        (
            r"(?i)(retryableerror|please retry|try again later)",
            ErrorCode::RetryableInfraDependencies,
        ),
        (
            r"(?i)(pendingverification|access not configured|dependencyviolation|optinrequired|inactive billing state|invalidcidrblock|already busy for)",
            ErrorCode::InfraDependencies,
        ),
        (
            r"(?i)(not available in the current hardware cluster|insufficientinstancecapacity|out of stock|zone_resource_pool_exhausted)",
            ErrorCode::InfraResourcesDepleted,
        ),
        (
            r"(?i)(requires zero voluntary evictions|cannotresolveendpoint|configuration is currently not supported)",
            ErrorCode::RetryableConfigurationProblem,
        ),
        (
            r"(?i)(invalid provider ?config|invalidparameter|unsupported value|not supported by)",
            ErrorCode::ConfigurationProblem,
        ),
        (r"(?i)failed calling webhook", ErrorCode::ProblematicWebhook),
    ];
    table
        .iter()
        .filter_map(|(pattern, code)| Regex::new(pattern).ok().map(|re| (re, *code)))
        .collect()
});

/// Derive error codes from a free-text error description.
pub fn determine_error_codes(message: &str) -> Vec<ErrorCode> {
    let mut out = Vec::new();
    for (re, code) in PATTERNS.iter() {
        if re.is_match(message) && !out.contains(code) {
            out.push(*code);
        }
    }
    out
}
