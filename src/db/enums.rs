use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Current state of a monitored target.
///
/// `Pending` is the initial state of every target and is never re-entered
/// once the first probe has completed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "target_status_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "UP")]
    Up,
    #[sea_orm(string_value = "DOWN")]
    Down,
    #[sea_orm(string_value = "TIMEOUT")]
    Timeout,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "PENDING",
            TargetStatus::Up => "UP",
            TargetStatus::Down => "DOWN",
            TargetStatus::Timeout => "TIMEOUT",
        }
    }

    /// DOWN and TIMEOUT are distinct for display but both count as "not UP"
    /// for incident handling.
    pub fn is_failing(&self) -> bool {
        matches!(self, TargetStatus::Down | TargetStatus::Timeout)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for a single probe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "ping_status_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum PingStatus {
    #[sea_orm(string_value = "UP")]
    Up,
    #[sea_orm(string_value = "DOWN")]
    Down,
    #[sea_orm(string_value = "TIMEOUT")]
    Timeout,
}

impl PingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingStatus::Up => "UP",
            PingStatus::Down => "DOWN",
            PingStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, PingStatus::Up)
    }
}

impl From<PingStatus> for TargetStatus {
    fn from(status: PingStatus) -> Self {
        match status {
            PingStatus::Up => TargetStatus::Up,
            PingStatus::Down => TargetStatus::Down,
            PingStatus::Timeout => TargetStatus::Timeout,
        }
    }
}

impl FromStr for PingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(PingStatus::Up),
            "DOWN" => Ok(PingStatus::Down),
            "TIMEOUT" => Ok(PingStatus::Timeout),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "insight_kind_enum")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsightKind {
    #[sea_orm(string_value = "DEGRADED_PERFORMANCE")]
    DegradedPerformance,
    #[sea_orm(string_value = "RELIABILITY_ISSUE")]
    ReliabilityIssue,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::DegradedPerformance => "DEGRADED_PERFORMANCE",
            InsightKind::ReliabilityIssue => "RELIABILITY_ISSUE",
        }
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "insight_severity_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum InsightSeverity {
    #[sea_orm(string_value = "WARNING")]
    Warning,
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
}

impl fmt::Display for InsightSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsightSeverity::Warning => f.write_str("WARNING"),
            InsightSeverity::Critical => f.write_str("CRITICAL"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "http_method_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[sea_orm(string_value = "GET")]
    Get,
    #[sea_orm(string_value = "POST")]
    Post,
    #[sea_orm(string_value = "PUT")]
    Put,
    #[sea_orm(string_value = "DELETE")]
    Delete,
    #[sea_orm(string_value = "PATCH")]
    Patch,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_down_are_both_failing() {
        assert!(TargetStatus::Down.is_failing());
        assert!(TargetStatus::Timeout.is_failing());
        assert!(!TargetStatus::Up.is_failing());
        assert!(!TargetStatus::Pending.is_failing());
    }

    #[test]
    fn ping_status_maps_onto_target_status() {
        assert_eq!(TargetStatus::from(PingStatus::Timeout), TargetStatus::Timeout);
        assert_eq!("DOWN".parse::<PingStatus>(), Ok(PingStatus::Down));
        assert!("PENDING".parse::<PingStatus>().is_err());
    }

    #[test]
    fn http_method_parses_case_insensitively() {
        assert_eq!("patch".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }
}
