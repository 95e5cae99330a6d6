//! Typed values used by the Canvas mutation calls.
//!
//! Listing responses stay opaque ([`Record`]); only the fields a mutation
//! needs are lifted out here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::Record;

/// Threaded-reply setting of a discussion topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscussionKind {
    Threaded,
    NotThreaded,
}

impl DiscussionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscussionKind::Threaded => "threaded",
            DiscussionKind::NotThreaded => "not_threaded",
        }
    }
}

impl FromStr for DiscussionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threaded" => Ok(DiscussionKind::Threaded),
            "not_threaded" => Ok(DiscussionKind::NotThreaded),
            other => Err(anyhow::anyhow!(
                "unknown discussion mode '{other}' (expected threaded or not_threaded)"
            )),
        }
    }
}

/// Task sent when ending an active enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTask {
    Conclude,
    Delete,
    Inactivate,
}

impl EndTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndTask::Conclude => "conclude",
            EndTask::Delete => "delete",
            EndTask::Inactivate => "inactivate",
        }
    }
}

/// Enrollment workflow states the bulk updater can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Active,
    Inactive,
    Completed,
    Deleted,
}

impl EnrollmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentState::Active => "active",
            EnrollmentState::Inactive => "inactive",
            EnrollmentState::Completed => "completed",
            EnrollmentState::Deleted => "deleted",
        }
    }
}

impl FromStr for EnrollmentState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentState::Active),
            "inactive" => Ok(EnrollmentState::Inactive),
            "completed" => Ok(EnrollmentState::Completed),
            "deleted" => Ok(EnrollmentState::Deleted),
            other => Err(anyhow::anyhow!("unknown enrollment state '{other}'")),
        }
    }
}

/// Body of a re-enrollment POST, built from a previously fetched
/// enrollment record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnrollmentParams {
    pub user_id: Value,
    #[serde(rename = "type")]
    pub role_type: Value,
    pub role_id: Value,
    pub enrollment_state: String,
    pub course_section_id: Value,
    pub limit_privileges_to_course_section: Value,
}

impl EnrollmentParams {
    pub fn from_record(record: &Record, target_state: EnrollmentState) -> Self {
        let field = |name: &str| record.get(name).cloned().unwrap_or(Value::Null);
        Self {
            user_id: field("user_id"),
            role_type: field("type"),
            role_id: field("role_id"),
            enrollment_state: target_state.as_str().to_string(),
            course_section_id: field("course_section_id"),
            limit_privileges_to_course_section: field("limit_privileges_to_course_section"),
        }
    }
}

/// The single mutation planned for one enrollment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentChange {
    End(EndTask),
    Reactivate,
    Add(EnrollmentParams),
}

/// Map a (current state, requested target) pair onto the API call that
/// performs it. Targets outside the supported transitions are rejected
/// before any request is made.
pub fn plan_enrollment_change(
    from: EnrollmentState,
    to: &str,
    record: &Record,
) -> anyhow::Result<EnrollmentChange> {
    match (from, to) {
        (EnrollmentState::Active, "conclude") => Ok(EnrollmentChange::End(EndTask::Conclude)),
        (EnrollmentState::Active, "delete") => Ok(EnrollmentChange::End(EndTask::Delete)),
        (EnrollmentState::Active, "inactivate") => Ok(EnrollmentChange::End(EndTask::Inactivate)),
        (EnrollmentState::Inactive, "active") => Ok(EnrollmentChange::Reactivate),
        (EnrollmentState::Completed | EnrollmentState::Deleted, "active") => Ok(
            EnrollmentChange::Add(EnrollmentParams::from_record(record, EnrollmentState::Active)),
        ),
        (EnrollmentState::Completed | EnrollmentState::Deleted, "inactive") => {
            Ok(EnrollmentChange::Add(EnrollmentParams::from_record(
                record,
                EnrollmentState::Inactive,
            )))
        }
        (from, to) => Err(anyhow::anyhow!(
            "unsupported enrollment transition {} -> {to}",
            from.as_str()
        )),
    }
}

/// Which profile field the user-annotation workflow surfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserIdentifier {
    ShortName,
    #[default]
    SisUserId,
    LoginId,
    PrimaryEmail,
    IntegrationId,
}

impl UserIdentifier {
    pub fn field(&self) -> &'static str {
        match self {
            UserIdentifier::ShortName => "short_name",
            UserIdentifier::SisUserId => "sis_user_id",
            UserIdentifier::LoginId => "login_id",
            UserIdentifier::PrimaryEmail => "primary_email",
            UserIdentifier::IntegrationId => "integration_id",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserIdentifier::ShortName => "display name",
            UserIdentifier::SisUserId => "SIS ID",
            UserIdentifier::LoginId => "login ID",
            UserIdentifier::PrimaryEmail => "email",
            UserIdentifier::IntegrationId => "integration ID",
        }
    }
}

/// Pull the configured identifier out of a profile record. `null` and
/// non-string values count as missing.
pub fn identifier_of(record: &Record, which: UserIdentifier) -> Option<String> {
    match record.get(which.field()) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Identifier of a fetched record, as the string the mutation endpoints
/// expect in their path.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get("id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Permission gate carried over from the in-page tools: at least one of the
/// operator's roles must be approved for bulk updates.
pub fn role_approved(current_roles: &[String], approved_roles: &[String]) -> bool {
    approved_roles
        .iter()
        .any(|approved| current_roles.iter().any(|role| role == approved))
}
