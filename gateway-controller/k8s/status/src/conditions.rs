use chrono::{DateTime, Utc};
use gateway_controller_core::AncestorStatus;
use gateway_controller_k8s_api::{Condition, Time};

pub const ACCEPTED: &str = "Accepted";
pub const PROGRAMMED: &str = "Programmed";

/// The outcome of programming an HTTPProxy's connector backends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProxyProgrammed {
    Programmed,
    ConnectorNotReady,
    Invalid(String),
}

pub fn accepted(status: &AncestorStatus, timestamp: DateTime<Utc>) -> Condition {
    Condition {
        type_: ACCEPTED.to_string(),
        status: bool_status(status.reason.is_accepted()),
        reason: status.reason.as_str().to_string(),
        message: status.reason.message().to_string(),
        observed_generation: status.observed_generation,
        last_transition_time: Time(timestamp),
    }
}

pub fn programmed(
    state: &ProxyProgrammed,
    observed_generation: Option<i64>,
    timestamp: DateTime<Utc>,
) -> Condition {
    let (status, reason, message) = match state {
        ProxyProgrammed::Programmed => (true, "Programmed", "Connector backends are programmed".to_string()),
        ProxyProgrammed::ConnectorNotReady => (
            false,
            "ConnectorNotReady",
            "One or more connectors are not ready".to_string(),
        ),
        ProxyProgrammed::Invalid(message) => (false, "Invalid", message.clone()),
    };
    Condition {
        type_: PROGRAMMED.to_string(),
        status: bool_status(status),
        reason: reason.to_string(),
        message,
        observed_generation,
        last_transition_time: Time(timestamp),
    }
}

/// Keeps the transition time of conditions whose status and reason did not
/// change.
pub fn preserve_transition_times(existing: &[Condition], conditions: &mut [Condition]) {
    for condition in conditions {
        if let Some(prior) = existing.iter().find(|c| {
            c.type_ == condition.type_ && c.status == condition.status && c.reason == condition.reason
        }) {
            condition.last_transition_time = prior.last_transition_time.clone();
        }
    }
}

/// Replaces the condition of the same type, keeping the others.
pub fn set_condition(conditions: &[Condition], mut condition: Condition) -> Vec<Condition> {
    preserve_transition_times(conditions, std::slice::from_mut(&mut condition));
    let mut updated = conditions
        .iter()
        .filter(|c| c.type_ != condition.type_)
        .cloned()
        .collect::<Vec<_>>();
    updated.push(condition);
    updated.sort_by(|a, b| a.type_.cmp(&b.type_));
    updated
}

#[inline]
fn bool_status(status: bool) -> String {
    if status { "True" } else { "False" }.to_string()
}
