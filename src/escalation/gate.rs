//! Pre-escalation gate: operating hours, then live agent availability.

use chrono::{NaiveDateTime, NaiveTime};
use serde_json::Value;

use crate::bridge::{AgentsQuery, Bridge};
use crate::config::EscalationConfig;
use crate::session::SessionIdentity;

/// Field list requested from the availability endpoint.
const AVAILABILITY_FIELDS: &str =
    "agentStateId,isActive,agentStateName,firstName,lastName,teamId,agentId,skillId";
const AVAILABILITY_TOP: &str = "200";

/// Outcome of one escalation authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(DenialReason),
}

/// Normal negative results, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Today is marked closed all day.
    Closed,
    /// Outside both of today's open intervals.
    OutOfHours,
    /// Nobody qualifying is available right now.
    NoAgents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoursVerdict {
    Open,
    Closed,
    OutOfHours,
}

/// Authorize one escalation attempt.
///
/// Hours are checked first and deny without an availability call. Either
/// check failing to return usable data is non-blocking: a broken hours
/// profile is treated as open, a broken availability list fails open.
pub async fn authorize_escalation(
    bridge: &Bridge,
    identity: &SessionIdentity,
    config: &EscalationConfig,
) -> GateDecision {
    let verdict = match bridge
        .hours_of_operation(identity, config.hours_profile_id.as_deref())
        .await
    {
        Ok(reply) => evaluate_hours(&reply.body, chrono::Local::now().naive_local()),
        Err(e) => {
            tracing::warn!("Hours-of-operation check failed, treating as open: {e}");
            HoursVerdict::Open
        }
    };
    match verdict {
        HoursVerdict::Closed => return GateDecision::Denied(DenialReason::Closed),
        HoursVerdict::OutOfHours => return GateDecision::Denied(DenialReason::OutOfHours),
        HoursVerdict::Open => {}
    }

    let query = AgentsQuery {
        fields: Some(AVAILABILITY_FIELDS.to_string()),
        top: Some(AVAILABILITY_TOP.to_string()),
        team_id: (config.team_id > 0).then_some(config.team_id),
    };
    match bridge.agents_availability(identity, &query).await {
        Ok(reply) => match any_agent_available(&reply.body, config.team_id) {
            Some(false) => GateDecision::Denied(DenialReason::NoAgents),
            // Unusable availability data fails open.
            Some(true) | None => GateDecision::Allowed,
        },
        Err(e) => {
            tracing::warn!("Availability check failed, allowing escalation: {e}");
            GateDecision::Allowed
        }
    }
}

/// Evaluate the hours profile set against the local clock.
///
/// Profiles are scanned in order; the first open interval hit wins
/// outright. A weekday row marked closed-all-day, or matched but outside
/// both its intervals, only sticks if no later profile grants an open
/// hit. Unusable data is open (non-blocking).
fn evaluate_hours(body: &Value, now: NaiveDateTime) -> HoursVerdict {
    let Some(profiles) = body
        .get("resultSet")
        .and_then(|rs| rs.get("hoursOfOperationProfiles"))
        .and_then(Value::as_array)
    else {
        return HoursVerdict::Open;
    };

    let weekday = now.format("%A").to_string();
    let mut closed = false;
    let mut out_of_time = false;

    for profile in profiles {
        let Some(days) = profile.get("days").and_then(Value::as_array) else {
            continue;
        };
        for day in days {
            if day.get("day").and_then(Value::as_str) != Some(weekday.as_str()) {
                continue;
            }
            if is_wire_true(day.get("isClosedAllDay")) {
                closed = true;
                continue;
            }
            if in_interval(day, "openTime", "closeTime", now.time())
                || in_interval(day, "additionalOpenTime", "additionalCloseTime", now.time())
            {
                return HoursVerdict::Open;
            }
            out_of_time = true;
        }
    }

    if closed {
        HoursVerdict::Closed
    } else if out_of_time {
        HoursVerdict::OutOfHours
    } else {
        HoursVerdict::Open
    }
}

/// `[start, end)` check against a day's `"HH:MM:SS"` interval fields.
/// Missing or unparseable bounds never match.
fn in_interval(day: &Value, start_key: &str, end_key: &str, now: NaiveTime) -> bool {
    let Some(start) = parse_wire_time(day.get(start_key)) else {
        return false;
    };
    let Some(end) = parse_wire_time(day.get(end_key)) else {
        return false;
    };
    now >= start && now < end
}

fn parse_wire_time(value: Option<&Value>) -> Option<NaiveTime> {
    let raw = value?.as_str()?;
    if raw.is_empty() {
        return None;
    }
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// The wire encodes booleans as the strings "True"/"False".
fn is_wire_true(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s == "True",
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Is any qualifying agent available? `None` when the list is unusable.
///
/// An agent qualifies when its state is active availability
/// (`agentStateId == 1`, `agentStateName == "Available"`) and it belongs
/// to the requested team (team id 0 meaning any).
fn any_agent_available(body: &Value, team_id: i64) -> Option<bool> {
    let states = body.get("agentStates").and_then(Value::as_array)?;
    Some(states.iter().any(|agent| {
        (team_id == 0 || agent.get("teamId").and_then(Value::as_i64) == Some(team_id))
            && agent.get("agentStateId").and_then(Value::as_i64) == Some(1)
            && agent.get("agentStateName").and_then(Value::as_str) == Some("Available")
    }))
}
