//! Classification workflow state machine
//!
//! Pure transition function `(state, payload, event) -> (state, payload, effect)`.
//! The step executor performs the effect (a tier run, a budget check, a
//! suspension, a notification) and feeds the outcome back as the next event.
//! Choice states are resolved here and reported in [`Transition::path`].
//!
//! ```text
//! FastTierClassify -> HasUnclassifiedImagesCheck -+-> GetStatus -> SendNotification
//!                                                 |
//!                                                 +-> CheckRateLimit <-> WaitForRateLimitLift
//!                                                        |
//!                                                        v
//!                                               FallbackTierClassify -> IsRateLimited
//!                                                        +-> SendRateLimitErrorNotification
//!                                                        +-> GetStatus -> SendNotification
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::models::RequestStatus;
use crate::services::rate_limiter::BudgetDecision;

/// Workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Run the fast tier over images never seen by it (initial state)
    FastTierClassify,
    /// Choice: anything left for the fallback tier?
    HasUnclassifiedImagesCheck,
    /// Reserve minute and day budget for the fallback batch
    CheckRateLimit,
    /// Suspended until the budget window rolls over
    WaitForRateLimitLift,
    /// Run the fallback tier, one image at a time
    FallbackTierClassify,
    /// Choice: did the fallback tier hit the downstream rate limit?
    IsRateLimited,
    /// Compute the request's status summary
    GetStatus,
    /// Terminal: publish the result payload
    SendNotification,
    /// Terminal: publish an operator alert
    SendRateLimitErrorNotification,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 9] = [
        WorkflowState::FastTierClassify,
        WorkflowState::HasUnclassifiedImagesCheck,
        WorkflowState::CheckRateLimit,
        WorkflowState::WaitForRateLimitLift,
        WorkflowState::FallbackTierClassify,
        WorkflowState::IsRateLimited,
        WorkflowState::GetStatus,
        WorkflowState::SendNotification,
        WorkflowState::SendRateLimitErrorNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::FastTierClassify => "FastTierClassify",
            WorkflowState::HasUnclassifiedImagesCheck => "HasUnclassifiedImagesCheck",
            WorkflowState::CheckRateLimit => "CheckRateLimit",
            WorkflowState::WaitForRateLimitLift => "WaitForRateLimitLift",
            WorkflowState::FallbackTierClassify => "FallbackTierClassify",
            WorkflowState::IsRateLimited => "IsRateLimited",
            WorkflowState::GetStatus => "GetStatus",
            WorkflowState::SendNotification => "SendNotification",
            WorkflowState::SendRateLimitErrorNotification => "SendRateLimitErrorNotification",
        }
    }

    /// Choice states never rest; they are resolved inside [`transition`]
    pub fn is_choice(&self) -> bool {
        matches!(
            self,
            WorkflowState::HasUnclassifiedImagesCheck | WorkflowState::IsRateLimited
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::SendNotification | WorkflowState::SendRateLimitErrorNotification
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownState(s.to_string()))
    }
}

/// Final status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    /// Result notification published
    Succeeded,
    /// Operator alert published (persistent rate limiting)
    Alerted,
    /// Retries exhausted or fatal step error
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Alerted => "ALERTED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl FromStr for ExecutionStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCEEDED" => Ok(ExecutionStatus::Succeeded),
            "ALERTED" => Ok(ExecutionStatus::Alerted),
            "FAILED" => Ok(ExecutionStatus::Failed),
            other => Err(TransitionError::UnknownState(other.to_string())),
        }
    }
}

/// Data threaded through the state machine (persisted as JSON)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionPayload {
    pub request_id: String,
    pub unclassified_images_count: u32,
    /// Rate-limit re-checks performed in this execution
    pub retry_count: u32,
    pub remaining_rate_limit: i64,
    /// Seconds to suspend before the next budget check
    pub wait_duration: u64,
    pub rate_limit_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
}

impl ExecutionPayload {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }
}

/// Work the executor must perform for the current state
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ClassifyFastTier,
    ReserveBudget { requested: u32, retry_count: u32 },
    Suspend { seconds: u64 },
    ClassifyFallbackTier,
    ComputeStatus,
    PublishResult(RequestStatus),
    PublishAlert { message: String },
    Finish(ExecutionStatus),
}

/// Outcome of an effect, fed back into [`transition`]
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    FastTierCompleted { unclassified_images_count: u32 },
    BudgetChecked(BudgetDecision),
    WaitElapsed,
    FallbackTierCompleted { rate_limit_error: bool },
    StatusComputed(RequestStatus),
    Published,
}

impl StepEvent {
    fn name(&self) -> &'static str {
        match self {
            StepEvent::FastTierCompleted { .. } => "FastTierCompleted",
            StepEvent::BudgetChecked(_) => "BudgetChecked",
            StepEvent::WaitElapsed => "WaitElapsed",
            StepEvent::FallbackTierCompleted { .. } => "FallbackTierCompleted",
            StepEvent::StatusComputed(_) => "StatusComputed",
            StepEvent::Published => "Published",
        }
    }
}

/// Knobs the transition function needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// A fallback rate-limit error alerts the operator while `retry_count` is at
    /// or below this value; above it the workflow reports status instead
    pub alert_retry_ceiling: u32,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            alert_retry_ceiling: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Resting state after the event (never a choice state)
    pub state: WorkflowState,
    pub payload: ExecutionPayload,
    pub effect: Effect,
    /// Every state entered, choice states included, in order
    pub path: Vec<WorkflowState>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event {event} is not valid in state {state}")]
    Unexpected { state: WorkflowState, event: &'static str },

    #[error("unknown workflow state: {0}")]
    UnknownState(String),
}

/// Initial transition for a new execution
pub fn start(request_id: impl Into<String>) -> Transition {
    let payload = ExecutionPayload::new(request_id);
    Transition {
        state: WorkflowState::FastTierClassify,
        effect: effect_for(WorkflowState::FastTierClassify, &payload),
        payload,
        path: vec![WorkflowState::FastTierClassify],
    }
}

/// Effect owed by a resting state
pub fn effect_for(state: WorkflowState, payload: &ExecutionPayload) -> Effect {
    match state {
        WorkflowState::FastTierClassify => Effect::ClassifyFastTier,
        WorkflowState::CheckRateLimit => Effect::ReserveBudget {
            requested: payload.unclassified_images_count,
            retry_count: payload.retry_count,
        },
        WorkflowState::WaitForRateLimitLift => Effect::Suspend {
            seconds: payload.wait_duration,
        },
        WorkflowState::FallbackTierClassify => Effect::ClassifyFallbackTier,
        WorkflowState::GetStatus => Effect::ComputeStatus,
        WorkflowState::SendNotification => match &payload.status {
            Some(status) => Effect::PublishResult(status.clone()),
            None => Effect::ComputeStatus,
        },
        WorkflowState::SendRateLimitErrorNotification => Effect::PublishAlert {
            message: rate_limit_alert_message(payload),
        },
        // Choice states are resolved before they could rest
        WorkflowState::HasUnclassifiedImagesCheck | WorkflowState::IsRateLimited => {
            Effect::Finish(ExecutionStatus::Failed)
        }
    }
}

fn rate_limit_alert_message(payload: &ExecutionPayload) -> String {
    format!(
        "Fallback tier rate limited for request {} after {} budget re-checks",
        payload.request_id, payload.retry_count
    )
}

/// Advance the workflow by one event
pub fn transition(
    state: WorkflowState,
    payload: &ExecutionPayload,
    event: StepEvent,
    policy: &TransitionPolicy,
) -> Result<Transition, TransitionError> {
    let mut next = payload.clone();
    let mut path = Vec::new();

    let resting = match (state, event) {
        (WorkflowState::FastTierClassify, StepEvent::FastTierCompleted { unclassified_images_count }) => {
            next.unclassified_images_count = unclassified_images_count;
            path.push(WorkflowState::HasUnclassifiedImagesCheck);
            if unclassified_images_count == 0 {
                WorkflowState::GetStatus
            } else {
                WorkflowState::CheckRateLimit
            }
        }

        (WorkflowState::CheckRateLimit, StepEvent::BudgetChecked(decision)) => {
            next.remaining_rate_limit = decision.remaining_rate_limit;
            next.wait_duration = decision.wait_duration;
            if decision.granted {
                WorkflowState::FallbackTierClassify
            } else {
                WorkflowState::WaitForRateLimitLift
            }
        }

        (WorkflowState::WaitForRateLimitLift, StepEvent::WaitElapsed) => {
            next.retry_count += 1;
            WorkflowState::CheckRateLimit
        }

        (WorkflowState::FallbackTierClassify, StepEvent::FallbackTierCompleted { rate_limit_error }) => {
            next.rate_limit_error = rate_limit_error;
            path.push(WorkflowState::IsRateLimited);
            if rate_limit_error && next.retry_count <= policy.alert_retry_ceiling {
                WorkflowState::SendRateLimitErrorNotification
            } else {
                WorkflowState::GetStatus
            }
        }

        (WorkflowState::GetStatus, StepEvent::StatusComputed(status)) => {
            next.status = Some(status);
            WorkflowState::SendNotification
        }

        (WorkflowState::SendNotification, StepEvent::Published) => {
            return Ok(Transition {
                state,
                payload: next,
                effect: Effect::Finish(ExecutionStatus::Succeeded),
                path,
            });
        }

        (WorkflowState::SendRateLimitErrorNotification, StepEvent::Published) => {
            return Ok(Transition {
                state,
                payload: next,
                effect: Effect::Finish(ExecutionStatus::Alerted),
                path,
            });
        }

        (state, event) => {
            return Err(TransitionError::Unexpected {
                state,
                event: event.name(),
            })
        }
    };

    path.push(resting);
    Ok(Transition {
        state: resting,
        effect: effect_for(resting, &next),
        payload: next,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(granted: bool, wait: u64) -> BudgetDecision {
        BudgetDecision {
            granted,
            forced: false,
            remaining_rate_limit: if granted { 10 } else { 0 },
            wait_duration: wait,
            minute_remaining: 10,
            day_remaining: 10,
        }
    }

    #[test]
    fn test_start_runs_fast_tier() {
        let t = start("R1");
        assert_eq!(t.state, WorkflowState::FastTierClassify);
        assert_eq!(t.effect, Effect::ClassifyFastTier);
        assert_eq!(t.payload.request_id, "R1");
    }

    #[test]
    fn test_nothing_unclassified_goes_to_status() {
        let p = ExecutionPayload::new("R1");
        let t = transition(
            WorkflowState::FastTierClassify,
            &p,
            StepEvent::FastTierCompleted { unclassified_images_count: 0 },
            &TransitionPolicy::default(),
        )
        .unwrap();

        assert_eq!(t.state, WorkflowState::GetStatus);
        assert_eq!(t.effect, Effect::ComputeStatus);
        assert_eq!(
            t.path,
            vec![WorkflowState::HasUnclassifiedImagesCheck, WorkflowState::GetStatus]
        );
    }

    #[test]
    fn test_unclassified_requests_budget() {
        let p = ExecutionPayload::new("R1");
        let t = transition(
            WorkflowState::FastTierClassify,
            &p,
            StepEvent::FastTierCompleted { unclassified_images_count: 4 },
            &TransitionPolicy::default(),
        )
        .unwrap();

        assert_eq!(t.state, WorkflowState::CheckRateLimit);
        assert_eq!(t.effect, Effect::ReserveBudget { requested: 4, retry_count: 0 });
    }

    #[test]
    fn test_rejected_budget_suspends_then_increments_retry() {
        let mut p = ExecutionPayload::new("R1");
        p.unclassified_images_count = 5;
        let policy = TransitionPolicy::default();

        let waiting = transition(
            WorkflowState::CheckRateLimit,
            &p,
            StepEvent::BudgetChecked(decision(false, 60)),
            &policy,
        )
        .unwrap();
        assert_eq!(waiting.state, WorkflowState::WaitForRateLimitLift);
        assert_eq!(waiting.effect, Effect::Suspend { seconds: 60 });

        let back = transition(waiting.state, &waiting.payload, StepEvent::WaitElapsed, &policy).unwrap();
        assert_eq!(back.state, WorkflowState::CheckRateLimit);
        assert_eq!(back.payload.retry_count, 1);
        assert_eq!(back.effect, Effect::ReserveBudget { requested: 5, retry_count: 1 });
    }

    #[test]
    fn test_rate_limit_error_alerts_operator() {
        let p = ExecutionPayload::new("R1");
        let t = transition(
            WorkflowState::FallbackTierClassify,
            &p,
            StepEvent::FallbackTierCompleted { rate_limit_error: true },
            &TransitionPolicy::default(),
        )
        .unwrap();

        assert_eq!(t.state, WorkflowState::SendRateLimitErrorNotification);
        assert!(matches!(t.effect, Effect::PublishAlert { .. }));
        assert_eq!(t.path[0], WorkflowState::IsRateLimited);
    }

    #[test]
    fn test_rate_limit_error_above_ceiling_reports_status() {
        let mut p = ExecutionPayload::new("R1");
        p.retry_count = 4;
        let t = transition(
            WorkflowState::FallbackTierClassify,
            &p,
            StepEvent::FallbackTierCompleted { rate_limit_error: true },
            &TransitionPolicy::default(),
        )
        .unwrap();

        assert_eq!(t.state, WorkflowState::GetStatus);
    }

    #[test]
    fn test_terminal_publish_finishes() {
        let p = ExecutionPayload::new("R1");
        let policy = TransitionPolicy::default();

        let ok = transition(WorkflowState::SendNotification, &p, StepEvent::Published, &policy).unwrap();
        assert_eq!(ok.effect, Effect::Finish(ExecutionStatus::Succeeded));

        let alerted = transition(
            WorkflowState::SendRateLimitErrorNotification,
            &p,
            StepEvent::Published,
            &policy,
        )
        .unwrap();
        assert_eq!(alerted.effect, Effect::Finish(ExecutionStatus::Alerted));
    }

    #[test]
    fn test_unexpected_event_is_rejected() {
        let p = ExecutionPayload::new("R1");
        let err = transition(
            WorkflowState::GetStatus,
            &p,
            StepEvent::WaitElapsed,
            &TransitionPolicy::default(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            TransitionError::Unexpected {
                state: WorkflowState::GetStatus,
                event: "WaitElapsed"
            }
        );
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in WorkflowState::ALL {
            assert_eq!(state.as_str().parse::<WorkflowState>().unwrap(), state);
        }
        assert!("Bogus".parse::<WorkflowState>().is_err());
    }
}
