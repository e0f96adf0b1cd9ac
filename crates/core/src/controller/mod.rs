#![allow(missing_docs)]

//! Editing roles shared between devices working on one match.
//!
//! The play-by-play role (`ActiveCoach`) gates match history, the line role
//! (`LineCoach`) gates the staged next line. A role nobody holds is open to
//! every device, so a lone device works without claiming anything.
//!
//! Claims expire when their holder stops pinging. Handoff requests expire
//! too, and an expired request is approved on the next refresh.

mod registry;

pub use registry::ControllerRegistry;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// One of the two exclusive editing roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Records events, scores and timeouts.
    ActiveCoach,
    /// Edits the staged next line.
    LineCoach,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::ActiveCoach => "play-by-play",
            Role::LineCoach => "line",
        }
    }
}

/// Device currently holding a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleHolder {
    pub user_id: String,
    pub display_name: String,
    pub claimed_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
}

impl RoleHolder {
    fn new(user_id: &str, display_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            claimed_at: now,
            last_ping: now,
        }
    }
}

/// Takeover request awaiting the holder's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub id: u64,
    pub role: Role,
    pub requester_id: String,
    pub requester_name: String,
    pub current_holder_id: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Role holders for one match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    #[serde(default)]
    pub active_coach: Option<RoleHolder>,
    #[serde(default)]
    pub line_coach: Option<RoleHolder>,
    #[serde(default)]
    pub pending_handoff: Option<HandoffRequest>,
}

/// What the local device may edit right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub play_by_play: bool,
    pub next_line: bool,
}

impl ControllerState {
    pub fn holder(&self, role: Role) -> Option<&RoleHolder> {
        match role {
            Role::ActiveCoach => self.active_coach.as_ref(),
            Role::LineCoach => self.line_coach.as_ref(),
        }
    }

    fn slot(&mut self, role: Role) -> &mut Option<RoleHolder> {
        match role {
            Role::ActiveCoach => &mut self.active_coach,
            Role::LineCoach => &mut self.line_coach,
        }
    }

    /// Neither role claimed: every device holds both.
    pub fn is_local_mode(&self) -> bool {
        self.active_coach.is_none() && self.line_coach.is_none()
    }

    pub fn holds(&self, role: Role, user_id: &str) -> bool {
        self.holder(role)
            .map(|holder| holder.user_id == user_id)
            .unwrap_or(false)
    }

    /// Vacant roles count as held.
    pub fn may_act_as(&self, role: Role, user_id: &str) -> bool {
        self.holder(role).is_none() || self.holds(role, user_id)
    }

    /// Permissions of `user_id`. Between points the play-by-play holder may
    /// also edit the next line; during a point only the line holder may.
    pub fn permissions(&self, user_id: &str, point_in_progress: bool) -> Permissions {
        let play_by_play = self.may_act_as(Role::ActiveCoach, user_id);
        let next_line = self.may_act_as(Role::LineCoach, user_id)
            || (!point_in_progress && self.holds(Role::ActiveCoach, user_id));
        Permissions {
            play_by_play,
            next_line,
        }
    }

    /// Same holders and pending request, ignoring ping times.
    pub fn same_roles(&self, other: &ControllerState) -> bool {
        let identity =
            |holder: Option<&RoleHolder>| holder.map(|h| (h.user_id.clone(), h.display_name.clone()));
        [Role::ActiveCoach, Role::LineCoach]
            .into_iter()
            .all(|role| identity(self.holder(role)) == identity(other.holder(role)))
            && self.pending_handoff == other.pending_handoff
    }

    /// Pending request addressed to `user_id`, if any.
    pub fn handoff_for(&self, user_id: &str) -> Option<&HandoffRequest> {
        self.pending_handoff
            .as_ref()
            .filter(|request| request.current_holder_id == user_id)
    }
}

/// Reasons a role operation is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ControllerError {
    #[error("role is held by {holder_name}")]
    Occupied {
        holder_id: String,
        holder_name: String,
    },
    #[error("role is vacant; claim it instead")]
    RoleVacant,
    #[error("requester already holds the role")]
    AlreadyHolder,
    #[error("another handoff is already pending")]
    HandoffPending,
    #[error("no pending handoff")]
    NoPendingHandoff,
    #[error("caller does not hold the role")]
    NotHolder,
}

/// Successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed,
    /// Caller already held the role; its ping was refreshed.
    Refreshed,
}

/// Answer to a handoff request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffResolution {
    Accepted,
    Denied,
    /// The request was already settled; nothing changed.
    AlreadyResolved,
}

/// Timeouts applied by a [`ControllerManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerPolicy {
    /// Unanswered handoffs are approved after this long.
    pub handoff_timeout: Duration,
    /// Claims without a ping for this long are dropped.
    pub stale_timeout: Duration,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            handoff_timeout: Duration::seconds(10),
            stale_timeout: Duration::seconds(30),
        }
    }
}

/// Role state machine for a single match.
#[derive(Debug, Clone)]
pub struct ControllerManager {
    state: ControllerState,
    policy: ControllerPolicy,
    next_request_id: u64,
    last_resolved: Option<u64>,
}

impl ControllerManager {
    pub fn new(policy: ControllerPolicy) -> Self {
        Self {
            state: ControllerState::default(),
            policy,
            next_request_id: 1,
            last_resolved: None,
        }
    }

    /// Current state after dropping stale claims and expired handoffs.
    pub fn state(&mut self, now: DateTime<Utc>) -> ControllerState {
        self.refresh(now);
        self.state.clone()
    }

    /// Drop stale claims, then approve an expired handoff.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        for role in [Role::ActiveCoach, Role::LineCoach] {
            let stale = self
                .state
                .holder(role)
                .map(|holder| now - holder.last_ping > self.policy.stale_timeout)
                .unwrap_or(false);
            if stale {
                if let Some(holder) = self.state.slot(role).take() {
                    info!(role = role.label(), user = %holder.user_id, "stale claim cleared");
                }
            }
        }

        let expired = self
            .state
            .pending_handoff
            .as_ref()
            .map(|request| now > request.expires_at)
            .unwrap_or(false);
        if expired {
            if let Some(request) = self.state.pending_handoff.take() {
                info!(
                    role = request.role.label(),
                    to = %request.requester_id,
                    "handoff auto-approved after timeout"
                );
                self.transfer(&request, now);
            }
        }
    }

    pub fn claim(
        &mut self,
        role: Role,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ControllerError> {
        self.refresh(now);
        let slot = self.state.slot(role);
        match slot.as_mut() {
            Some(holder) if holder.user_id == user_id => {
                holder.last_ping = now;
                Ok(ClaimOutcome::Refreshed)
            }
            Some(holder) => Err(ControllerError::Occupied {
                holder_id: holder.user_id.clone(),
                holder_name: holder.display_name.clone(),
            }),
            None => {
                *slot = Some(RoleHolder::new(user_id, display_name, now));
                info!(role = role.label(), user = %user_id, "role claimed");
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    pub fn request_handoff(
        &mut self,
        role: Role,
        requester_id: &str,
        requester_name: &str,
        now: DateTime<Utc>,
    ) -> Result<HandoffRequest, ControllerError> {
        self.refresh(now);
        let holder = self
            .state
            .holder(role)
            .ok_or(ControllerError::RoleVacant)?;
        if holder.user_id == requester_id {
            return Err(ControllerError::AlreadyHolder);
        }
        if self.state.pending_handoff.is_some() {
            return Err(ControllerError::HandoffPending);
        }

        let request = HandoffRequest {
            id: self.next_request_id,
            role,
            requester_id: requester_id.to_string(),
            requester_name: requester_name.to_string(),
            current_holder_id: holder.user_id.clone(),
            requested_at: now,
            expires_at: now + self.policy.handoff_timeout,
        };
        self.next_request_id += 1;
        self.state.pending_handoff = Some(request.clone());
        info!(
            role = role.label(),
            from = %request.current_holder_id,
            to = %requester_id,
            "handoff requested"
        );
        Ok(request)
    }

    /// Accept or deny a request. Answering a settled request is a no-op.
    pub fn respond_to_handoff(
        &mut self,
        request_id: u64,
        user_id: &str,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<HandoffResolution, ControllerError> {
        self.refresh(now);
        let pending_id = self.state.pending_handoff.as_ref().map(|request| request.id);
        if pending_id != Some(request_id) {
            if self.last_resolved == Some(request_id) {
                debug!(request_id, "handoff already resolved");
                return Ok(HandoffResolution::AlreadyResolved);
            }
            return Err(ControllerError::NoPendingHandoff);
        }

        let Some(request) = self.state.pending_handoff.take() else {
            return Err(ControllerError::NoPendingHandoff);
        };
        if request.current_holder_id != user_id {
            self.state.pending_handoff = Some(request);
            return Err(ControllerError::NotHolder);
        }

        self.last_resolved = Some(request.id);
        if accept {
            self.transfer(&request, now);
            Ok(HandoffResolution::Accepted)
        } else {
            info!(role = request.role.label(), to = %request.requester_id, "handoff denied");
            Ok(HandoffResolution::Denied)
        }
    }

    pub fn release(&mut self, role: Role, user_id: &str) -> Result<(), ControllerError> {
        if !self.state.holds(role, user_id) {
            return Err(ControllerError::NotHolder);
        }
        *self.state.slot(role) = None;
        let clears_pending = self
            .state
            .pending_handoff
            .as_ref()
            .map(|request| request.role == role)
            .unwrap_or(false);
        if clears_pending {
            self.state.pending_handoff = None;
        }
        info!(role = role.label(), user = %user_id, "role released");
        Ok(())
    }

    /// Keep a claim alive.
    pub fn ping(&mut self, role: Role, user_id: &str, now: DateTime<Utc>) -> Result<(), ControllerError> {
        match self.state.slot(role) {
            Some(holder) if holder.user_id == user_id => {
                holder.last_ping = now;
                Ok(())
            }
            _ => Err(ControllerError::NotHolder),
        }
    }

    fn transfer(&mut self, request: &HandoffRequest, now: DateTime<Utc>) {
        *self.state.slot(request.role) = Some(RoleHolder::new(
            &request.requester_id,
            &request.requester_name,
            now,
        ));
        self.last_resolved = Some(request.id);
        info!(role = request.role.label(), to = %request.requester_id, "role handed off");
    }
}

impl Default for ControllerManager {
    fn default() -> Self {
        Self::new(ControllerPolicy::default())
    }
}
