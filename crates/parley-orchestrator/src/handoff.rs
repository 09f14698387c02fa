//! Expert handoff on capability mismatch
//!
//! When an expert reports [`HandlerError::Inability`], the task moves to
//! another expert that advertises the missing capability. Each task tracks
//! the experts it has visited so a handoff never bounces back.
//!
//! [`HandlerError::Inability`]: parley_core::HandlerError::Inability

use parley_core::{EventKind, HandlerEvent, HandlerRegistry};
use serde::Serialize;
use std::collections::BTreeSet;

/// Why a handoff did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffFailReason {
    /// No other expert advertises the capability
    NoMatchingExpert,
    /// The task was already handed off too many times
    MaxDepthExceeded,
    /// The receiving expert failed too
    TargetExecution,
}

impl HandoffFailReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMatchingExpert => "no_matching_expert",
            Self::MaxDepthExceeded => "max_depth_exceeded",
            Self::TargetExecution => "target_execution",
        }
    }
}

/// Capability → experts index, in registration order
#[derive(Debug, Clone, Default)]
pub struct CapabilityMap {
    experts: Vec<(String, Vec<String>)>,
}

impl CapabilityMap {
    /// Index the expert profiles of a registry
    #[must_use]
    pub fn from_registry(registry: &HandlerRegistry) -> Self {
        Self {
            experts: registry
                .experts()
                .map(|p| {
                    (
                        p.name.clone(),
                        p.capabilities.iter().map(|c| c.to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// First expert offering `capability` that is not in `exclude`
    #[must_use]
    pub fn find(&self, capability: &str, exclude: &BTreeSet<String>) -> Option<&str> {
        let wanted = capability.to_lowercase();
        self.experts
            .iter()
            .filter(|(name, _)| !exclude.contains(name))
            .find(|(_, caps)| caps.iter().any(|c| *c == wanted))
            .map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }
}

/// Handoff state of one task
#[derive(Debug, Clone)]
pub struct HandoffChain {
    task_id: String,
    current: String,
    visited: BTreeSet<String>,
    depth: u32,
    max_depth: u32,
}

impl HandoffChain {
    #[must_use]
    pub fn new(task_id: impl Into<String>, expert: impl Into<String>, max_depth: u32) -> Self {
        let current = expert.into();
        Self {
            task_id: task_id.into(),
            visited: BTreeSet::from([current.clone()]),
            current,
            depth: 0,
            max_depth,
        }
    }

    /// Expert currently holding the task
    #[must_use]
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Handoffs performed so far
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Move the task to an expert offering `capability`
    pub fn advance(
        &mut self,
        capability: &str,
        map: &CapabilityMap,
    ) -> Result<String, HandoffFailReason> {
        if self.depth >= self.max_depth {
            return Err(HandoffFailReason::MaxDepthExceeded);
        }
        let next = map
            .find(capability, &self.visited)
            .ok_or(HandoffFailReason::NoMatchingExpert)?
            .to_string();
        self.visited.insert(next.clone());
        self.current = next.clone();
        self.depth += 1;
        Ok(next)
    }

    #[must_use]
    pub fn start_event(&self, from: &str, capability: &str) -> HandlerEvent {
        HandlerEvent::json(
            EventKind::HandoffStart,
            &serde_json::json!({
                "task_id": self.task_id,
                "from": from,
                "to": self.current,
                "capability": capability,
                "depth": self.depth,
            }),
        )
    }

    #[must_use]
    pub fn end_event(&self) -> HandlerEvent {
        HandlerEvent::json(
            EventKind::HandoffEnd,
            &serde_json::json!({
                "task_id": self.task_id,
                "expert": self.current,
                "depth": self.depth,
            }),
        )
    }

    #[must_use]
    pub fn fail_event(&self, reason: HandoffFailReason, detail: &str) -> HandlerEvent {
        HandlerEvent::json(
            EventKind::HandoffFail,
            &serde_json::json!({
                "task_id": self.task_id,
                "expert": self.current,
                "reason": reason.as_str(),
                "error": detail,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> CapabilityMap {
        CapabilityMap {
            experts: vec![
                ("memo".into(), vec!["note_search".into()]),
                ("schedule".into(), vec!["calendar".into(), "note_search".into()]),
                ("travel".into(), vec!["calendar".into()]),
            ],
        }
    }

    #[test]
    fn advance_skips_visited_experts() {
        let map = map();
        let mut chain = HandoffChain::new("t1", "schedule", 2);
        assert_eq!(chain.advance("Calendar", &map).unwrap(), "travel");
        assert_eq!(chain.current(), "travel");
        assert_eq!(chain.depth(), 1);

        // schedule was already visited
        assert_eq!(
            chain.advance("calendar", &map),
            Err(HandoffFailReason::NoMatchingExpert)
        );
    }

    #[test]
    fn depth_is_bounded() {
        let map = map();
        let mut chain = HandoffChain::new("t1", "travel", 1);
        assert_eq!(chain.advance("note_search", &map).unwrap(), "memo");
        assert_eq!(
            chain.advance("calendar", &map),
            Err(HandoffFailReason::MaxDepthExceeded)
        );
    }

    #[test]
    fn events_carry_task_and_expert() {
        let map = map();
        let mut chain = HandoffChain::new("t3", "memo", 2);
        chain.advance("calendar", &map).unwrap();
        let start: serde_json::Value =
            serde_json::from_str(&chain.start_event("memo", "calendar").content).unwrap();
        assert_eq!(start["to"], "schedule");
        assert_eq!(start["from"], "memo");
        assert_eq!(chain.end_event().kind, EventKind::HandoffEnd);
        assert_eq!(
            chain
                .fail_event(HandoffFailReason::TargetExecution, "boom")
                .kind,
            EventKind::HandoffFail
        );
    }
}
