//! Sticky last route per conversation
//!
//! Confirmations and short follow-ups only make sense against the route the
//! conversation took last. Entries expire after the configured TTL so an old
//! conversation picked up again is routed from scratch.

use dashmap::DashMap;
use parley_core::{ConversationId, RouteResult};
use std::time::Duration;
use tokio::time::Instant;

/// Last resolved route of each live conversation
#[derive(Debug)]
pub struct LastRoutes {
    routes: DashMap<ConversationId, (RouteResult, Instant)>,
    ttl: Duration,
}

impl LastRoutes {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            routes: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Route still in its window; a stale entry is dropped on the way out
    #[must_use]
    pub fn get(&self, conversation: ConversationId) -> Option<RouteResult> {
        let (route, at) = self.routes.get(&conversation).map(|e| e.value().clone())?;
        if at.elapsed() > self.ttl {
            self.routes
                .remove_if(&conversation, |_, (_, current)| *current == at);
            return None;
        }
        Some(route)
    }

    /// Remember `route` if it resolved to a handler of a persisted conversation
    pub fn set(&self, conversation: ConversationId, route: &RouteResult) {
        if !conversation.is_persisted() || !route.is_resolved() {
            return;
        }
        self.routes
            .insert(conversation, (route.clone(), Instant::now()));
    }

    pub fn forget(&self, conversation: ConversationId) {
        self.routes.remove(&conversation);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Intent, RouteLayer};

    fn schedule() -> RouteResult {
        RouteResult::resolved(Intent::ScheduleCreate, RouteLayer::Rule, 0.9)
    }

    #[tokio::test(start_paused = true)]
    async fn routes_expire_after_ttl() {
        let routes = LastRoutes::new(Duration::from_secs(300));
        routes.set(ConversationId(7), &schedule());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(routes.get(ConversationId(7)), Some(schedule()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(routes.get(ConversationId(7)), None);
        assert!(routes.is_empty());
    }

    #[test]
    fn only_resolved_routes_of_persisted_conversations_stick() {
        let routes = LastRoutes::new(Duration::from_secs(300));
        routes.set(ConversationId::NEW, &schedule());
        routes.set(ConversationId(3), &RouteResult::decompose());
        assert!(routes.is_empty());

        routes.set(ConversationId(3), &schedule());
        assert_eq!(routes.len(), 1);
        routes.forget(ConversationId(3));
        assert_eq!(routes.get(ConversationId(3)), None);
    }
}
