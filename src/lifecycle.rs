//! Maps Raft role transitions onto the application-visible lifecycle
//! state, grounded in `fsros/src/cluster_node_impl.hpp`'s
//! `ClusterNodeImpl`, which keeps a `std::list<std::weak_ptr<...>>` of
//! publishers and prunes dead ones on every fan-out via `visit_publishers`.

use std::sync::{Mutex, Weak};

use crate::data::Role;

/// The application-visible activation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Standby,
    Active,
    Inactive,
}

impl LifecycleState {
    pub fn from_role(role: Role) -> Self {
        match role {
            Role::Leader => LifecycleState::Active,
            Role::Follower | Role::Candidate => LifecycleState::Inactive,
            Role::Standby => LifecycleState::Standby,
        }
    }
}

/// Implemented by application publishers that need to know when to
/// activate/deactivate. Held weakly: a publisher that's been dropped is
/// simply pruned on the next transition instead of kept alive.
pub trait LifecyclePublisher: Send + Sync {
    fn on_standby(&self) {}
    fn on_activated(&self) {}
    fn on_deactivated(&self) {}
}

/// Host-level callbacks, registered once at construction -- analogous to
/// `ClusterNodeImpl`'s own `handle(lifecycle::StateType)` override, which
/// always runs before publishers are visited.
pub trait LifecycleHost: Send + Sync {
    fn on_standby(&self) {}
    fn on_activated(&self) {}
    fn on_deactivated(&self) {}
}

#[derive(Default)]
pub struct LifecycleBridge {
    host: Option<Box<dyn LifecycleHost>>,
    publishers: Mutex<Vec<Weak<dyn LifecyclePublisher>>>,
    current: Mutex<Option<LifecycleState>>,
}

impl LifecycleBridge {
    pub fn new(host: Option<Box<dyn LifecycleHost>>) -> Self {
        LifecycleBridge { host, publishers: Mutex::new(Vec::new()), current: Mutex::new(None) }
    }

    pub fn add_publisher(&self, publisher: Weak<dyn LifecyclePublisher>) {
        self.publishers.lock().unwrap().push(publisher);
    }

    pub fn current(&self) -> Option<LifecycleState> {
        *self.current.lock().unwrap()
    }

    /// Maps `role` to a lifecycle state and, if it differs from the last
    /// one observed, fans it out to the host first and then to every
    /// still-live publisher, pruning dead weak references as it goes.
    pub fn on_role_changed(&self, role: Role) {
        let state = LifecycleState::from_role(role);
        {
            let mut current = self.current.lock().unwrap();
            if *current == Some(state) {
                return;
            }
            *current = Some(state);
        }

        if let Some(host) = &self.host {
            dispatch_host(host.as_ref(), state);
        }

        let mut publishers = self.publishers.lock().unwrap();
        publishers.retain(|weak| {
            if let Some(publisher) = weak.upgrade() {
                dispatch_publisher(publisher.as_ref(), state);
                true
            } else {
                false
            }
        });
    }
}

fn dispatch_host(host: &dyn LifecycleHost, state: LifecycleState) {
    match state {
        LifecycleState::Standby => host.on_standby(),
        LifecycleState::Active => host.on_activated(),
        LifecycleState::Inactive => host.on_deactivated(),
    }
}

fn dispatch_publisher(publisher: &dyn LifecyclePublisher, state: LifecycleState) {
    match state {
        LifecycleState::Standby => publisher.on_standby(),
        LifecycleState::Active => publisher.on_activated(),
        LifecycleState::Inactive => publisher.on_deactivated(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHost {
        activated: AtomicUsize,
        deactivated: AtomicUsize,
        standby: AtomicUsize,
    }

    impl LifecycleHost for Arc<CountingHost> {
        fn on_standby(&self) {
            self.standby.fetch_add(1, Ordering::SeqCst);
        }
        fn on_activated(&self) {
            self.activated.fetch_add(1, Ordering::SeqCst);
        }
        fn on_deactivated(&self) {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn leader_activates_and_follower_deactivates() {
        let host = Arc::new(CountingHost {
            activated: AtomicUsize::new(0),
            deactivated: AtomicUsize::new(0),
            standby: AtomicUsize::new(0),
        });
        let bridge = LifecycleBridge::new(Some(Box::new(host.clone())));

        bridge.on_role_changed(Role::Follower);
        bridge.on_role_changed(Role::Candidate); // still Inactive, no re-dispatch
        bridge.on_role_changed(Role::Leader);
        bridge.on_role_changed(Role::Follower);

        assert_eq!(host.deactivated.load(Ordering::SeqCst), 2);
        assert_eq!(host.activated.load(Ordering::SeqCst), 1);
    }

    struct RecordingPublisher {
        activations: Mutex<Vec<LifecycleState>>,
    }

    impl LifecyclePublisher for RecordingPublisher {
        fn on_standby(&self) {
            self.activations.lock().unwrap().push(LifecycleState::Standby);
        }
        fn on_activated(&self) {
            self.activations.lock().unwrap().push(LifecycleState::Active);
        }
        fn on_deactivated(&self) {
            self.activations.lock().unwrap().push(LifecycleState::Inactive);
        }
    }

    #[test]
    fn dead_publishers_are_pruned() {
        let bridge = LifecycleBridge::new(None);
        let publisher = Arc::new(RecordingPublisher { activations: Mutex::new(Vec::new()) });
        bridge.add_publisher(Arc::downgrade(&(publisher.clone() as Arc<dyn LifecyclePublisher>)));

        bridge.on_role_changed(Role::Leader);
        assert_eq!(publisher.activations.lock().unwrap().len(), 1);

        drop(publisher);
        // No panic, and the dead entry is silently dropped on next fan-out.
        bridge.on_role_changed(Role::Follower);
        assert_eq!(bridge.publishers.lock().unwrap().len(), 0);
    }
}
