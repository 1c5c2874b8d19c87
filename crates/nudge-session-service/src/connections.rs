// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live connections, owned by the hub runtime rather than by any actor.
//!
//! Actors look the set up again for every broadcast, so an actor can be
//! evicted and respawned without missing connections that came or went in
//! between.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use nudge_core::ProjectId;
use tokio::sync::mpsc;
use tracing::debug;

/// Connection identifier, unique for the lifetime of the hub.
pub type ConnId = u64;

/// Outbox of one connection: encoded frames waiting for its writer task.
pub type Outbox = mpsc::Sender<Vec<u8>>;

struct Follower {
    outbox: Outbox,
    greeted: bool,
}

#[derive(Default)]
struct Inner {
    next_id: ConnId,
    projects: HashMap<ProjectId, BTreeMap<ConnId, Follower>>,
}

/// Shared registry of which connection follows which project.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `outbox` as a follower of `project`, receiving broadcasts
    /// straight away.
    pub fn attach(&self, project: &str, outbox: Outbox) -> ConnId {
        self.insert(project, outbox, true)
    }

    /// Register `outbox` as a follower that receives no broadcasts until
    /// [`greeted`](Self::greeted) marks it. Direct sends still reach it.
    pub fn attach_pending(&self, project: &str, outbox: Outbox) -> ConnId {
        self.insert(project, outbox, false)
    }

    fn insert(&self, project: &str, outbox: Outbox, greeted: bool) -> ConnId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .projects
            .entry(project.to_owned())
            .or_default()
            .insert(id, Follower { outbox, greeted });
        debug!(project, conn = id, greeted, "connection attached");
        id
    }

    /// Let a pending follower receive broadcasts. Unknown ids are ignored.
    pub fn greeted(&self, project: &str, conn: ConnId) {
        let mut inner = self.lock();
        if let Some(follower) = inner.projects.get_mut(project).and_then(|c| c.get_mut(&conn)) {
            follower.greeted = true;
        }
    }

    /// Forget a connection. Unknown ids are ignored.
    pub fn detach(&self, project: &str, conn: ConnId) {
        let mut inner = self.lock();
        if let Some(conns) = inner.projects.get_mut(project) {
            conns.remove(&conn);
            if conns.is_empty() {
                inner.projects.remove(project);
            }
        }
        debug!(project, conn, "connection detached");
    }

    /// Connections currently following `project`.
    pub fn live(&self, project: &str) -> Vec<ConnId> {
        self.lock()
            .projects
            .get(project)
            .map(|conns| conns.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Queue `frame` for one connection. Returns whether it was queued.
    pub fn send_to(&self, project: &str, conn: ConnId, frame: Vec<u8>) -> bool {
        let outbox = self
            .lock()
            .projects
            .get(project)
            .and_then(|c| c.get(&conn))
            .map(|f| f.outbox.clone());
        match outbox {
            Some(outbox) => match outbox.try_send(frame) {
                Ok(()) => true,
                Err(err) => {
                    debug!(project, conn, %err, "dropping frame for connection");
                    false
                }
            },
            None => false,
        }
    }

    /// Queue `frame` for every greeted follower of `project`.
    ///
    /// A full or closed outbox loses this frame only; delivery to the other
    /// connections goes on. Returns how many connections accepted it.
    pub fn broadcast(&self, project: &str, frame: &[u8]) -> usize {
        let targets: Vec<(ConnId, Outbox)> = self
            .lock()
            .projects
            .get(project)
            .map(|conns| {
                conns
                    .iter()
                    .filter(|(_, f)| f.greeted)
                    .map(|(id, f)| (*id, f.outbox.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut delivered = 0;
        for (conn, outbox) in targets {
            match outbox.try_send(frame.to_vec()) {
                Ok(()) => delivered += 1,
                Err(err) => debug!(project, conn, %err, "dropping broadcast for connection"),
            }
        }
        delivered
    }
}
