//! The dispatch loop driving one `decide(reference_id)` run or one
//! enhancement-request lifecycle event to completion.

use std::collections::VecDeque;
use std::marker::PhantomData;

use anyhow::{bail, Result};

use crate::traits::{EventLike, EventPersister, Reducer, Router};

/// Both of DESTINY's lifecycles settle in a handful of hops: the dedup
/// phases run at most 1→2→3→4, and `DecisionStale` retries are a bounded
/// loop inside phase 4 itself rather than new dispatch-loop events. This
/// cap isn't reached by correct routing — it exists so a router bug that
/// keeps emitting children can't turn into an unbounded write storm
/// against the event store.
const MAX_CAUSAL_CHAIN_LEN: usize = 64;

/// Generic event dispatch engine.
///
/// Persist → reduce → route → recurse until settled.
/// Causal chaining is automatic: child events reference their trigger's seq.
pub struct Engine<E, S, D, Red, Rout, P>
where
    E: EventLike,
    S: Send,
    D: Send + Sync,
    Red: Reducer<E, S>,
    Rout: Router<E, S, D>,
    P: EventPersister,
{
    reducer: Red,
    router: Rout,
    persister: P,
    run_id: String,
    /// Subsystem name stored alongside every event this engine persists —
    /// `"dedup"` or `"orchestrator"`, never anything a caller supplies
    /// per-dispatch, since one `Engine` only ever drives one lifecycle.
    actor: String,
    _phantom: PhantomData<fn() -> (E, S, D)>,
}

impl<E, S, D, Red, Rout, P> Engine<E, S, D, Red, Rout, P>
where
    E: EventLike,
    S: Send,
    D: Send + Sync,
    Red: Reducer<E, S>,
    Rout: Router<E, S, D>,
    P: EventPersister,
{
    pub fn new(reducer: Red, router: Rout, persister: P, run_id: String, actor: impl Into<String>) -> Self {
        Self {
            reducer,
            router,
            persister,
            run_id,
            actor: actor.into(),
            _phantom: PhantomData,
        }
    }

    /// Dispatch an event. Persists it, reduces state, routes to handler,
    /// and processes any emitted child events until the queue is empty.
    pub async fn dispatch(&self, event: E, state: &mut S, deps: &D) -> Result<()> {
        let mut queue: VecDeque<(E, Option<i64>)> = VecDeque::new();
        queue.push_back((event, None));
        let mut hops = 0usize;

        while let Some((evt, parent_seq)) = queue.pop_front() {
            hops += 1;
            if hops > MAX_CAUSAL_CHAIN_LEN {
                bail!(
                    "run {} exceeded {MAX_CAUSAL_CHAIN_LEN} causal hops — a router is probably emitting events in a cycle",
                    self.run_id
                );
            }

            // 1. Persist with causal chain
            let stored = match parent_seq {
                None => {
                    self.persister
                        .persist(evt.event_type_str(), evt.to_persist_payload(), &self.run_id, &self.actor)
                        .await?
                }
                Some(parent) => {
                    self.persister
                        .persist_child(
                            parent,
                            evt.event_type_str(),
                            evt.to_persist_payload(),
                            &self.run_id,
                            &self.actor,
                        )
                        .await?
                }
            };

            // 2. Reduce (pure state update)
            self.reducer.reduce(state, &evt);

            // 3. Route (may do I/O, may emit new events)
            let children = self.router.route(&evt, &stored, state, deps).await?;

            // 4. Enqueue children (chained off this event)
            for child in children {
                queue.push_back((child, Some(stored.seq)));
            }
        }

        Ok(())
    }

    /// Read-only access to the run ID.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}
