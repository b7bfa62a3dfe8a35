// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Translates kube watcher streams into the add/update/delete/synced
//! callbacks the coordinator consumes. A per-kind last-seen store
//! synthesizes the `previous` object for updates and turns relist gaps into
//! deletions.

use futures::{StreamExt, TryStreamExt};
use kube::api::Api;
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sink for one resource kind's events.
pub trait WatchHandler<K>: Send + Sync {
    /// Called for every observed mutation: `(None, Some)` add,
    /// `(Some, Some)` update, `(Some, None)` delete.
    fn on_change(&self, previous: Option<&K>, current: Option<&K>);
    /// Called once the initial listing has fully propagated.
    fn on_synced(&self);
}

enum Callback<K> {
    Change {
        previous: Option<K>,
        current: Option<K>,
    },
    Synced,
}

struct WatchState<K> {
    store: HashMap<String, K>,
    seen: HashSet<String>,
    synced: bool,
}

fn key_of<K: Resource>(object: &K) -> String {
    format!(
        "{}/{}",
        object.meta().namespace.as_deref().unwrap_or_default(),
        object.meta().name.as_deref().unwrap_or_default()
    )
}

impl<K: Resource + Clone> WatchState<K> {
    fn new() -> Self {
        Self {
            store: HashMap::new(),
            seen: HashSet::new(),
            synced: false,
        }
    }

    fn upsert(&mut self, object: K) -> Vec<Callback<K>> {
        let previous = self.store.insert(key_of(&object), object.clone());
        vec![Callback::Change {
            previous,
            current: Some(object),
        }]
    }

    fn handle(&mut self, event: Event<K>) -> Vec<Callback<K>> {
        match event {
            Event::Init => {
                self.seen.clear();
                Vec::new()
            }
            Event::InitApply(object) => {
                self.seen.insert(key_of(&object));
                self.upsert(object)
            }
            Event::Apply(object) => self.upsert(object),
            Event::Delete(object) => {
                let previous = self.store.remove(&key_of(&object));
                vec![Callback::Change {
                    previous: previous.or(Some(object)),
                    current: None,
                }]
            }
            Event::InitDone => {
                // objects that vanished while the watch was disconnected
                let stale: Vec<String> = self
                    .store
                    .keys()
                    .filter(|key| !self.seen.contains(*key))
                    .cloned()
                    .collect();
                let mut callbacks: Vec<Callback<K>> = stale
                    .into_iter()
                    .filter_map(|key| {
                        self.store.remove(&key).map(|previous| Callback::Change {
                            previous: Some(previous),
                            current: None,
                        })
                    })
                    .collect();
                if !self.synced {
                    self.synced = true;
                    callbacks.push(Callback::Synced);
                }
                callbacks
            }
        }
    }
}

/// Watches one resource kind until cancellation, delivering callbacks to
/// `handler`. Watch errors are logged; the stream reconnects with backoff.
pub async fn watch_resource<K, H>(api: Api<K>, handler: H, cancel: CancellationToken)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    H: WatchHandler<K>,
{
    let mut state = WatchState::new();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(event)) => {
                for callback in state.handle(event) {
                    match callback {
                        Callback::Change { previous, current } => {
                            handler.on_change(previous.as_ref(), current.as_ref());
                        }
                        Callback::Synced => handler.on_synced(),
                    }
                }
            }
            Ok(None) => {
                debug!("watch stream ended");
                break;
            }
            Err(err) => {
                warn!(%err, "watch error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn namespace(name: &str, label: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                labels: Some([("v".to_owned(), label.to_owned())].into()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    fn changes(callbacks: Vec<Callback<Namespace>>) -> Vec<(Option<String>, Option<String>)> {
        callbacks
            .into_iter()
            .filter_map(|cb| match cb {
                Callback::Change { previous, current } => Some((
                    previous.and_then(|ns| ns.metadata.name),
                    current.and_then(|ns| ns.metadata.name),
                )),
                Callback::Synced => None,
            })
            .collect()
    }

    #[test]
    fn apply_synthesizes_previous_from_the_store() {
        let mut state = WatchState::new();
        let v1 = namespace("a", "1");
        let v2 = namespace("a", "2");

        let first = state.handle(Event::Apply(v1.clone()));
        assert_eq!(changes(first), vec![(None, Some("a".to_owned()))]);

        let second = state.handle(Event::Apply(v2));
        let Callback::Change { previous, .. } = &second[0] else {
            panic!("expected change");
        };
        assert_eq!(previous.as_ref().unwrap().metadata.labels, v1.metadata.labels);
    }

    #[test]
    fn init_done_emits_synced_once_and_prunes_stale_keys() {
        let mut state = WatchState::new();
        state.handle(Event::Init);
        state.handle(Event::InitApply(namespace("a", "1")));
        let callbacks = state.handle(Event::InitDone);
        assert!(matches!(callbacks.last(), Some(Callback::Synced)));

        // relist without "a": it must be reported deleted, and no second
        // synced callback fires
        state.handle(Event::Init);
        state.handle(Event::InitApply(namespace("b", "1")));
        let callbacks = state.handle(Event::InitDone);
        let changed = changes(callbacks);
        assert_eq!(changed, vec![(Some("a".to_owned()), None)]);
        assert!(state.store.contains_key("/b"));
    }

    #[test]
    fn delete_prefers_the_stored_object() {
        let mut state = WatchState::new();
        state.handle(Event::Apply(namespace("a", "1")));
        let callbacks = state.handle(Event::Delete(namespace("a", "9")));
        let Callback::Change { previous, current } = &callbacks[0] else {
            panic!("expected change");
        };
        assert!(current.is_none());
        // the last-seen object, not the tombstone payload
        assert_eq!(
            previous.as_ref().unwrap().metadata.labels.as_ref().unwrap()["v"],
            "1"
        );
    }
}
