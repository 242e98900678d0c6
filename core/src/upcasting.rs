//! Ad-hoc migration of old event versions/types to current ones while
//! reading (spec §4.4).

use crate::error::{CoreError, NonTransientKind};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// The bound on fixed-point iteration before [`UpcasterChain::upcast`] gives
/// up and reports a divergence. A genuine upcaster chain is a handful of
/// steps deep; 64 generously covers any real migration history while still
/// catching a cyclic pair of type-swapping upcasters quickly.
const MAX_ITERATIONS: usize = 64;

/// The minimal `(type, data)` pair an upcaster reads and rewrites, ahead of
/// type resolution and payload deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpcastableEvent {
    /// The wire type string.
    pub event_type: String,
    /// The event's `data` envelope.
    pub data: serde_json::Value,
}

/// Ad-hoc, in-memory migration step from one event representation to one or
/// more successor representations.
pub trait Upcaster: Send + Sync {
    /// Whether this upcaster applies to `event`.
    fn can_upcast(&self, event: &UpcastableEvent) -> bool;

    /// Produce zero or more successor events replacing `event`.
    ///
    /// Called only when [`Upcaster::can_upcast`] returned `true`. Returning
    /// zero successors drops the event (e.g. an event type retired without
    /// replacement); returning more than one splits it (e.g. a coarse event
    /// replaced by several fine-grained ones).
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::Marshalling`] if the upcaster cannot
    /// produce well-formed output for this input.
    fn upcast(&self, event: &UpcastableEvent) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError>;
}

/// An ordered list of [`Upcaster`]s, applied to a fixed point.
///
/// At each step, at most one upcaster in the list may claim a given event;
/// if more than one does, that is an `Ambiguous` configuration error, not a
/// silent pick. Events not claimed by any upcaster pass through unchanged.
pub struct UpcasterChain {
    upcasters: Vec<Box<dyn Upcaster>>,
}

impl UpcasterChain {
    /// An empty chain (every event passes through unchanged).
    #[must_use]
    pub fn new() -> Self {
        Self {
            upcasters: Vec::new(),
        }
    }

    /// Append an upcaster to the chain. Order matters only in that earlier
    /// upcasters are checked first at each step; at most one may ever match
    /// a given event.
    #[must_use]
    pub fn with(mut self, upcaster: impl Upcaster + 'static) -> Self {
        self.upcasters.push(Box::new(upcaster));
        self
    }

    /// Apply the chain to `event` until no upcaster in the list matches any
    /// of the resulting events, i.e. until a fixed point is reached.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::Ambiguous`] if more than one upcaster
    /// claims the same event at some step, or if the chain does not reach a
    /// fixed point within its iteration bound (a cyclic pair of type-swapping
    /// upcasters is a configuration error, not a runtime retry case).
    pub fn upcast(
        &self,
        event: UpcastableEvent,
    ) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError> {
        let mut pending: SmallVec<[UpcastableEvent; 2]> = SmallVec::new();
        pending.push(event);

        for _ in 0..MAX_ITERATIONS {
            let mut any_matched = false;
            let mut next: SmallVec<[UpcastableEvent; 2]> = SmallVec::new();

            for candidate in pending {
                let matching: Vec<&Box<dyn Upcaster>> = self
                    .upcasters
                    .iter()
                    .filter(|u| u.can_upcast(&candidate))
                    .collect();

                match matching.len() {
                    0 => next.push(candidate),
                    1 => {
                        any_matched = true;
                        next.extend(matching[0].upcast(&candidate)?);
                    }
                    _ => {
                        return Err(CoreError::NonTransient(NonTransientKind::Ambiguous(
                            format!(
                                "more than one upcaster claims event type {}",
                                candidate.event_type
                            ),
                        )));
                    }
                }
            }

            pending = next;
            if !any_matched {
                return Ok(pending);
            }
        }

        Err(CoreError::NonTransient(NonTransientKind::Ambiguous(
            format!("upcaster chain did not converge within {MAX_ITERATIONS} iterations"),
        )))
    }
}

impl Default for UpcasterChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RenameV1ToV2;
    impl Upcaster for RenameV1ToV2 {
        fn can_upcast(&self, event: &UpcastableEvent) -> bool {
            event.event_type == "book.added.v1"
        }

        fn upcast(&self, event: &UpcastableEvent) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError> {
            let mut data = event.data.clone();
            if let Some(obj) = data.get_mut("payload").and_then(|p| p.as_object_mut()) {
                obj.insert("edition".to_string(), serde_json::json!(1));
            }
            let mut out = SmallVec::new();
            out.push(UpcastableEvent {
                event_type: "book.added.v2".to_string(),
                data,
            });
            Ok(out)
        }
    }

    struct SplitShipped;
    impl Upcaster for SplitShipped {
        fn can_upcast(&self, event: &UpcastableEvent) -> bool {
            event.event_type == "order.shipped.v1"
        }

        fn upcast(&self, _event: &UpcastableEvent) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError> {
            let mut out = SmallVec::new();
            out.push(UpcastableEvent {
                event_type: "order.packed.v1".to_string(),
                data: serde_json::json!({"metadata": {}, "payload": {}}),
            });
            out.push(UpcastableEvent {
                event_type: "order.dispatched.v1".to_string(),
                data: serde_json::json!({"metadata": {}, "payload": {}}),
            });
            Ok(out)
        }
    }

    struct CyclicAToB;
    impl Upcaster for CyclicAToB {
        fn can_upcast(&self, event: &UpcastableEvent) -> bool {
            event.event_type == "a"
        }
        fn upcast(&self, _event: &UpcastableEvent) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError> {
            let mut out = SmallVec::new();
            out.push(UpcastableEvent {
                event_type: "b".to_string(),
                data: serde_json::json!({}),
            });
            Ok(out)
        }
    }

    struct CyclicBToA;
    impl Upcaster for CyclicBToA {
        fn can_upcast(&self, event: &UpcastableEvent) -> bool {
            event.event_type == "b"
        }
        fn upcast(&self, _event: &UpcastableEvent) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError> {
            let mut out = SmallVec::new();
            out.push(UpcastableEvent {
                event_type: "a".to_string(),
                data: serde_json::json!({}),
            });
            Ok(out)
        }
    }

    #[test]
    fn unmatched_event_passes_through() {
        let chain = UpcasterChain::new().with(RenameV1ToV2);
        let event = UpcastableEvent {
            event_type: "book.lent.v1".to_string(),
            data: serde_json::json!({"metadata": {}, "payload": {}}),
        };
        let result = chain.upcast(event.clone()).unwrap();
        assert_eq!(result.as_slice(), &[event]);
    }

    #[test]
    fn rewrites_type_and_data() {
        let chain = UpcasterChain::new().with(RenameV1ToV2);
        let event = UpcastableEvent {
            event_type: "book.added.v1".to_string(),
            data: serde_json::json!({"metadata": {}, "payload": {"isbn": "X"}}),
        };
        let result = chain.upcast(event).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].event_type, "book.added.v2");
        assert_eq!(result[0].data["payload"]["edition"], 1);
    }

    #[test]
    fn one_to_many_split() {
        let chain = UpcasterChain::new().with(SplitShipped);
        let event = UpcastableEvent {
            event_type: "order.shipped.v1".to_string(),
            data: serde_json::json!({"metadata": {}, "payload": {}}),
        };
        let result = chain.upcast(event).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].event_type, "order.packed.v1");
        assert_eq!(result[1].event_type, "order.dispatched.v1");
    }

    #[test]
    fn ambiguous_match_is_an_error() {
        struct AlsoMatchesV1;
        impl Upcaster for AlsoMatchesV1 {
            fn can_upcast(&self, event: &UpcastableEvent) -> bool {
                event.event_type == "book.added.v1"
            }
            fn upcast(
                &self,
                event: &UpcastableEvent,
            ) -> Result<SmallVec<[UpcastableEvent; 2]>, CoreError> {
                let mut out = SmallVec::new();
                out.push(event.clone());
                Ok(out)
            }
        }

        let chain = UpcasterChain::new().with(RenameV1ToV2).with(AlsoMatchesV1);
        let event = UpcastableEvent {
            event_type: "book.added.v1".to_string(),
            data: serde_json::json!({"metadata": {}, "payload": {}}),
        };
        assert!(chain.upcast(event).is_err());
    }

    #[test]
    fn cyclic_upcasters_fail_to_converge() {
        let chain = UpcasterChain::new().with(CyclicAToB).with(CyclicBToA);
        let event = UpcastableEvent {
            event_type: "a".to_string(),
            data: serde_json::json!({}),
        };
        assert!(chain.upcast(event).is_err());
    }

    #[test]
    fn already_final_event_is_identity() {
        let chain = UpcasterChain::new().with(RenameV1ToV2);
        let event = UpcastableEvent {
            event_type: "book.added.v2".to_string(),
            data: serde_json::json!({"metadata": {}, "payload": {"isbn": "X", "edition": 1}}),
        };
        let first = chain.upcast(event.clone()).unwrap();
        let second = chain.upcast(first[0].clone()).unwrap();
        assert_eq!(first.as_slice(), second.as_slice());
    }
}
