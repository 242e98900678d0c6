//! Request options for `read`/`observe`, with the client-side pre-flight
//! validation the store itself never sees.

use cqrs_es_core::{CoreError, EventId, NonTransientKind};
use serde::Serialize;

/// Ordering for a bounded `read` (meaningless for `observe`, which is
/// always store order).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Order {
    /// Oldest first.
    Chronological,
    /// Newest first.
    Antichronological,
}

/// What to do when [`Options::from_latest_event`] names a type with no
/// matching event yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum IfEventIsMissing {
    /// Treat the call as if no events exist yet.
    ReadNothing,
    /// Fall back to reading from the beginning.
    ReadEverything,
}

/// Anchor a read/observe at the most recent event of a given type on a
/// subject.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FromLatestEvent {
    /// The subject to search for the anchoring event.
    pub subject: String,
    /// The wire type string of the anchoring event.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Fallback behavior when no matching event exists.
    pub if_event_is_missing: IfEventIsMissing,
}

/// Options accompanying a `read` or `observe` call.
///
/// Constructed only via [`Options::builder`], which rejects (without
/// contacting the store) any combination this type cannot represent safely:
/// mutually-exclusive bounds, or ordering/upper-bound options paired with
/// `observe`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Options {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) recursive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) order: Option<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) lower_bound_inclusive: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) lower_bound_exclusive: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) upper_bound_inclusive: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) upper_bound_exclusive: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) from_latest_event: Option<FromLatestEvent>,
}

impl Options {
    /// No options: a non-recursive, unbounded, store-order read/observe.
    #[must_use]
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Whether descendants of the subject are included.
    ///
    /// Exposed for [`crate::StoreClient`] implementors (e.g. an in-memory
    /// test double) that must filter locally rather than delegating to the
    /// store's own query evaluation.
    #[must_use]
    pub const fn recursive_flag(&self) -> bool {
        self.recursive
    }

    /// The requested read order, if any.
    #[must_use]
    pub const fn order_option(&self) -> Option<Order> {
        self.order
    }

    /// The inclusive lower bound, if any.
    #[must_use]
    pub const fn lower_bound_inclusive_id(&self) -> Option<&EventId> {
        self.lower_bound_inclusive.as_ref()
    }

    /// The exclusive lower bound, if any.
    #[must_use]
    pub const fn lower_bound_exclusive_id(&self) -> Option<&EventId> {
        self.lower_bound_exclusive.as_ref()
    }

    /// The inclusive upper bound, if any.
    #[must_use]
    pub const fn upper_bound_inclusive_id(&self) -> Option<&EventId> {
        self.upper_bound_inclusive.as_ref()
    }

    /// The exclusive upper bound, if any.
    #[must_use]
    pub const fn upper_bound_exclusive_id(&self) -> Option<&EventId> {
        self.upper_bound_exclusive.as_ref()
    }

    /// The anchoring event for `fromLatestEvent`, if any.
    #[must_use]
    pub const fn from_latest_event_anchor(&self) -> Option<&FromLatestEvent> {
        self.from_latest_event.as_ref()
    }
}

/// Builder for [`Options`], validated on [`OptionsBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct OptionsBuilder {
    recursive: bool,
    order: Option<Order>,
    lower_bound_inclusive: Option<EventId>,
    lower_bound_exclusive: Option<EventId>,
    upper_bound_inclusive: Option<EventId>,
    upper_bound_exclusive: Option<EventId>,
    from_latest_event: Option<FromLatestEvent>,
}

impl OptionsBuilder {
    /// Include descendants of the subject.
    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the read order. Rejected for `observe` at [`Self::build_for_observe`].
    #[must_use]
    pub const fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn lower_bound_inclusive(mut self, id: EventId) -> Self {
        self.lower_bound_inclusive = Some(id);
        self
    }

    #[must_use]
    pub fn lower_bound_exclusive(mut self, id: EventId) -> Self {
        self.lower_bound_exclusive = Some(id);
        self
    }

    #[must_use]
    pub fn upper_bound_inclusive(mut self, id: EventId) -> Self {
        self.upper_bound_inclusive = Some(id);
        self
    }

    #[must_use]
    pub fn upper_bound_exclusive(mut self, id: EventId) -> Self {
        self.upper_bound_exclusive = Some(id);
        self
    }

    #[must_use]
    pub fn from_latest_event(mut self, anchor: FromLatestEvent) -> Self {
        self.from_latest_event = Some(anchor);
        self
    }

    fn check_bounds(&self) -> Result<(), CoreError> {
        if self.lower_bound_inclusive.is_some() && self.lower_bound_exclusive.is_some() {
            return Err(invalid_usage(
                "lowerBoundInclusive and lowerBoundExclusive are mutually exclusive",
            ));
        }
        if self.upper_bound_inclusive.is_some() && self.upper_bound_exclusive.is_some() {
            return Err(invalid_usage(
                "upperBoundInclusive and upperBoundExclusive are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Validate and build options for a bounded `read` call.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::InvalidUsage`] if both bounds of a pair
    /// (lower or upper) are set.
    pub fn build_for_read(self) -> Result<Options, CoreError> {
        self.check_bounds()?;
        Ok(self.into_options())
    }

    /// Validate and build options for an `observe` call.
    ///
    /// # Errors
    ///
    /// Returns [`NonTransientKind::InvalidUsage`] if both bounds of the lower
    /// pair are set, or if an order or upper bound is specified (neither is
    /// meaningful for a never-ending stream).
    pub fn build_for_observe(self) -> Result<Options, CoreError> {
        if self.order.is_some() {
            return Err(invalid_usage("order is not valid for observe"));
        }
        if self.upper_bound_inclusive.is_some() || self.upper_bound_exclusive.is_some() {
            return Err(invalid_usage("upper bounds are not valid for observe"));
        }
        if self.lower_bound_inclusive.is_some() && self.lower_bound_exclusive.is_some() {
            return Err(invalid_usage(
                "lowerBoundInclusive and lowerBoundExclusive are mutually exclusive",
            ));
        }
        Ok(self.into_options())
    }

    fn into_options(self) -> Options {
        Options {
            recursive: self.recursive,
            order: self.order,
            lower_bound_inclusive: self.lower_bound_inclusive,
            lower_bound_exclusive: self.lower_bound_exclusive,
            upper_bound_inclusive: self.upper_bound_inclusive,
            upper_bound_exclusive: self.upper_bound_exclusive,
            from_latest_event: self.from_latest_event,
        }
    }
}

fn invalid_usage(message: &str) -> CoreError {
    CoreError::NonTransient(NonTransientKind::InvalidUsage(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_lower_bounds() {
        let result = Options::builder()
            .lower_bound_inclusive(EventId::new("a"))
            .lower_bound_exclusive(EventId::new("b"))
            .build_for_read();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_both_upper_bounds() {
        let result = Options::builder()
            .upper_bound_inclusive(EventId::new("a"))
            .upper_bound_exclusive(EventId::new("b"))
            .build_for_read();
        assert!(result.is_err());
    }

    #[test]
    fn observe_rejects_order() {
        let result = Options::builder().order(Order::Chronological).build_for_observe();
        assert!(result.is_err());
    }

    #[test]
    fn observe_rejects_upper_bound() {
        let result = Options::builder()
            .upper_bound_inclusive(EventId::new("a"))
            .build_for_observe();
        assert!(result.is_err());
    }

    #[test]
    fn observe_accepts_lower_bound_exclusive() {
        let result = Options::builder()
            .lower_bound_exclusive(EventId::new("a"))
            .recursive(true)
            .build_for_observe();
        assert!(result.is_ok());
    }

    #[test]
    fn read_accepts_single_bound_each_side() {
        let result = Options::builder()
            .lower_bound_inclusive(EventId::new("a"))
            .upper_bound_exclusive(EventId::new("b"))
            .order(Order::Antichronological)
            .build_for_read();
        assert!(result.is_ok());
    }
}
