//! Pure computation engines over the journal model.

pub mod itm;
pub mod position;
pub mod reconcile;

pub use itm::{classify, Itm, ItmColor};
pub use position::{derive, refresh, DerivedState};
pub use reconcile::{
    reconcile, BrokerPosition, LocalPosition, MatchStatus, PositionKey, ReconcileEntry,
    ReconcileOutcome, ReconcileReport, Reconciler,
};
