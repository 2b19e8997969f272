pub mod cohorting;
pub mod converters;
pub mod events;
pub mod generators;

pub use cohorting::{CohortRecord, CohortSpec, CohortedData, CohortingError, bin_timestamps};
pub use converters::{to_canonical, to_compact};
pub use events::{
    CanonicalEvent, ColumnLabels, CompactEvent, DataError, DataFormat, TransitionPair,
};
