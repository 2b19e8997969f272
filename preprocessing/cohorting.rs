//! Binning of irregularly timed observations into fixed cohort intervals.
//!
//! Every entity receives one row per cohort point `0..=cohorts`. The representative state of a
//! point is the last observation falling into it; points without observations carry the
//! previous point forward, and the initial point stays empty until the entity is first seen.

use crate::preprocessing::events::CompactEvent;
use itertools::Itertools;
use serde::Serialize;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CohortingError {
    #[error("At least one cohort is required.")]
    NoCohorts,
    #[error("Cohort bounds need at least two values, found {0}.")]
    TooFewBounds(usize),
    #[error("Cohort bounds must be strictly increasing: bound {index} ({value}) follows {previous}.")]
    UnorderedBounds {
        index: usize,
        value: f64,
        previous: f64,
    },
    #[error("No event carries a finite time and a known state; cohort bounds cannot be derived.")]
    NoValidEvents,
    #[error("Failed to write cohorted data: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the cohort grid is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum CohortSpec {
    /// Equal-width intervals spanning the observed time range.
    Count(usize),
    /// Explicit ascending interval boundaries.
    Bounds(Vec<f64>),
}

/// One `(entity, cohort point)` row of the dense output grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Cohort")]
    pub cohort: usize,
    #[serde(rename = "State")]
    pub state: Option<usize>,
    /// Time of the last observation represented by this row.
    #[serde(rename = "EventTime")]
    pub event_time: Option<f64>,
    /// Number of observations represented by this row.
    #[serde(rename = "Count")]
    pub count: Option<usize>,
    /// Filled forward from the previous cohort point rather than observed.
    #[serde(skip)]
    pub carried: bool,
}

#[derive(Debug, Clone)]
pub struct CohortedData {
    records: Vec<CohortRecord>,
    bounds: Vec<f64>,
    entities: usize,
    binned_events: usize,
    invalid_events: usize,
    out_of_range_events: usize,
    stale_removed: usize,
}

impl CohortedData {
    pub fn records(&self) -> &[CohortRecord] {
        &self.records
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Number of intervals; the grid holds `cohorts + 1` points per entity.
    pub fn cohorts(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn entities(&self) -> usize {
        self.entities
    }

    /// Events that were assigned to a cohort point, before stale removal.
    pub fn binned_events(&self) -> usize {
        self.binned_events
    }

    /// Events skipped because their state or time was unusable.
    pub fn invalid_events(&self) -> usize {
        self.invalid_events
    }

    /// Events after the last explicit bound.
    pub fn out_of_range_events(&self) -> usize {
        self.out_of_range_events
    }

    pub fn stale_removed(&self) -> usize {
        self.stale_removed
    }

    /// Sum of counts over observed (not carried) rows; equals
    /// `binned_events() - stale_removed()`.
    pub fn observed_event_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.carried)
            .filter_map(|r| r.count)
            .sum()
    }

    /// The grid as Compact events whose time is the cohort index.
    pub fn to_compact(&self) -> Vec<CompactEvent> {
        self.records
            .iter()
            .map(|r| CompactEvent {
                id: r.id,
                time: r.cohort as f64,
                state: r.state,
            })
            .collect()
    }

    /// Rows as CSV with the header `ID,Cohort,State,EventTime,Count`.
    pub fn write_csv<W: Write>(&self, sink: W) -> Result<(), CohortingError> {
        let mut writer = csv::Writer::from_writer(sink);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub(crate) fn check_bounds(bounds: &[f64]) -> Result<(), CohortingError> {
    if bounds.len() < 2 {
        return Err(CohortingError::TooFewBounds(bounds.len()));
    }
    for (index, pair) in bounds.windows(2).enumerate() {
        if !(pair[1] > pair[0]) {
            return Err(CohortingError::UnorderedBounds {
                index: index + 1,
                value: pair[1],
                previous: pair[0],
            });
        }
    }
    Ok(())
}

/// `cohorts + 1` equal-width bounds spanning the valid event times.
///
/// A degenerate range (all events at one time) uses a unit width.
pub fn cohort_bounds(events: &[CompactEvent], cohorts: usize) -> Result<Vec<f64>, CohortingError> {
    if cohorts == 0 {
        return Err(CohortingError::NoCohorts);
    }
    let (t_min, t_max) = events
        .iter()
        .filter(|e| e.is_valid())
        .map(|e| e.time)
        .minmax()
        .into_option()
        .ok_or(CohortingError::NoValidEvents)?;
    let mut dt = (t_max - t_min) / cohorts as f64;
    if dt == 0.0 {
        log::warn!("All events share time {t_min}; using unit cohort width");
        dt = 1.0;
    }
    let mut bounds: Vec<f64> = (0..=cohorts).map(|i| t_min + dt * i as f64).collect();
    if t_max > t_min {
        bounds[cohorts] = t_max;
    }
    Ok(bounds)
}

/// Cohort point of a time: `0` at or before the first bound, otherwise one past the last
/// interval start it exceeds. `None` after the last bound.
pub fn cohort_index(time: f64, bounds: &[f64]) -> Option<usize> {
    let cohorts = bounds.len().checked_sub(1)?;
    if time <= bounds[0] {
        return Some(0);
    }
    if time > bounds[cohorts] {
        return None;
    }
    Some(bounds[..cohorts].partition_point(|&b| b < time))
}

/// Drops observations whose state repeats in the next observation; the final one is kept.
fn remove_stale(bucket: &mut Vec<(f64, usize)>) -> usize {
    let before = bucket.len();
    let mut kept = Vec::with_capacity(before);
    for (position, &observation) in bucket.iter().enumerate() {
        match bucket.get(position + 1) {
            Some(next) if next.1 == observation.1 => {}
            _ => kept.push(observation),
        }
    }
    *bucket = kept;
    before - bucket.len()
}

/// Bin Compact events into a dense `(entity, cohort point)` grid.
pub fn bin_timestamps(
    events: &[CompactEvent],
    spec: &CohortSpec,
    stale_removal: bool,
) -> Result<CohortedData, CohortingError> {
    let bounds = match spec {
        CohortSpec::Count(cohorts) => cohort_bounds(events, *cohorts)?,
        CohortSpec::Bounds(bounds) => {
            check_bounds(bounds)?;
            bounds.clone()
        }
    };
    let cohorts = bounds.len() - 1;

    let mut invalid_events = 0usize;
    let mut out_of_range_events = 0usize;
    let mut assigned: Vec<(i64, usize, f64, usize)> = Vec::with_capacity(events.len());
    for event in events {
        let state = match event.state {
            Some(state) if event.time.is_finite() => state,
            _ => {
                invalid_events += 1;
                continue;
            }
        };
        match cohort_index(event.time, &bounds) {
            Some(cohort) => assigned.push((event.id, cohort, event.time, state)),
            None => out_of_range_events += 1,
        }
    }
    if invalid_events > 0 {
        log::warn!("Skipped {invalid_events} events with an unknown state or time");
    }
    if out_of_range_events > 0 {
        log::warn!("Skipped {out_of_range_events} events after the last cohort bound");
    }
    let binned_events = assigned.len();
    assigned.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.total_cmp(&b.2)));

    let mut records = Vec::new();
    let mut entities = 0usize;
    let mut stale_removed = 0usize;
    for (id, group) in &assigned.iter().chunk_by(|event| event.0) {
        entities += 1;
        let mut buckets: Vec<Vec<(f64, usize)>> = vec![Vec::new(); cohorts + 1];
        for &(_, cohort, time, state) in group {
            buckets[cohort].push((time, state));
        }

        let mut previous: Option<CohortRecord> = None;
        for (cohort, bucket) in buckets.iter_mut().enumerate() {
            if stale_removal {
                stale_removed += remove_stale(bucket);
            }
            let record = match bucket.last() {
                Some(&(time, state)) => CohortRecord {
                    id,
                    cohort,
                    state: Some(state),
                    event_time: Some(time),
                    count: Some(bucket.len()),
                    carried: false,
                },
                None => match previous.as_ref().filter(|p| p.state.is_some()) {
                    Some(p) => CohortRecord {
                        cohort,
                        carried: true,
                        ..p.clone()
                    },
                    None => CohortRecord {
                        id,
                        cohort,
                        state: None,
                        event_time: None,
                        count: None,
                        carried: false,
                    },
                },
            };
            records.push(record.clone());
            previous = Some(record);
        }
    }

    log::info!(
        "Binned {binned_events} events of {entities} entities into {cohorts} cohorts ({} grid points)",
        records.len()
    );
    if stale_removal {
        log::debug!("Stale removal dropped {stale_removed} repeated observations");
    }

    Ok(CohortedData {
        records,
        bounds,
        entities,
        binned_events,
        invalid_events,
        out_of_range_events,
        stale_removed,
    })
}
