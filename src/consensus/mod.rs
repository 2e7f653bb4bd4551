//! # DAG aBFT consensus primitives
//!
//! Validators exchange signed events that form a DAG. Ordering is derived
//! from topology alone, built on one primitive: *strongly sees*.
//!
//! ## How It Works
//!
//! ```text
//! Per epoch:
//!   1. The validator set (members) is fixed and weights are known
//!   2. Each ingested event gets an ancestry record:
//!        highest_seen[n]  newest event of n it descends from
//!        lowest_sees[n]   oldest event of n known to descend from it
//!   3. A strongly sees B when, for validators holding >= 2W/3 + 1 weight,
//!        0 < B.lowest_sees[n] <= A.highest_seen[n]
//!   4. On epoch change the index is reset; nothing crosses epochs
//! ```
//!
//! Records only ever tighten as events arrive, so a "yes" answer never
//! turns into "no" later in the epoch.

pub mod ancestry;
pub mod engine;
pub mod event;
pub mod members;
pub mod strongly;
