//! Run Monitoring Module
//!
//! Turns engine snapshots into human-readable run reports.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Flow lifetimes in ticks, rendered as a Gantt chart

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
