//! Utilization analysis of solved layouts.

pub mod utilization;

pub use utilization::{
    analyze, classify, AggregateUtilization, CourseSummary, UtilizationAnalysis,
    UtilizationBand, UtilizationMetric,
};
