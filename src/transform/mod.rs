//! Result transformations applied after fan-in
//!
//! - [`values`]: semantics and unit conversion of raw samples
//! - [`panel`]: shaping of flattened results into panel frames, legend naming

pub mod panel;
pub mod values;

pub use panel::{
    LegendFormatter, PanelData, PanelFrame, PanelTransformations, Table, TimeSeries,
    default_legend_formatter,
};
pub use values::ValueTransformation;
