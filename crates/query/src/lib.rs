//! Named, parameterized reports over the aggregation engine.
//!
//! The presentation layer lists templates with [`QueryFacade::list_templates`],
//! runs them with [`QueryFacade::run_template`], or sends its own
//! [`kolet_core::AggregationQuery`] through [`QueryFacade::raw_query`].

pub mod error;
pub mod facade;
pub mod params;
pub mod template;

pub use error::QueryError;
pub use facade::{measure_kinds, QueryFacade};
pub use params::TemplateParams;
pub use template::{ParamKind, ParamSpec, Template, TemplateDescriptor};
