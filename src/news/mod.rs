//! News query planning, fetching and rendering.

pub mod article;
pub mod brief;
pub mod catalog;
pub mod desk;
pub mod fetch;
pub mod filter;
pub mod plan;
pub mod provider;
pub mod query;
pub mod understanding;
pub mod window;


pub use article::{Article, ArticleSource};
pub use brief::BriefRenderer;
pub use catalog::{CatalogCache, SourceResolver};
pub use desk::{HealthReport, NewsDesk, NewsError};
pub use fetch::{FetchRequest, Fetcher};
pub use filter::QualityFilter;
pub use plan::QueryPlan;
pub use provider::{GNewsClient, NewsApiClient, NewsProvider, ProviderError};
pub use understanding::{LlmUnderstanding, TextUnderstanding, Understanding};
pub use window::{DateWindow, WindowLimits};
