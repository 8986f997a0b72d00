pub mod annotate;
pub mod app;
pub mod assembly;
pub mod config;
pub mod domain;
pub mod error;
pub mod homology;
pub mod lookup;
pub mod reconcile;
pub mod registry;
pub mod staging;
pub mod statement;
pub mod wikibase;
