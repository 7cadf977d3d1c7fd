//! # rulegate
//!
//! Typed rule validation with dependency gates, concurrent scheduling and
//! layered settings.
//!
//! This is the main facade crate that re-exports the core engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rulegate::{Rule, RuleConfig, RuleContext, RuleDefinition, RuleResult};
//! use rulegate::{ValidationOptions, Validator};
//!
//! #[derive(Default)]
//! struct FootprintClosed;
//!
//! impl Rule<Building> for FootprintClosed {
//!     fn create(&self, def: &mut RuleDefinition<Building>) {
//!         def.id("GEO-1").name("Footprint must be closed");
//!     }
//!
//!     fn validate(&self, input: &Building, ctx: &mut RuleContext) -> RuleResult {
//!         if !input.is_closed() {
//!             ctx.add_message("Footprint is not closed")?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! rulegate::telemetry::init();
//!
//! let config = RuleConfig::<Building>::builder("Buildings")
//!     .group("geometry", "Geometry", |g| g.rule::<FootprintClosed>())
//!     .build()?;
//! let validator = Validator::builder().rule_config(config).build()?;
//! let run = validator.validate(building, &ValidationOptions::new()).await?;
//! ```
//!
//! ## Configuration File
//!
//! ```toml
//! max_message_count = 500
//! skip_rules = ["GEO-3"]
//!
//! [groups.attributes]
//! skip = true
//! ```
//!
//! Load it with [`ValidatorConfig::from_file`] and pass it to
//! [`ValidatorBuilder::config`]; [`Validator::default_options`] turns it into
//! run options.

#![forbid(unsafe_code)]

// Re-export core types and traits
pub use rulegate_core::*;

/// Log output for hosts that do not install their own subscriber.
pub mod telemetry {
    use tracing_subscriber::EnvFilter;

    /// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
    /// `info`.
    ///
    /// Does nothing if a global subscriber is already set.
    pub fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        install(filter);
    }

    /// Installs a `fmt` subscriber with explicit filter directives,
    /// e.g. `"rulegate_core=debug"`.
    ///
    /// Does nothing if a global subscriber is already set.
    pub fn init_with(directives: &str) {
        install(EnvFilter::new(directives));
    }

    fn install(filter: EnvFilter) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}
