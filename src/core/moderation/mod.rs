// Core moderation module - rules, evaluation, reports and stats.
// Storage lives in infra; this module only defines the store traits.

pub mod aggregator;
pub mod content_registry;
pub mod default_rules;
pub mod moderation_models;
pub mod moderation_service;
pub mod rule_evaluator;

pub use aggregator::{aggregate, is_whitelisted, Verdict};
pub use content_registry::{ContentRegistry, Moderatable};
pub use default_rules::default_rules;
pub use moderation_models::*;
pub use moderation_service::*;
pub use rule_evaluator::{CompiledRule, Evaluation};
