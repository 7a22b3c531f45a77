pub mod opportunity_scorer;
pub mod strategy;

pub use opportunity_scorer::OpportunityScorer;
