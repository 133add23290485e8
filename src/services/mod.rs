pub mod classifier;
pub mod features;
pub mod moderation;
pub mod queue;
pub mod worker;
