pub mod audit;
pub mod config;
pub mod corpus;
pub mod dedup;
pub mod extract;
pub mod fragment;
pub mod paths;
pub mod progress;
pub mod record;
pub mod reference;
pub mod report;
pub mod repair;
pub mod scan;
pub mod similarity;
pub mod store;
pub mod util;
pub mod warn;
