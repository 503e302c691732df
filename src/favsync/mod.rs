pub mod artifact;
pub mod audit;
pub mod bilibili;
pub mod config;
pub mod diff;
pub mod dump;
pub mod lock;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod paths;
pub mod records;
pub mod rewrite;
pub mod source;
pub mod transcript;
pub mod util;
pub mod warn;
