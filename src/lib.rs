pub mod config;
pub mod format;
pub mod period;
pub mod run;
pub mod sheets;
pub mod trends;
