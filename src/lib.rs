pub mod dashboard;
pub mod live;
pub mod logging;
