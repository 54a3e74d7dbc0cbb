pub mod incident;
pub mod insight;
pub mod ping;
pub mod target;
