pub mod clock;
pub mod extractors;
pub mod identity;
pub mod jwt;
pub mod refresh;
pub mod services;
