pub mod acquisition;
pub mod health;
