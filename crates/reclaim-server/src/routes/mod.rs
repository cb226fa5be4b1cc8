pub mod actions;
pub mod carts;
pub mod events;
pub mod health;
pub mod passes;
pub mod settings;
