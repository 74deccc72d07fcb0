pub mod behavior;
pub mod order;
pub mod product;
pub mod recommendation;
pub mod user;
