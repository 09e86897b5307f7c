pub mod filter;
pub mod horizon;
pub mod notification;
pub mod todo;
