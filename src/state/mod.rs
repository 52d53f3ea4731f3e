pub mod liquidity;
pub mod locker;
pub mod market;
pub mod open_orders;
pub mod pool;
pub mod pool_finder;
pub mod store;
pub mod vault;
