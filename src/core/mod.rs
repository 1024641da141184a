pub mod enumerate;
pub mod greedy;
pub mod model;
pub mod solution;
pub mod types;

pub use enumerate::{enumerate_solutions, Enumeration, EnumerationObserver, NullObserver, StopReason};
pub use solution::{Participant, Role, Solution};
pub use types::{Amount, CoinJoinTx, Utxo};
